//! Input loading: uploaded files, their declared media types, and the
//! path/URL resolution used by the CLI.
//!
//! An [`UploadedFile`] is what the UI layer hands the pipeline: bytes plus a
//! *declared* media type. The declaration is trusted for dispatch; the only
//! content check is the `%PDF` magic on declared PDFs, so a mislabelled file
//! fails early with a readable error instead of deep inside pdfium.

use crate::error::ExtractionError;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Statement formats the pipeline accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
    Webp,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [
        MediaType::Pdf,
        MediaType::Jpeg,
        MediaType::Png,
        MediaType::Webp,
    ];

    /// Parse a declared media type. Parameters (`; charset=…`) and case are
    /// ignored; `image/jpg` is accepted as an alias of `image/jpeg`.
    pub fn parse(declared: &str) -> Option<Self> {
        let essence = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/pdf" => Some(MediaType::Pdf),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Guess from a file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(MediaType::Pdf),
            "jpg" | "jpeg" => Some(MediaType::Jpeg),
            "png" => Some(MediaType::Png),
            "webp" => Some(MediaType::Webp),
            _ => None,
        }
    }

    /// Canonical MIME string.
    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Webp => "image/webp",
        }
    }

    pub fn is_pdf(self) -> bool {
        self == MediaType::Pdf
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-selected file: bytes plus the media type it was declared as.
///
/// The bytes are reference-counted so rasterisation tasks can share them
/// without copying.
#[derive(Clone)]
pub struct UploadedFile {
    name: String,
    declared_type: String,
    bytes: Arc<[u8]>,
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("declared_type", &self.declared_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

impl UploadedFile {
    pub fn new(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        bytes: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The media type string as declared by the uploader.
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle to the bytes.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// The parsed media type, or `UnsupportedFileType`.
    pub fn media_type(&self) -> Result<MediaType, ExtractionError> {
        MediaType::parse(&self.declared_type).ok_or_else(|| ExtractionError::UnsupportedFileType {
            file: self.name.clone(),
            media_type: self.declared_type.clone(),
        })
    }

    /// Read a local file, declaring its type from the extension or, failing
    /// that, from its content.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, ExtractionError> {
        let path = path.as_ref();
        let name = display_name(path);

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ExtractionError::FileReadError {
                file: name.clone(),
                detail: e.to_string(),
            })?;

        let declared = path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(MediaType::from_extension)
            .map(|m| m.as_str().to_string())
            .or_else(|| sniff_mime(&bytes))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        debug!("Loaded {} ({}, {} bytes)", name, declared, bytes.len());
        Ok(Self::new(name, declared, bytes))
    }

    /// Download a file, declaring its type from `Content-Type`, the URL
    /// extension, or its content, in that order.
    pub async fn from_url(url: &str, timeout_secs: u64) -> Result<Self, ExtractionError> {
        info!("Downloading statement from: {}", url);

        let download_err = |reason: String| ExtractionError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| download_err(e.to_string()))?;

        let response = client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                download_err(format!("timed out after {timeout_secs}s"))
            } else {
                download_err(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(download_err(format!("HTTP {}", response.status())));
        }

        let header_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| MediaType::parse(v).is_some())
            .map(str::to_string);

        let name = url_file_name(url);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        let declared = header_type
            .or_else(|| {
                Path::new(&name)
                    .extension()
                    .and_then(|e| e.to_str())
                    .and_then(MediaType::from_extension)
                    .map(|m| m.as_str().to_string())
            })
            .or_else(|| sniff_mime(&bytes))
            .unwrap_or_else(|| "application/octet-stream".to_string());

        info!("Downloaded {} ({}, {} bytes)", name, declared, bytes.len());
        Ok(Self::new(name, declared, bytes.to_vec()))
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Load a mix of local paths and URLs, preserving their order.
pub async fn load_inputs(
    inputs: &[impl AsRef<str>],
    download_timeout_secs: u64,
) -> Result<Vec<UploadedFile>, ExtractionError> {
    let mut files = Vec::with_capacity(inputs.len());
    for input in inputs {
        let input = input.as_ref();
        let file = if is_url(input) {
            UploadedFile::from_url(input, download_timeout_secs).await?
        } else {
            UploadedFile::from_path(input).await?
        };
        files.push(file);
    }
    Ok(files)
}

/// Verify that a declared PDF actually starts with the `%PDF` magic.
pub(crate) fn check_pdf_magic(file: &UploadedFile) -> Result<(), ExtractionError> {
    let bytes = file.bytes();
    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let head: Vec<u8> = bytes.iter().take(4).copied().collect();
        return Err(ExtractionError::FileReadError {
            file: file.name().to_string(),
            detail: format!("declared as PDF but does not start with %PDF (first bytes: {head:?})"),
        });
    }
    Ok(())
}

fn sniff_mime(bytes: &[u8]) -> Option<String> {
    infer::get(bytes)
        .map(|kind| kind.mime_type())
        .filter(|mime| MediaType::parse(mime).is_some())
        .map(str::to_string)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Extract a reasonable file name from the URL path.
fn url_file_name(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded".to_string()
}
