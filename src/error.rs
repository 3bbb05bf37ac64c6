//! Error types for the ledgerlens library.
//!
//! A single [`ExtractionError`] covers every way an extraction cycle can end
//! without transactions. There is no page-level or element-level "soft"
//! error: one unreadable page or one malformed record fails the whole cycle.
//!
//! Variants fall into three groups:
//!
//! * **Startup**: [`ExtractionError::MissingCredential`],
//!   [`ExtractionError::ProviderNotConfigured`],
//!   [`ExtractionError::InvalidConfig`]. Raised before any file is read.
//! * **Normalization**: file type, file content and rasterizer failures.
//! * **Inference / parsing**: the remote call failed or its reply could not
//!   be turned into transactions.
//!
//! The rasterizer seam has its own small [`RasterError`] so that test doubles
//! and adapters do not need to know about file names; the normalizer maps it
//! into [`ExtractionError`] with the file context attached.

use std::path::PathBuf;
use thiserror::Error;

/// How many characters of a raw model reply are kept in error values.
pub const RAW_SNIPPET_CHARS: usize = 200;

/// All errors returned by the ledgerlens library.
#[derive(Debug, Error)]
pub enum ExtractionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The declared media type is not one of the accepted statement formats.
    #[error(
        "Unsupported file type '{media_type}' for '{file}'.\n\
Upload a PDF or a JPEG, PNG or WebP image."
    )]
    UnsupportedFileType { file: String, media_type: String },

    /// The file could not be read, or its content is corrupt.
    #[error("Failed to read '{file}': {detail}")]
    FileReadError { file: String, detail: String },

    /// A URL input could not be downloaded.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// No page rasterizer is available for PDF inputs.
    #[error(
        "PDF rasterizer unavailable: {0}\n\n\
PDF statements are rendered with the pdfium library. You can:\n\
  • Set PDFIUM_LIB_PATH=/path/to/libpdfium.\n\
  • Place libpdfium next to the executable or in the working directory.\n\
  • Upload page images instead of the PDF."
    )]
    RasterizerUnavailable(String),

    /// A single page failed to render or encode.
    #[error("Rasterisation failed for '{file}' page {page}: {detail}")]
    RasterisationFailed {
        file: String,
        page: usize,
        detail: String,
    },

    /// Normalization produced no image payloads at all.
    #[error("Nothing to extract: {files} file(s) produced no page images")]
    EmptyExtraction { files: usize },

    // ── Inference errors ──────────────────────────────────────────────────
    /// The inference call failed or returned an empty body.
    #[error("Inference request failed: {reason}")]
    InferenceRequestFailed { reason: String },

    // ── Response errors ───────────────────────────────────────────────────
    /// The cleaned reply is not valid JSON.
    #[error("Failed to parse the transaction data returned by the model: {reason}\nRaw response: {raw}")]
    MalformedResponse { raw: String, reason: String },

    /// The reply decoded, but not to an array.
    #[error("The model response was not a list of transactions (got {found}).\nRaw response: {raw}")]
    UnexpectedResponseShape { found: String, raw: String },

    /// One element of the reply does not match the transaction schema.
    #[error("Transaction #{index} is invalid: {reason}")]
    InvalidTransaction { index: usize, reason: String },

    // ── Startup errors ────────────────────────────────────────────────────
    /// No API key was found in the environment.
    #[error("No API key found.\nSet one of: {}", .vars.join(", "))]
    MissingCredential { vars: Vec<String> },

    /// The requested provider could not be constructed.
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Session errors ────────────────────────────────────────────────────
    /// Another extraction is already running on this extractor.
    #[error("An extraction is already in progress; wait for it to finish")]
    Busy,

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractionError {
    /// Whether re-running the same cycle on the same input could succeed.
    ///
    /// Model replies are not deterministic, so shape and decode failures are
    /// worth another attempt. File, rasterizer and startup errors need the
    /// user to change something first.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExtractionError::InferenceRequestFailed { .. }
                | ExtractionError::MalformedResponse { .. }
                | ExtractionError::UnexpectedResponseShape { .. }
                | ExtractionError::InvalidTransaction { .. }
                | ExtractionError::DownloadFailed { .. }
                | ExtractionError::Busy
        )
    }
}

/// Failure reported by a [`crate::pipeline::render::PageRasterizer`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RasterError {
    /// The rendering engine could not be loaded.
    #[error("{0}")]
    Unavailable(String),

    /// The document could not be opened.
    #[error("{0}")]
    Document(String),

    /// One page could not be rendered (0-based index).
    #[error("page {index}: {detail}")]
    Page { index: usize, detail: String },
}

/// Shorten a raw reply for inclusion in an error message.
pub(crate) fn snippet(raw: &str) -> String {
    let mut chars = raw.chars();
    let head: String = chars.by_ref().take(RAW_SNIPPET_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
