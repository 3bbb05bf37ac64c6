//! Extraction cycle: normalize → infer → parse, one cycle at a time.
//!
//! [`Extractor`] owns the inference backend, the page rasterizer and the
//! configuration for a session. Its admission gate lets exactly one cycle run
//! at a time: a second call while one is pending is rejected with
//! [`ExtractionError::Busy`] rather than queued, and the gate reopens when the
//! cycle ends, however it ends.

use crate::config::ExtractionConfig;
use crate::error::ExtractionError;
use crate::output::{BatchSummary, ExtractionOutput, ExtractionStats, FileSummary, PayloadSummary};
use crate::pipeline::input::{self, UploadedFile};
use crate::pipeline::llm::{self, InferenceBackend, InferenceRequest};
use crate::pipeline::normalize;
use crate::pipeline::parse;
use crate::pipeline::render::{PageRasterizer, PdfiumRasterizer};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs extraction cycles against one backend.
pub struct Extractor {
    backend: Arc<dyn InferenceBackend>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    config: ExtractionConfig,
    in_flight: AtomicBool,
}

/// Reopens the admission gate on drop.
struct AdmissionGuard<'a>(&'a AtomicBool);

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor")
            .field("backend", &self.backend.name())
            .field("rasterizer", &self.rasterizer.as_ref().map(|_| "<dyn PageRasterizer>"))
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl Extractor {
    /// Build with an explicit backend and the pdfium rasterizer.
    ///
    /// The pdfium library is not loaded until the first PDF is seen.
    pub fn new(backend: Arc<dyn InferenceBackend>, config: ExtractionConfig) -> Self {
        Self {
            backend,
            rasterizer: Some(Arc::new(PdfiumRasterizer::from_env())),
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Resolve the backend from `config` and the environment.
    ///
    /// Fails with [`ExtractionError::MissingCredential`] when the Gemini
    /// backend is selected and no API key is set.
    pub fn from_config(config: ExtractionConfig) -> Result<Self, ExtractionError> {
        let backend = llm::resolve_backend(&config)?;
        Ok(Self::new(backend, config))
    }

    /// Like [`from_config`](Self::from_config), reading environment
    /// variables through `lookup`.
    pub fn from_config_with(
        config: ExtractionConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ExtractionError> {
        let backend = llm::resolve_backend_with(&config, lookup)?;
        Ok(Self::new(backend, config))
    }

    /// Replace the page rasterizer.
    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    /// Accept images only; any PDF fails with `RasterizerUnavailable`.
    pub fn without_rasterizer(mut self) -> Self {
        self.rasterizer = None;
        self
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Whether a cycle is currently running.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn admit(&self) -> Result<AdmissionGuard<'_>, ExtractionError> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                warn!("Rejected extraction: another cycle is in progress");
                ExtractionError::Busy
            })?;
        Ok(AdmissionGuard(&self.in_flight))
    }

    /// Run one cycle over already-loaded files.
    pub async fn extract(&self, files: &[UploadedFile]) -> Result<ExtractionOutput, ExtractionError> {
        let _guard = self.admit()?;
        self.run(files).await
    }

    /// Load paths and URLs, then run one cycle over them.
    pub async fn extract_inputs(
        &self,
        inputs: &[impl AsRef<str>],
    ) -> Result<ExtractionOutput, ExtractionError> {
        let _guard = self.admit()?;
        let files = match input::load_inputs(inputs, self.config.download_timeout_secs).await {
            Ok(files) => files,
            Err(e) => {
                self.report_error(&e);
                return Err(e);
            }
        };
        self.run(&files).await
    }

    /// Synchronous wrapper around [`Extractor::extract`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn extract_sync(&self, files: &[UploadedFile]) -> Result<ExtractionOutput, ExtractionError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ExtractionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.extract(files))
    }

    /// Extract and write the output as JSON.
    ///
    /// Uses atomic write (temp file + rename) to prevent partial files.
    pub async fn extract_to_file(
        &self,
        inputs: &[impl AsRef<str>],
        output_path: impl AsRef<Path>,
    ) -> Result<ExtractionOutput, ExtractionError> {
        let output = self.extract_inputs(inputs).await?;
        write_json_atomic(output_path.as_ref(), &output).await?;
        Ok(output)
    }

    async fn run(&self, files: &[UploadedFile]) -> Result<ExtractionOutput, ExtractionError> {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_start(files.len());
        }

        let result = self.run_stages(files).await;

        match &result {
            Ok(output) => {
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_extraction_complete(output.transactions.len());
                }
            }
            Err(e) => self.report_error(e),
        }
        result
    }

    fn report_error(&self, e: &ExtractionError) {
        warn!("Extraction failed: {}", e);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_extraction_error(&e.to_string());
        }
    }

    async fn run_stages(&self, files: &[UploadedFile]) -> Result<ExtractionOutput, ExtractionError> {
        let total_start = Instant::now();
        info!(
            "Starting extraction: {} file(s) via {}",
            files.len(),
            self.backend.name()
        );

        // ── Step 1: Normalize ────────────────────────────────────────────
        let normalize_start = Instant::now();
        let normalized =
            normalize::normalize_detailed(files, self.rasterizer.clone(), &self.config).await?;
        let normalize_duration_ms = normalize_start.elapsed().as_millis() as u64;

        if let Some(ref cb) = self.config.progress_callback {
            for (index, (file, payloads)) in files.iter().zip(&normalized.per_file).enumerate() {
                cb.on_file_normalized(index, file.name(), *payloads);
            }
        }

        // ── Step 2: Infer ────────────────────────────────────────────────
        let payloads = normalized.batch.len();
        let payload_bytes = normalized.batch.total_encoded_len();
        let request = InferenceRequest::new(&self.config, normalized.batch);

        if let Some(ref cb) = self.config.progress_callback {
            cb.on_inference_start(payloads);
        }

        let inference_start = Instant::now();
        let response = self.backend.infer(&request).await?;
        let inference_duration_ms = inference_start.elapsed().as_millis() as u64;
        debug!(
            "Reply received in {}ms ({} chars)",
            inference_duration_ms,
            response.text.len()
        );

        // ── Step 3: Parse ────────────────────────────────────────────────
        let transactions = parse::parse(&response.text)?;

        let stats = ExtractionStats {
            files: files.len(),
            payloads,
            payload_bytes,
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
            normalize_duration_ms,
            inference_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        };

        info!(
            "Extraction complete: {} transaction(s) from {} payload(s), {}ms total",
            transactions.len(),
            payloads,
            stats.total_duration_ms
        );

        Ok(ExtractionOutput {
            transactions,
            stats,
        })
    }
}

/// Normalize a selection and describe the resulting payloads.
///
/// Does not require a backend or API key.
pub async fn inspect(
    files: &[UploadedFile],
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    config: &ExtractionConfig,
) -> Result<BatchSummary, ExtractionError> {
    let normalized = normalize::normalize_detailed(files, rasterizer, config).await?;

    let file_summaries = files
        .iter()
        .zip(&normalized.per_file)
        .map(|(file, payloads)| FileSummary {
            name: file.name().to_string(),
            media_type: file.declared_type().to_string(),
            payloads: *payloads,
        })
        .collect();

    let payloads = normalized
        .batch
        .iter()
        .map(|p| PayloadSummary {
            mime_type: p.mime_type.clone(),
            encoded_bytes: p.encoded_len(),
        })
        .collect();

    Ok(BatchSummary {
        files: file_summaries,
        payloads,
        total_encoded_bytes: normalized.batch.total_encoded_len(),
    })
}

/// Write `output` as pretty JSON via a temp file and rename.
pub async fn write_json_atomic(
    path: &Path,
    output: &ExtractionOutput,
) -> Result<(), ExtractionError> {
    let write_err = |e: std::io::Error| ExtractionError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    let json = serde_json::to_vec_pretty(output)
        .map_err(|e| ExtractionError::Internal(format!("Failed to serialise output: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, &json).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
