//! Progress-callback trait for extraction-cycle events.
//!
//! Inject an [`Arc<dyn ExtractionProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves from normalization to inference to parsing.
//!
//! # Example
//!
//! ```rust
//! use ledgerlens::{ExtractionConfig, ExtractionProgressCallback};
//! use std::sync::Arc;
//!
//! struct Log;
//!
//! impl ExtractionProgressCallback for Log {
//!     fn on_file_normalized(&self, index: usize, name: &str, payloads: usize) {
//!         eprintln!("file {} ({name}): {payloads} image(s)", index + 1);
//!     }
//! }
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(Arc::new(Log) as Arc<dyn ExtractionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the extraction pipeline at each stage boundary.
///
/// Implementations must be `Send + Sync`. All methods have no-op defaults so
/// callers only override what they care about. Events for one cycle are
/// delivered in order, from the task running that cycle.
pub trait ExtractionProgressCallback: Send + Sync {
    /// Called once the cycle has been admitted.
    fn on_extraction_start(&self, file_count: usize) {
        let _ = file_count;
    }

    /// Called per file, in selection order, after normalization succeeded.
    ///
    /// # Arguments
    /// * `index`   : 0-based position of the file in the selection
    /// * `name`    : display name of the file
    /// * `payloads`: image payloads it contributed (pages for a PDF)
    fn on_file_normalized(&self, index: usize, name: &str, payloads: usize) {
        let _ = (index, name, payloads);
    }

    /// Called just before the inference request is sent.
    fn on_inference_start(&self, payload_count: usize) {
        let _ = payload_count;
    }

    /// Called after the reply was parsed successfully.
    fn on_extraction_complete(&self, transaction_count: usize) {
        let _ = transaction_count;
    }

    /// Called when the cycle fails at any stage after admission.
    fn on_extraction_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ExtractionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn ExtractionProgressCallback>;
