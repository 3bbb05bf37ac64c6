//! # ledgerlens
//!
//! Extract transactions from bank statements (PDF or images) with a
//! multimodal model.
//!
//! Statements arrive as PDFs, phone photos or screenshots, in any bank's
//! layout. Rather than writing a parser per bank, this crate renders every
//! page to an image, sends all of them to a vision model in a single request
//! together with a strict JSON schema, and validates what comes back into
//! typed [`Transaction`] records.
//!
//! ## Pipeline Overview
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Input      local path or URL → UploadedFile (bytes + media type)
//!  ├─ 2. Render     PDF pages via pdfium at 2× (CPU-bound, spawn_blocking)
//!  ├─ 3. Encode     pages → JPEG q80 → base64; images pass through
//!  ├─ 4. Infer      one request: prompt + schema + every image, in order
//!  └─ 5. Parse      de-fence, decode, validate → Vec<Transaction>
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ledgerlens::{ExtractionConfig, Extractor};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Gemini by default; the key comes from GEMINI_API_KEY or API_KEY
//!     let extractor = Extractor::from_config(ExtractionConfig::default())?;
//!     let output = extractor.extract_inputs(&["january.pdf"]).await?;
//!     for t in &output.transactions {
//!         println!("{}  {:>10.2}  {}", t.date, t.amount, t.description);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ledgerlens` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ledgerlens = { version = "0.1", default-features = false }
//! ```
//!
//! ## Choosing a Backend
//!
//! | Provider | Schema delivery | Credential |
//! |----------|-----------------|------------|
//! | `gemini` (default) | native `responseSchema` | `GEMINI_API_KEY` / `API_KEY` |
//! | `openai`, `anthropic`, `ollama`, … | inline in the system prompt | provider's own variable |
//! | `auto` | inline | first provider found in the environment |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ApiKey, ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractionError, RasterError};
pub use extract::{inspect, Extractor};
pub use output::{BatchSummary, ExtractionOutput, ExtractionStats, Transaction};
pub use pipeline::encode::{ImagePayload, PayloadBatch};
pub use pipeline::input::{MediaType, UploadedFile};
pub use pipeline::llm::{GeminiBackend, InferenceBackend, InferenceRequest, InferenceResponse};
pub use pipeline::normalize::normalize;
pub use pipeline::parse::{parse, ExtractionResult};
pub use pipeline::render::{PageRasterizer, PdfiumRasterizer};
pub use progress::{ExtractionProgressCallback, NoopProgressCallback};
pub use schema::TRANSACTION_SCHEMA;
