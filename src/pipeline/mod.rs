//! Pipeline stages for statement extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own; the rasterizer and the inference backend sit behind traits so tests
//! can replace them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ normalize ──▶ llm ──▶ parse
//!            │  ▲
//!            ▼  │
//!          render/encode
//! ```
//!
//! 1. [`input`]    : uploaded files, declared media types, path/URL loading
//! 2. [`render`]   : PDF page rasterisation behind [`render::PageRasterizer`]
//! 3. [`encode`]   : JPEG/base64 payloads and the ordered batch
//! 4. [`normalize`]: files → one ordered [`encode::PayloadBatch`]
//! 5. [`llm`]      : the single inference request; the only network stage
//!    besides URL downloads
//! 6. [`parse`]    : reply text → validated transactions

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
pub mod render;
