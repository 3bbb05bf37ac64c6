//! End-to-end integration tests for ledgerlens.
//!
//! These tests use real statements in `./test_cases/` and make live API
//! calls. They are gated behind the `E2E_ENABLED` environment variable so
//! they do not run in CI unless explicitly requested.
//!
//! Run with:
//!   E2E_ENABLED=1 PDFIUM_LIB_PATH=. cargo test --test e2e -- --nocapture
//!
//! Expected files (any subset; missing ones are skipped):
//!   test_cases/statement.pdf   multi-page bank statement
//!   test_cases/statement.png   photo or screenshot of a statement page

use ledgerlens::extract::inspect;
use ledgerlens::pipeline::input::load_inputs;
use ledgerlens::{
    ExtractionConfig, Extractor, PageRasterizer, PdfiumRasterizer, Transaction,
};
use std::path::PathBuf;
use std::sync::Arc;

// ── Test helpers ─────────────────────────────────────────────────────────────

fn test_cases_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases")
}

fn output_dir() -> PathBuf {
    let d = test_cases_dir().join("output");
    std::fs::create_dir_all(&d).ok();
    d
}

/// Skip this test if E2E_ENABLED is not set *or* no file at `path`.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        let p: PathBuf = $path;
        if !p.exists() {
            println!("SKIP — test file not found: {}", p.display());
            return;
        }
        p
    }};
}

/// Sanity checks that hold for any real statement.
fn assert_plausible(transactions: &[Transaction], context: &str) {
    assert!(!transactions.is_empty(), "[{context}] no transactions");
    for (i, t) in transactions.iter().enumerate() {
        assert!(
            !t.description.trim().is_empty(),
            "[{context}] #{i} has an empty description"
        );
        assert!(
            !t.category.trim().is_empty(),
            "[{context}] #{i} has an empty category"
        );
        assert!(t.amount.is_finite(), "[{context}] #{i} amount is not finite");
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inspect_statement_pdf() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("statement.pdf"));

    let files = load_inputs(&[pdf.to_string_lossy()], 30).await.unwrap();
    let rasterizer: Arc<dyn PageRasterizer> = Arc::new(PdfiumRasterizer::from_env());
    let summary = inspect(&files, Some(rasterizer), &ExtractionConfig::default())
        .await
        .expect("inspect should succeed with pdfium available");

    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
    assert!(summary.files[0].payloads >= 1);
    assert!(summary.payloads.iter().all(|p| p.mime_type == "image/jpeg"));
}

#[tokio::test]
async fn test_extract_statement_pdf() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("statement.pdf"));

    let extractor = Extractor::from_config(ExtractionConfig::default())
        .expect("GEMINI_API_KEY or API_KEY must be set");
    let out_path = output_dir().join("statement.json");

    let output = extractor
        .extract_to_file(&[pdf.to_string_lossy()], &out_path)
        .await
        .expect("extraction should succeed");

    println!(
        "{} transactions, net {:.2}, {} tokens in / {} out, {}ms",
        output.transactions.len(),
        output.net_amount(),
        output.stats.input_tokens,
        output.stats.output_tokens,
        output.stats.total_duration_ms
    );
    assert_plausible(&output.transactions, "statement.pdf");
    assert!(out_path.exists());
}

#[tokio::test]
async fn test_extract_pdf_and_image_together() {
    let pdf = e2e_skip_unless_ready!(test_cases_dir().join("statement.pdf"));
    let png = e2e_skip_unless_ready!(test_cases_dir().join("statement.png"));

    let extractor = Extractor::from_config(ExtractionConfig::default())
        .expect("GEMINI_API_KEY or API_KEY must be set");
    let output = extractor
        .extract_inputs(&[pdf.to_string_lossy(), png.to_string_lossy()])
        .await
        .expect("extraction should succeed");

    assert_eq!(output.stats.files, 2);
    assert!(output.stats.payloads >= 2);
    assert_plausible(&output.transactions, "pdf+png");
}
