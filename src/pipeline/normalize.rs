//! Document normalization: uploaded files → one ordered [`PayloadBatch`].
//!
//! ## Ordering
//!
//! Each file is one job: an image is base64-encoded as is, a PDF is rendered
//! and encoded page by page inside a single `spawn_blocking` task, so the
//! rasterizer opens every document once. File jobs run concurrently (bounded
//! by `render_concurrency`) and complete in any order; each carries its file
//! index and the results are sorted on it, so the batch is always files in
//! selection order, then pages in page order.
//!
//! pdfium serialises all calls behind one process-wide lock, so with
//! [`PdfiumRasterizer`](crate::pipeline::render::PdfiumRasterizer) PDFs
//! render one at a time; the bound still limits how many decoded documents
//! are held in memory.
//!
//! ## Failure policy
//!
//! Abort-all. Declared types are checked for every file before any work
//! starts; after that, the first failing job (in file order) fails the batch.

use crate::config::ExtractionConfig;
use crate::error::{ExtractionError, RasterError};
use crate::pipeline::encode::{self, ImagePayload, PayloadBatch};
use crate::pipeline::input::{check_pdf_magic, MediaType, UploadedFile};
use crate::pipeline::render::PageRasterizer;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Normalization result with per-file payload counts.
#[derive(Debug, Clone, Default)]
pub struct NormalizedBatch {
    pub batch: PayloadBatch,
    /// Payloads contributed by each file, in selection order.
    pub per_file: Vec<usize>,
}

/// Convert `files` into a flattened, ordered payload batch.
///
/// `rasterizer` is only consulted for PDFs; image-only selections work
/// without one.
pub async fn normalize(
    files: &[UploadedFile],
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    config: &ExtractionConfig,
) -> Result<PayloadBatch, ExtractionError> {
    normalize_detailed(files, rasterizer, config)
        .await
        .map(|n| n.batch)
}

/// Like [`normalize`], also reporting how many payloads each file produced.
pub async fn normalize_detailed(
    files: &[UploadedFile],
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    config: &ExtractionConfig,
) -> Result<NormalizedBatch, ExtractionError> {
    // ── Step 1: Admission checks on every file ───────────────────────────
    let kinds = files
        .iter()
        .map(UploadedFile::media_type)
        .collect::<Result<Vec<MediaType>, _>>()?;

    for (file, kind) in files.iter().zip(&kinds) {
        if file.bytes().is_empty() {
            return Err(ExtractionError::FileReadError {
                file: file.name().to_string(),
                detail: "file is empty".into(),
            });
        }
        if kind.is_pdf() {
            check_pdf_magic(file)?;
        }
    }

    let rasterizer = if kinds.iter().any(|k| k.is_pdf()) {
        Some(rasterizer.ok_or_else(|| {
            ExtractionError::RasterizerUnavailable("no page rasterizer is configured".into())
        })?)
    } else {
        None
    };

    // ── Step 2: One job per file ─────────────────────────────────────────
    let jobs: Vec<Job> = files
        .iter()
        .zip(&kinds)
        .enumerate()
        .map(|(file_idx, (file, kind))| {
            if kind.is_pdf() {
                Job::Document {
                    file_idx,
                    name: file.name().to_string(),
                    bytes: file.shared_bytes(),
                }
            } else {
                Job::Image {
                    file_idx,
                    bytes: file.shared_bytes(),
                    mime_type: kind.as_str(),
                }
            }
        })
        .collect();
    debug!("Normalizing {} file(s)", jobs.len());

    // ── Step 3: Run jobs, then restore order ─────────────────────────────
    let scale = config.render_scale;
    let quality = config.jpeg_quality;
    let mut results: Vec<(usize, Result<Vec<ImagePayload>, ExtractionError>)> =
        stream::iter(jobs.into_iter().map(|job| {
            let rasterizer = rasterizer.clone();
            async move { job.run(rasterizer, scale, quality).await }
        }))
        .buffer_unordered(config.render_concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(file_idx, _)| *file_idx);

    let mut per_file = Vec::with_capacity(results.len());
    let mut payloads = Vec::new();
    for (_, result) in results {
        let file_payloads = result?;
        per_file.push(file_payloads.len());
        payloads.extend(file_payloads);
    }

    if payloads.is_empty() {
        return Err(ExtractionError::EmptyExtraction { files: files.len() });
    }

    let batch = PayloadBatch::new(payloads);
    info!(
        "Normalized {} file(s) → {} payload(s), {} bytes base64",
        files.len(),
        batch.len(),
        batch.total_encoded_len()
    );
    Ok(NormalizedBatch { batch, per_file })
}

enum Job {
    Image {
        file_idx: usize,
        bytes: Arc<[u8]>,
        mime_type: &'static str,
    },
    Document {
        file_idx: usize,
        name: String,
        bytes: Arc<[u8]>,
    },
}

impl Job {
    async fn run(
        self,
        rasterizer: Option<Arc<dyn PageRasterizer>>,
        scale: f32,
        quality: u8,
    ) -> (usize, Result<Vec<ImagePayload>, ExtractionError>) {
        match self {
            Job::Image {
                file_idx,
                bytes,
                mime_type,
            } => (file_idx, Ok(vec![ImagePayload::from_bytes(&bytes, mime_type)])),
            Job::Document {
                file_idx,
                name,
                bytes,
            } => {
                let Some(rasterizer) = rasterizer else {
                    return (
                        file_idx,
                        Err(ExtractionError::RasterizerUnavailable(
                            "no page rasterizer is configured".into(),
                        )),
                    );
                };
                let result = tokio::task::spawn_blocking(move || {
                    render_document_blocking(rasterizer.as_ref(), &name, &bytes, scale, quality)
                })
                .await
                .unwrap_or_else(|e| {
                    Err(ExtractionError::Internal(format!("Render task panicked: {e}")))
                });
                (file_idx, result)
            }
        }
    }
}

/// Render every page of one PDF and JPEG-encode it, in page order.
fn render_document_blocking(
    rasterizer: &dyn PageRasterizer,
    name: &str,
    bytes: &[u8],
    scale: f32,
    quality: u8,
) -> Result<Vec<ImagePayload>, ExtractionError> {
    let pages = rasterizer
        .render_pages(bytes, scale)
        .map_err(|e| raster_error(name, e))?;
    debug!("{} rendered {} page(s)", name, pages.len());

    pages
        .iter()
        .enumerate()
        .map(|(page_idx, image)| {
            encode::encode_page(image, quality).map_err(|e| ExtractionError::RasterisationFailed {
                file: name.to_string(),
                page: page_idx + 1,
                detail: format!("Image encoding failed: {e}"),
            })
        })
        .collect()
}

/// Attach the file name to a rasterizer failure.
fn raster_error(file: &str, err: RasterError) -> ExtractionError {
    match err {
        RasterError::Unavailable(detail) => ExtractionError::RasterizerUnavailable(detail),
        RasterError::Document(detail) => ExtractionError::FileReadError {
            file: file.to_string(),
            detail,
        },
        RasterError::Page { index, detail } => ExtractionError::RasterisationFailed {
            file: file.to_string(),
            page: index + 1,
            detail,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Reads the page count from the document bytes (`%PDF pages=N`);
    /// page `i` is `10 + i` pixels wide so order is visible after encoding.
    /// Small PDFs render faster, so file completion order can be reversed.
    struct FakeRasterizer {
        renders: AtomicUsize,
        fail_page: Option<usize>,
    }

    impl FakeRasterizer {
        fn new() -> Self {
            Self {
                renders: AtomicUsize::new(0),
                fail_page: None,
            }
        }
    }

    impl PageRasterizer for FakeRasterizer {
        fn page_count(&self, document: &[u8]) -> Result<usize, RasterError> {
            let text = String::from_utf8_lossy(document);
            text.split("pages=")
                .nth(1)
                .and_then(|n| n.trim().parse().ok())
                .ok_or_else(|| RasterError::Document("no page count".into()))
        }

        fn render_page(
            &self,
            _document: &[u8],
            page_index: usize,
            _scale: f32,
        ) -> Result<DynamicImage, RasterError> {
            if self.fail_page == Some(page_index) {
                return Err(RasterError::Page {
                    index: page_index,
                    detail: "bitmap allocation failed".into(),
                });
            }
            std::thread::sleep(Duration::from_millis(20u64.saturating_sub(page_index as u64 * 5)));
            self.renders.fetch_add(1, Ordering::SeqCst);
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
                10 + page_index as u32,
                8,
                Rgb([255, 255, 255]),
            )))
        }
    }

    fn pdf(name: &str, pages: usize) -> UploadedFile {
        UploadedFile::new(
            name,
            "application/pdf",
            format!("%PDF-1.7 pages={pages}").into_bytes(),
        )
    }

    fn width_of(payload: &ImagePayload) -> u32 {
        image::load_from_memory(&payload.decode().unwrap())
            .unwrap()
            .width()
    }

    #[tokio::test]
    async fn image_passes_through_unchanged() {
        let raw = b"\x89PNG\r\n\x1a\nbytes".to_vec();
        let files = vec![UploadedFile::new("scan.png", "image/png", raw.clone())];
        let batch = normalize(&files, None, &ExtractionConfig::default())
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.as_slice()[0].mime_type, "image/png");
        assert_eq!(batch.as_slice()[0].decode().unwrap(), raw);
    }

    #[tokio::test]
    async fn pdf_pages_are_in_page_order() {
        let raster: Arc<dyn PageRasterizer> = Arc::new(FakeRasterizer::new());
        let files = vec![pdf("jan.pdf", 4)];
        let batch = normalize(&files, Some(raster), &ExtractionConfig::default())
            .await
            .unwrap();
        assert_eq!(batch.len(), 4);
        let widths: Vec<u32> = batch.iter().map(width_of).collect();
        assert_eq!(widths, vec![10, 11, 12, 13]);
        assert!(batch.iter().all(|p| p.mime_type == "image/jpeg"));
    }

    #[tokio::test]
    async fn per_file_counts_follow_selection() {
        let raster: Arc<dyn PageRasterizer> = Arc::new(FakeRasterizer::new());
        let files = vec![
            pdf("a.pdf", 2),
            UploadedFile::new("b.webp", "image/webp", b"RIFF....WEBP".to_vec()),
            pdf("c.pdf", 3),
        ];
        let n = normalize_detailed(&files, Some(raster), &ExtractionConfig::default())
            .await
            .unwrap();
        assert_eq!(n.per_file, vec![2, 1, 3]);
        assert_eq!(n.batch.as_slice()[2].mime_type, "image/webp");
    }

    #[tokio::test]
    async fn unsupported_type_aborts_before_rendering() {
        let raster = Arc::new(FakeRasterizer::new());
        let files = vec![
            pdf("a.pdf", 2),
            UploadedFile::new("notes.txt", "text/plain", b"hi".to_vec()),
        ];
        let err = normalize(
            &files,
            Some(raster.clone() as Arc<dyn PageRasterizer>),
            &ExtractionConfig::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ExtractionError::UnsupportedFileType { .. }));
        assert_eq!(raster.renders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_selection_and_zero_page_pdf_are_empty() {
        let cfg = ExtractionConfig::default();
        let err = normalize(&[], None, &cfg).await.unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyExtraction { files: 0 }));

        let raster: Arc<dyn PageRasterizer> = Arc::new(FakeRasterizer::new());
        let err = normalize(&[pdf("blank.pdf", 0)], Some(raster), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::EmptyExtraction { files: 1 }));
    }

    #[tokio::test]
    async fn pdf_without_rasterizer_is_unavailable() {
        let err = normalize(&[pdf("a.pdf", 1)], None, &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::RasterizerUnavailable(_)));
    }

    #[tokio::test]
    async fn failing_page_aborts_with_one_based_page() {
        let raster: Arc<dyn PageRasterizer> = Arc::new(FakeRasterizer {
            renders: AtomicUsize::new(0),
            fail_page: Some(1),
        });
        let err = normalize(&[pdf("jan.pdf", 3)], Some(raster), &ExtractionConfig::default())
            .await
            .unwrap_err();
        match err {
            ExtractionError::RasterisationFailed { file, page, .. } => {
                assert_eq!(file, "jan.pdf");
                assert_eq!(page, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn mislabelled_pdf_is_read_error() {
        let raster: Arc<dyn PageRasterizer> = Arc::new(FakeRasterizer::new());
        let files = vec![UploadedFile::new(
            "fake.pdf",
            "application/pdf",
            b"\x89PNG\r\n".to_vec(),
        )];
        let err = normalize(&files, Some(raster), &ExtractionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::FileReadError { .. }));
    }

    /// Counts whole-document renders; single-page rendering is never used.
    #[derive(Default)]
    struct DocumentCounter {
        documents: AtomicUsize,
    }

    impl PageRasterizer for DocumentCounter {
        fn page_count(&self, _document: &[u8]) -> Result<usize, RasterError> {
            unreachable!("the normalizer renders whole documents")
        }

        fn render_page(
            &self,
            _document: &[u8],
            _page_index: usize,
            _scale: f32,
        ) -> Result<DynamicImage, RasterError> {
            unreachable!("the normalizer renders whole documents")
        }

        fn render_pages(&self, document: &[u8], _scale: f32) -> Result<Vec<DynamicImage>, RasterError> {
            self.documents.fetch_add(1, Ordering::SeqCst);
            let pages = FakeRasterizer::new().page_count(document)?;
            Ok((0..pages)
                .map(|i| DynamicImage::ImageRgb8(RgbImage::from_pixel(10 + i as u32, 8, Rgb([0, 0, 0]))))
                .collect())
        }
    }

    #[tokio::test]
    async fn each_pdf_is_opened_once() {
        let counter = Arc::new(DocumentCounter::default());
        let files = vec![pdf("a.pdf", 5), pdf("b.pdf", 3)];
        let n = normalize_detailed(
            &files,
            Some(counter.clone() as Arc<dyn PageRasterizer>),
            &ExtractionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(counter.documents.load(Ordering::SeqCst), 2);
        assert_eq!(n.per_file, vec![5, 3]);
        let widths: Vec<u32> = n.batch.iter().map(width_of).collect();
        assert_eq!(widths, vec![10, 11, 12, 13, 14, 10, 11, 12]);
    }

    #[test]
    fn raster_errors_get_file_context() {
        let e = raster_error(
            "jan.pdf",
            RasterError::Document("not a PDF".into()),
        );
        assert!(e.to_string().contains("jan.pdf"));
        assert!(matches!(
            raster_error("x", RasterError::Unavailable("gone".into())),
            ExtractionError::RasterizerUnavailable(_)
        ));
    }
}
