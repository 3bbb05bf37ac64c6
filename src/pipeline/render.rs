//! PDF rasterisation: render statement pages to `DynamicImage`.
//!
//! The pipeline only talks to the [`PageRasterizer`] trait. [`PdfiumRasterizer`]
//! is the production implementation; tests substitute a synthetic one so the
//! normalizer can be exercised without the pdfium shared library.
//!
//! All methods are blocking. Callers run them inside
//! `tokio::task::spawn_blocking`: pdfium keeps thread-local state and
//! rendering is CPU-heavy, so it must stay off the async worker threads.
//! With the `thread_safe` feature every bound `Pdfium` holds a process-wide
//! lock until dropped, so [`PdfiumRasterizer::render_pages`] binds and opens
//! the document once for all of its pages.
//!
//! ## Library lookup
//!
//! 1. `PDFIUM_LIB_PATH` (file or directory)
//! 2. `libpdfium` in the current working directory
//! 3. the system library search path

use crate::error::RasterError;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the pdfium shared library.
pub const PDFIUM_LIB_PATH_VAR: &str = "PDFIUM_LIB_PATH";

/// Turns PDF bytes into page images.
pub trait PageRasterizer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, document: &[u8]) -> Result<usize, RasterError>;

    /// Render one page (0-based) at `scale` × its native size.
    fn render_page(
        &self,
        document: &[u8],
        page_index: usize,
        scale: f32,
    ) -> Result<DynamicImage, RasterError>;

    /// Render every page in order.
    ///
    /// The default goes through [`page_count`](Self::page_count) and
    /// [`render_page`](Self::render_page); implementations that pay for
    /// opening a document should override it.
    fn render_pages(&self, document: &[u8], scale: f32) -> Result<Vec<DynamicImage>, RasterError> {
        (0..self.page_count(document)?)
            .map(|page_index| self.render_page(document, page_index, scale))
            .collect()
    }
}

/// [`PageRasterizer`] backed by the pdfium C library.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    library_path: Option<PathBuf>,
}

impl PdfiumRasterizer {
    /// Use the library named by `PDFIUM_LIB_PATH`, if set.
    pub fn from_env() -> Self {
        Self {
            library_path: std::env::var_os(PDFIUM_LIB_PATH_VAR)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
        }
    }

    /// Use an explicit library file or directory.
    pub fn with_library_path(path: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(path.into()),
        }
    }

    /// Check that the library can be loaded, without opening a document.
    pub fn check_library(&self) -> Result<(), RasterError> {
        self.bind().map(|_| ())
    }

    fn bind(&self) -> Result<Pdfium, RasterError> {
        let bindings = match &self.library_path {
            Some(path) => Pdfium::bind_to_library(library_file(path)).map_err(|e| {
                RasterError::Unavailable(format!("{}: {e}", path.display()))
            })?,
            None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
                .or_else(|_| Pdfium::bind_to_system_library())
                .map_err(|e| RasterError::Unavailable(e.to_string()))?,
        };
        Ok(Pdfium::new(bindings))
    }
}

/// A directory means "the platform library inside it".
fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(path)
    } else {
        path.to_path_buf()
    }
}

/// Open `document` with an already bound library.
fn load_document<'a>(pdfium: &'a Pdfium, document: &'a [u8]) -> Result<PdfDocument<'a>, RasterError> {
    pdfium
        .load_pdf_from_byte_slice(document, None)
        .map_err(|e| RasterError::Document(format!("{e:?}")))
}

/// Render one page of an open document.
fn render_loaded_page(
    doc: &PdfDocument<'_>,
    page_index: usize,
    render_config: &PdfRenderConfig,
) -> Result<DynamicImage, RasterError> {
    let page_err = |detail: String| RasterError::Page {
        index: page_index,
        detail,
    };

    let index = u16::try_from(page_index).map_err(|_| page_err("page index out of range".into()))?;
    let page = doc.pages().get(index).map_err(|e| page_err(format!("{e:?}")))?;
    let bitmap = page
        .render_with_config(render_config)
        .map_err(|e| page_err(format!("{e:?}")))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page {} → {}x{} px",
        page_index + 1,
        image.width(),
        image.height()
    );
    Ok(image)
}

impl PageRasterizer for PdfiumRasterizer {
    fn page_count(&self, document: &[u8]) -> Result<usize, RasterError> {
        let pdfium = self.bind()?;
        let doc = load_document(&pdfium, document)?;
        Ok(doc.pages().len() as usize)
    }

    fn render_page(
        &self,
        document: &[u8],
        page_index: usize,
        scale: f32,
    ) -> Result<DynamicImage, RasterError> {
        let pdfium = self.bind()?;
        let doc = load_document(&pdfium, document)?;
        render_loaded_page(&doc, page_index, &PdfRenderConfig::new().scale_page_by_factor(scale))
    }

    fn render_pages(&self, document: &[u8], scale: f32) -> Result<Vec<DynamicImage>, RasterError> {
        let pdfium = self.bind()?;
        let doc = load_document(&pdfium, document)?;
        let total = doc.pages().len() as usize;
        debug!("PDF loaded: {} page(s), rendering at {}×", total, scale);

        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
        (0..total)
            .map(|page_index| render_loaded_page(&doc, page_index, &render_config))
            .collect()
    }
}
