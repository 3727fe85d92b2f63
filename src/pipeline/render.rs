//! PDF rasterisation: turn document bytes into ordered [`PageImage`]s.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory bounded and matching the
//! image-size sweet spot for vision models (around 1,024–2,048 px).

use crate::config::{ConversionConfig, PageSelection};
use crate::error::PipelineError;
use crate::output::PageImage;
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use tracing::{debug, info};

/// Environment variable naming an explicit pdfium shared library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Pages produced from one document.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// Total pages in the source document, selected or not.
    pub page_count: usize,
    /// Selected pages in document order.
    pub pages: Vec<PageImage>,
}

/// Converts a document into page images.
///
/// The batch core only ever sees the resulting `Vec<PageImage>`; anything
/// that can produce that list (a fixture, another rasteriser) can stand in
/// for pdfium.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// Rasterise the pages chosen by `selection`.
    ///
    /// Pages come back in ascending page order with 1-based, unique
    /// `page_number`s.
    async fn extract_pages(
        &self,
        document: Vec<u8>,
        selection: &PageSelection,
    ) -> Result<RenderedDocument, PipelineError>;
}

/// [`PageSource`] backed by the pdfium library.
#[derive(Debug, Clone)]
pub struct PdfiumPageSource {
    dpi: u32,
    max_rendered_pixels: u32,
    password: Option<String>,
}

impl PdfiumPageSource {
    pub fn new(config: &ConversionConfig) -> Self {
        Self {
            dpi: config.dpi,
            max_rendered_pixels: config.max_rendered_pixels,
            password: config.password.clone(),
        }
    }
}

#[async_trait]
impl PageSource for PdfiumPageSource {
    async fn extract_pages(
        &self,
        document: Vec<u8>,
        selection: &PageSelection,
    ) -> Result<RenderedDocument, PipelineError> {
        let source = self.clone();
        let selection = selection.clone();

        tokio::task::spawn_blocking(move || source.render_blocking(&document, &selection))
            .await
            .map_err(|e| PipelineError::Internal(format!("Render task panicked: {}", e)))?
    }
}

impl PdfiumPageSource {
    fn render_blocking(
        &self,
        bytes: &[u8],
        selection: &PageSelection,
    ) -> Result<RenderedDocument, PipelineError> {
        let pdfium = bind_pdfium()?;
        let password = self.password.as_deref();

        let document = pdfium
            .load_pdf_from_byte_slice(bytes, password)
            .map_err(|e| map_load_error(format!("{:?}", e), password.is_some()))?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        info!("PDF loaded: {} pages", page_count);
        if page_count == 0 {
            return Err(PipelineError::NoPages);
        }

        let indices = selection.to_indices(page_count);
        if indices.is_empty() {
            return Err(PipelineError::PageOutOfRange {
                page: selection.first_requested(),
                total: page_count,
            });
        }

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.dpi as f32 / 72.0)
            .set_maximum_width(self.max_rendered_pixels as i32)
            .set_maximum_height(self.max_rendered_pixels as i32);

        let mut images = Vec::with_capacity(indices.len());
        for idx in indices {
            let page_number = idx + 1;
            let rasterisation_failed = |detail: String| PipelineError::RasterisationFailed {
                page: page_number,
                detail,
            };

            let page = pages
                .get(idx as u16)
                .map_err(|e| rasterisation_failed(format!("{:?}", e)))?;
            let image = page
                .render_with_config(&render_config)
                .map_err(|e| rasterisation_failed(format!("{:?}", e)))?
                .as_image();
            let png = encode::encode_page(&image).map_err(|e| rasterisation_failed(e.to_string()))?;

            debug!(
                "Rendered page {} → {}x{} px, {} bytes PNG",
                page_number,
                image.width(),
                image.height(),
                png.len()
            );
            images.push(PageImage::png(page_number, image.width(), image.height(), png));
        }

        Ok(RenderedDocument {
            page_count,
            pages: images,
        })
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Pdfium, PipelineError> {
    let bindings = match std::env::var(PDFIUM_LIB_PATH_ENV) {
        Ok(path) if !path.is_empty() => {
            debug!("Binding pdfium from {}", path);
            Pdfium::bind_to_library(path)
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| {
        PipelineError::PdfiumBindingFailed(format!(
            "{:?}. Install pdfium or set {} to the library path.",
            e, PDFIUM_LIB_PATH_ENV
        ))
    })?;
    Ok(Pdfium::new(bindings))
}

/// pdfium reports password problems as a generic load error; tell them apart
/// by message and by whether a password was supplied.
fn map_load_error(detail: String, had_password: bool) -> PipelineError {
    if detail.to_lowercase().contains("password") {
        if had_password {
            PipelineError::WrongPassword
        } else {
            PipelineError::PasswordRequired
        }
    } else {
        PipelineError::InvalidDocument { detail }
    }
}
