//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! Pages are PNG-encoded once, right after rasterisation, so a
//! [`PageImage`] is a self-contained byte payload that can be retried any
//! number of times without touching pdfium again. Lossless PNG keeps glyph
//! edges crisp; JPEG artefacts on small print degrade transcription.

use crate::output::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as PNG bytes.
pub fn encode_page(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap a page image as a base64 attachment for the multimodal API.
///
/// `detail: "high"` lets GPT-4-class models tile the full image instead of
/// a single downscaled overview, which loses fine print and small tables.
pub fn to_image_data(page: &PageImage) -> ImageData {
    let b64 = STANDARD.encode(&page.data);
    debug!(
        "Page {}: {} bytes → {} bytes base64",
        page.page_number,
        page.data.len(),
        b64.len()
    );
    ImageData::new(b64, page.mime_type.as_str()).with_detail("high")
}
