//! Image encoding: `DynamicImage` → base64 JPEG wrapped in [`PageImage`].
//!
//! The extractor only needs to read two short strings off each page, so JPEG
//! at quality 80 is enough and keeps a 1.5× letter page near 200 KB instead
//! of the 1–2 MB a PNG would cost per request.

use crate::output::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::debug;

pub const JPEG_MIME: &str = "image/jpeg";

/// Encode a rasterised page as base64 JPEG at the given quality.
///
/// Alpha is dropped first: JPEG has no alpha channel and pdfium bitmaps are RGBA.
pub fn encode_page(
    page_index: usize,
    img: &DynamicImage,
    quality: u8,
) -> Result<PageImage, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Page {}: encoded {}x{} → {} bytes base64",
        page_index,
        rgb.width(),
        rgb.height(),
        b64.len()
    );

    Ok(PageImage {
        page_index,
        base64: b64,
        mime_type: JPEG_MIME,
        width: rgb.width(),
        height: rgb.height(),
    })
}

/// Wrap a page image for a multimodal chat request.
///
/// `detail: "high"` keeps small printed identifiers legible on
/// tile-based vision models.
pub fn to_image_data(image: &PageImage) -> ImageData {
    ImageData::new(image.base64.clone(), image.mime_type).with_detail("high")
}
