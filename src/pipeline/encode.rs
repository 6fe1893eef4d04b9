//! Image encoding: RGBA page image → base64 PNG data URL.
//!
//! ## Why PNG?
//! Lossless compression preserves text crispness. JPEG artefacts on rendered
//! text confuse vision models and degrade transcription accuracy.
//!
//! ## Why a data URL?
//! The chat-completions image format takes `image_url.url`, and a
//! `data:image/png;base64,…` URL keeps the page self-contained in the request
//! with no intermediate object storage.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::RgbaImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a PNG data URL ready for the vision API.
pub fn encode_page(img: &RgbaImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(png_bytes = buf.len(), b64_len = b64.len(), "encoded page image");

    Ok(format!("data:image/png;base64,{b64}"))
}
