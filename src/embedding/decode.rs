//! Image decoding and canonicalization.
//!
//! Every extraction path works on the same canonical image: decoded from any
//! format the `image` crate supports, resized (bilinear) to 224x224, RGB8.

use image::{imageops::FilterType, ImageFormat, RgbImage};

use super::ExtractionError;

/// Width and height of the canonical image.
pub const CANONICAL_SIZE: u32 = 224;

/// Decode raw bytes into the canonical 224x224 RGB image.
pub fn decode_canonical(data: &[u8]) -> Result<RgbImage, ExtractionError> {
    if data.is_empty() {
        return Err(ExtractionError::DecodeFailed("empty image data".to_string()));
    }

    // reject known non-image containers (HTML error pages, PDFs)
    if let Some(kind) = infer::get(data) {
        if kind.matcher_type() != infer::MatcherType::Image {
            return Err(ExtractionError::DecodeFailed(format!(
                "unsupported content type {}",
                kind.mime_type()
            )));
        }
    }

    let img = image::load_from_memory(data)
        .map_err(|e| ExtractionError::DecodeFailed(e.to_string()))?;

    Ok(img
        .resize_exact(CANONICAL_SIZE, CANONICAL_SIZE, FilterType::Triangle)
        .to_rgb8())
}

/// Encode an image as PNG bytes.
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buf);
    image.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(buf)
}
