//! Image encoding: `DynamicImage` → PNG bytes → base64 `ImageData`.
//!
//! Rasters and crops are written to disk as PNG and the same bytes are sent
//! to vision models. PNG keeps rendered text crisp; JPEG artefacts on small
//! table digits are exactly what the vision tiers cannot afford.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// Resolution hint passed along with an image.
///
/// `High` lets GPT-4-class models tile the image so small digits stay legible;
/// `Low` forces a single overview tile, which is enough for relevance scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageDetail {
    #[default]
    High,
    Low,
}

impl ImageDetail {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageDetail::High => "high",
            ImageDetail::Low => "low",
        }
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

/// Wrap PNG bytes as a base64 image attachment.
pub fn image_data(png: &[u8], detail: ImageDetail) -> ImageData {
    let b64 = STANDARD.encode(png);
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), detail.as_str());
    ImageData::new(b64, "image/png").with_detail(detail.as_str())
}
