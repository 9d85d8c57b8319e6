//! Page preparation for the vision recognition backend: scan →
//! 8-bit grayscale, bounded size → base64 PNG wrapped in `ImageData`.
//!
//! Patta scans carry no information in colour, and the provider APIs shrink
//! anything past roughly 2k pixels on the long edge themselves.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use std::io::Cursor;
use tracing::debug;

/// Longest edge sent to a vision model, in pixels.
pub const MAX_VISION_EDGE: u32 = 2048;

/// Grayscale `img` and shrink it so neither side exceeds `max_edge`.
/// Aspect ratio is preserved; images already within bounds are not resampled.
pub fn prepare_scan(img: &DynamicImage, max_edge: u32) -> GrayImage {
    let gray = img.to_luma8();
    let (w, h) = gray.dimensions();
    let longest = w.max(h);
    if longest <= max_edge || max_edge == 0 {
        return gray;
    }
    let scale = max_edge as f64 / longest as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(&gray, nw, nh, FilterType::Triangle)
}

/// Encode a page for a vision model as a base64 grayscale PNG with
/// `detail: "high"`.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let prepared = prepare_scan(img, MAX_VISION_EDGE);
    let (w, h) = prepared.dimensions();

    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(prepared).write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} page ({}x{} grayscale) → {} bytes base64",
        img.width(),
        img.height(),
        w,
        h,
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}
