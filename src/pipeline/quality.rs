//! Image quality gate — rejects photos that are too dark, too blurry, or
//! too small before any model work is performed. Halting here avoids
//! wasted inference and nonsensical confidence readings on unusable input.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ──────────────────────────────────────────────
// Constants
// ──────────────────────────────────────────────

/// Maximum input image size (in bytes) before rejecting.
/// Prevents OOM on corrupt/adversarial files.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Minimum valid image size in bytes (smallest valid PNG is ~67 bytes).
const MIN_IMAGE_BYTES: usize = 67;

/// Smallest acceptable image dimension. The classifier input is 224px;
/// anything smaller is upscaled noise.
const MIN_DIMENSION: u32 = 224;

/// Mean luminance below this reads as underexposed.
const MIN_BRIGHTNESS: f32 = 40.0;

/// Mean luminance above this reads as blown out.
const MAX_BRIGHTNESS: f32 = 235.0;

/// Laplacian variance below this reads as blurry. Leaf texture on an
/// in-focus phone photo sits well above this.
const SHARPNESS_THRESHOLD: f32 = 60.0;

/// Sharpness at which the sharpness component of the score saturates.
const SHARPNESS_SCORE_CEILING: f32 = 300.0;

// ──────────────────────────────────────────────
// Types
// ──────────────────────────────────────────────

/// A specific, user-actionable problem with the input photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityIssue {
    /// The bytes could not be decoded as an image at all.
    Unreadable,
    TooDark,
    Overexposed,
    TooBlurry,
    ResolutionTooLow,
}

/// Outcome of the quality gate. `is_valid` holds exactly when `issues`
/// is empty; `score` is a composite 0–1 quality estimate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub is_valid: bool,
    pub score: f32,
    pub issues: Vec<QualityIssue>,
    pub brightness: f32,
    pub sharpness: f32,
    pub width: u32,
    pub height: u32,
}

// ──────────────────────────────────────────────
// Decoding
// ──────────────────────────────────────────────

/// Decode raw photo bytes, applying EXIF orientation correction.
///
/// Phone photos embed rotation in EXIF tag 0x0112 — without correction,
/// portrait shots reach the detector sideways.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, String> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(format!("Image too small to be valid: {} bytes", bytes.len()));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(format!("Image exceeds size limit: {} bytes", bytes.len()));
    }

    let img = image::load_from_memory(bytes).map_err(|e| format!("Failed to decode image: {e}"))?;

    let orientation = read_exif_orientation(bytes);
    Ok(apply_orientation(img, orientation))
}

/// Read EXIF orientation tag from raw image bytes.
/// Returns 1 (normal) if no EXIF data or tag not present.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply EXIF orientation transform to a `DynamicImage`.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Encode an image as PNG bytes for the external vision service.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, String> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageOutputFormat::Png)
        .map_err(|e| format!("PNG encoding failed: {e}"))?;
    Ok(buf.into_inner())
}

// ──────────────────────────────────────────────
// Assessment
// ──────────────────────────────────────────────

/// Assess photo quality. Pure read-only analysis; the caller decides to
/// halt on `!is_valid`.
pub fn assess_quality(image: &RgbImage) -> QualityReport {
    let (width, height) = (image.width(), image.height());
    let gray = rgb_to_gray(image);

    let brightness = mean_luminance(&gray);
    let sharpness = compute_laplacian_variance(&gray);

    let mut issues = Vec::new();
    if width < MIN_DIMENSION || height < MIN_DIMENSION {
        issues.push(QualityIssue::ResolutionTooLow);
    }
    if brightness < MIN_BRIGHTNESS {
        issues.push(QualityIssue::TooDark);
    } else if brightness > MAX_BRIGHTNESS {
        issues.push(QualityIssue::Overexposed);
    }
    if sharpness < SHARPNESS_THRESHOLD {
        issues.push(QualityIssue::TooBlurry);
    }

    let score = composite_score(brightness, sharpness, width.min(height));

    debug!(
        brightness,
        sharpness,
        width,
        height,
        score,
        issues = issues.len(),
        "Image quality assessed"
    );

    QualityReport {
        is_valid: issues.is_empty(),
        score,
        issues,
        brightness,
        sharpness,
        width,
        height,
    }
}

/// Composite 0–1 quality score: exposure 40%, sharpness 40%, resolution 20%.
fn composite_score(brightness: f32, sharpness: f32, min_dimension: u32) -> f32 {
    // Exposure: 1.0 inside the comfortable band, linear falloff outside
    let exposure = if brightness < MIN_BRIGHTNESS {
        brightness / MIN_BRIGHTNESS
    } else if brightness > MAX_BRIGHTNESS {
        ((255.0 - brightness) / (255.0 - MAX_BRIGHTNESS)).max(0.0)
    } else {
        1.0
    };

    let sharp = (sharpness / SHARPNESS_SCORE_CEILING).min(1.0);
    let resolution = (min_dimension as f32 / MIN_DIMENSION as f32).min(1.0);

    0.4 * exposure + 0.4 * sharp + 0.2 * resolution
}

/// Convert RGB image to grayscale using ITU-R BT.601 luminance.
pub fn rgb_to_gray(rgb: &RgbImage) -> GrayImage {
    let (w, h) = (rgb.width(), rgb.height());
    let mut gray = GrayImage::new(w, h);
    for y in 0..h {
        for x in 0..w {
            let p = rgb.get_pixel(x, y);
            let luma =
                (0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32) as u8;
            gray.put_pixel(x, y, Luma([luma]));
        }
    }
    gray
}

fn mean_luminance(img: &GrayImage) -> f32 {
    let count = (img.width() as u64) * (img.height() as u64);
    if count == 0 {
        return 0.0;
    }
    let sum: u64 = img.pixels().map(|p| p.0[0] as u64).sum();
    sum as f32 / count as f32
}

/// Compute Laplacian variance — the standard blur metric.
/// Higher variance = sharper image.
///
/// Uses a 3x3 Laplacian kernel: `[0,1,0; 1,-4,1; 0,1,0]`.
pub fn compute_laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = (img.width() as i32, img.height() as i32);
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let center = img.get_pixel(x as u32, y as u32).0[0] as f64;
            let top = img.get_pixel(x as u32, (y - 1) as u32).0[0] as f64;
            let bottom = img.get_pixel(x as u32, (y + 1) as u32).0[0] as f64;
            let left = img.get_pixel((x - 1) as u32, y as u32).0[0] as f64;
            let right = img.get_pixel((x + 1) as u32, y as u32).0[0] as f64;

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0) as f32
}
