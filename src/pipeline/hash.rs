//! Perceptual image hashing for the result cache.
//!
//! Fingerprints are stable under resizing, mild compression, and format
//! changes, which is what makes them usable as cache keys for "the same
//! photo analyzed twice". Pure, deterministic functions only.

/// Compute the perceptual hash of an image as a base64 string.
///
/// DoubleGradient over a 16x16 luminance reduction (512-bit hash) — the
/// gradient encoding is what survives re-encoding and resampling.
pub fn compute_image_hash(img: &image::DynamicImage) -> String {
    let hasher = img_hash::HasherConfig::new()
        .hash_alg(img_hash::HashAlg::DoubleGradient)
        .hash_size(16, 16)
        .to_hasher();

    hasher.hash_image(img).to_base64()
}

/// Normalized similarity (0.0–1.0) between two fingerprints, from the
/// Hamming distance over the hash bits. `None` if either string is not a
/// valid hash.
pub fn hash_similarity(hash_a: &str, hash_b: &str) -> Option<f64> {
    let a = img_hash::ImageHash::<Vec<u8>>::from_base64(hash_a).ok()?;
    let b = img_hash::ImageHash::<Vec<u8>>::from_base64(hash_b).ok()?;

    let distance = a.dist(&b);
    let max_bits = (a.as_bytes().len() * 8).max(1) as f64;
    Some(1.0 - (distance as f64 / max_bits))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HASH_SIMILARITY_THRESHOLD;
    use image::{DynamicImage, Rgb, RgbImage};

    /// Smooth radial gradient — structured content that survives
    /// re-encoding and mild resampling.
    fn radial_gradient(size: u32) -> DynamicImage {
        let center = size as f32 / 2.0;
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, y| {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let d = (dx * dx + dy * dy).sqrt() / center;
            let v = (255.0 * (1.0 - d.min(1.0))) as u8;
            Rgb([v, v / 2, 64])
        }))
    }

    fn horizontal_stripes(size: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |_, y| {
            if (y / 40) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    fn vertical_stripes(size: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(size, size, |x, _| {
            if (x / 40) % 2 == 0 {
                Rgb([255, 255, 255])
            } else {
                Rgb([0, 0, 0])
            }
        }))
    }

    #[test]
    fn hash_is_deterministic() {
        let img = radial_gradient(320);
        assert_eq!(compute_image_hash(&img), compute_image_hash(&img));
    }

    #[test]
    fn identical_images_have_perfect_similarity() {
        let hash = compute_image_hash(&radial_gradient(320));
        let similarity = hash_similarity(&hash, &hash).unwrap();
        assert!((similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn jpeg_reencode_stays_above_threshold() {
        let img = radial_gradient(320);
        let mut jpeg = std::io::Cursor::new(Vec::new());
        img.write_to(&mut jpeg, image::ImageOutputFormat::Jpeg(85))
            .unwrap();
        let reencoded = image::load_from_memory(&jpeg.into_inner()).unwrap();

        let a = compute_image_hash(&img);
        let b = compute_image_hash(&reencoded);
        let similarity = hash_similarity(&a, &b).unwrap();
        assert!(
            similarity >= HASH_SIMILARITY_THRESHOLD,
            "similarity after re-encode: {similarity}"
        );
    }

    #[test]
    fn mild_downscale_stays_above_threshold() {
        let img = radial_gradient(320);
        let resized = img.resize_exact(288, 288, image::imageops::FilterType::CatmullRom);

        let a = compute_image_hash(&img);
        let b = compute_image_hash(&resized);
        let similarity = hash_similarity(&a, &b).unwrap();
        assert!(
            similarity >= HASH_SIMILARITY_THRESHOLD,
            "similarity after downscale: {similarity}"
        );
    }

    #[test]
    fn distinct_content_scores_below_threshold() {
        let a = compute_image_hash(&horizontal_stripes(320));
        let b = compute_image_hash(&vertical_stripes(320));
        let similarity = hash_similarity(&a, &b).unwrap();
        assert!(
            similarity < HASH_SIMILARITY_THRESHOLD,
            "distinct images scored {similarity}"
        );
    }

    #[test]
    fn invalid_base64_yields_none() {
        assert!(hash_similarity("not-a-hash!!", "also-not").is_none());
    }
}
