//! Frame preprocessing before text detection: downscale by a configurable
//! factor, optionally grayscale + histogram equalization. Smaller inputs make
//! detection cheaper; equalization lifts low-contrast subtitles.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};

/// Prepare one frame for the OCR capability.
///
/// `scale_percent` resizes both dimensions to that percentage of the
/// original (100 leaves them untouched, 0 is treated as 100). With `enhance`
/// set the result is single-channel with its histogram equalized.
pub fn prepare(image: &DynamicImage, scale_percent: u32, enhance: bool) -> DynamicImage {
    let scaled = scale(image, scale_percent);
    if !enhance {
        return scaled;
    }
    let mut gray = scaled.to_luma8();
    equalize_histogram(&mut gray);
    DynamicImage::ImageLuma8(gray)
}

fn scale(image: &DynamicImage, scale_percent: u32) -> DynamicImage {
    if scale_percent == 0 || scale_percent == 100 {
        return image.clone();
    }
    let width = (image.width() * scale_percent / 100).max(1);
    let height = (image.height() * scale_percent / 100).max(1);
    image.resize_exact(width, height, FilterType::Triangle)
}

/// In-place histogram equalization over an 8-bit grayscale buffer.
///
/// Standard CDF remap: each level maps to
/// `(cdf(level) - cdf_min) / (pixels - cdf_min) * 255`. A flat image (every
/// pixel the same level) is left untouched since there is no contrast to
/// stretch.
fn equalize_histogram(gray: &mut GrayImage) {
    let total = (gray.width() as u64) * (gray.height() as u64);
    if total == 0 {
        return;
    }

    let mut histogram = [0u64; 256];
    for pixel in gray.pixels() {
        histogram[pixel[0] as usize] += 1;
    }

    let mut cdf = [0u64; 256];
    let mut running = 0u64;
    for (level, count) in histogram.iter().enumerate() {
        running += count;
        cdf[level] = running;
    }

    let cdf_min = cdf
        .iter()
        .copied()
        .find(|&c| c > 0)
        .unwrap_or(0);
    if total == cdf_min {
        return;
    }

    let denominator = (total - cdf_min) as f64;
    let mut lut = [0u8; 256];
    for level in 0..256 {
        let scaled = ((cdf[level].saturating_sub(cdf_min)) as f64 / denominator) * 255.0;
        lut[level] = scaled.round().clamp(0.0, 255.0) as u8;
    }

    for pixel in gray.pixels_mut() {
        pixel[0] = lut[pixel[0] as usize];
    }
}
