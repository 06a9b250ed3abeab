//! Deterministic statistical image features.
//!
//! Used when no feature model can serve a request. The output depends only on
//! the canonical pixels, so the same image always yields the same vector.

use image::RgbImage;

/// Width of the statistical feature vector.
pub const STATISTICAL_DIMENSIONS: usize = 10;

/// Compute the statistical feature vector of a canonical image.
///
/// All channel values are scaled to [0, 1]. Layout:
///
/// | index | feature |
/// |---|---|
/// | 0..=2 | mean red, green, blue |
/// | 3 | brightness (mean over all channels) |
/// | 4 | texture: standard deviation of per-pixel gray around brightness |
/// | 5 | \|red - green\| |
/// | 6 | \|green - blue\| |
/// | 7 | \|red - blue\| |
/// | 8 | color balance, (red + green + blue) / 3 |
/// | 9 | dominant channel, max of the channel means |
pub fn statistical_features(image: &RgbImage) -> Vec<f32> {
    let pixel_count = (image.width() as usize * image.height() as usize).max(1) as f64;

    let (mut r_sum, mut g_sum, mut b_sum) = (0f64, 0f64, 0f64);
    for pixel in image.pixels() {
        r_sum += pixel[0] as f64 / 255.0;
        g_sum += pixel[1] as f64 / 255.0;
        b_sum += pixel[2] as f64 / 255.0;
    }

    let r = r_sum / pixel_count;
    let g = g_sum / pixel_count;
    let b = b_sum / pixel_count;
    let brightness = (r_sum + g_sum + b_sum) / (pixel_count * 3.0);

    let variance = image
        .pixels()
        .map(|p| {
            let gray = (p[0] as f64 + p[1] as f64 + p[2] as f64) / (3.0 * 255.0);
            (gray - brightness).powi(2)
        })
        .sum::<f64>()
        / pixel_count;

    let features = [
        r,
        g,
        b,
        brightness,
        variance.sqrt(),
        (r - g).abs(),
        (g - b).abs(),
        (r - b).abs(),
        (r + g + b) / 3.0,
        r.max(g).max(b),
    ];

    features.iter().map(|&v| v as f32).collect()
}
