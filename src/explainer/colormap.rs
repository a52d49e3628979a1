// Heatmap coloring and blending
use image::{Rgb, RgbImage};

/// Weight of the original image in the blended overlay
pub const ORIGINAL_WEIGHT: f32 = 0.6;
/// Weight of the colored heatmap in the blended overlay
pub const HEATMAP_WEIGHT: f32 = 0.4;

/// Map an importance value in [0, 1] onto the jet palette (blue -> cyan -> yellow -> red)
pub fn jet(value: f32) -> [u8; 3] {
    let v = if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let channel = |center: f32| {
        let intensity = (1.5 - (4.0 * v - center).abs()).clamp(0.0, 1.0);
        (intensity * 255.0).round() as u8
    };
    [channel(3.0), channel(2.0), channel(1.0)]
}

/// Blend `original` with the jet-colored `heatmap` of the same dimensions
///
/// `heatmap` is row-major with one value per pixel.
pub fn blend(original: &RgbImage, heatmap: &[f32]) -> Option<RgbImage> {
    let (width, height) = original.dimensions();
    if heatmap.len() != (width as usize) * (height as usize) {
        return None;
    }

    let mut out = RgbImage::new(width, height);
    for ((x, y, pixel), value) in original.enumerate_pixels().zip(heatmap) {
        let heat = jet(*value);
        let mut mixed = [0u8; 3];
        for c in 0..3 {
            let v = ORIGINAL_WEIGHT * f32::from(pixel[c]) + HEATMAP_WEIGHT * f32::from(heat[c]);
            mixed[c] = v.round().clamp(0.0, 255.0) as u8;
        }
        out.put_pixel(x, y, Rgb(mixed));
    }
    Some(out)
}
