use gestures::{dataset::ImageStore, labels::LabelRegistry};
use image::{DynamicImage, Rgb, RgbImage};

/// Solid image whose colour encodes `seed`.
pub fn solid(seed: u8) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([seed, 255 - seed, seed / 2])))
}

/// Red, green, blue and black quadrants clockwise from the top left.
pub fn quadrants() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(16, 16, |x, y| match (x < 8, y < 8) {
        (true, true) => Rgb([255, 0, 0]),
        (false, true) => Rgb([0, 255, 0]),
        (false, false) => Rgb([0, 0, 255]),
        (true, false) => Rgb([0, 0, 0]),
    }))
}

/// Add `count` images of `label`, panicking on failure.
pub fn add_many(store: &mut ImageStore, labels: &LabelRegistry, label: &str, count: usize) {
    for idx in 0..count {
        store
            .add(labels, &solid((idx as u8).wrapping_mul(13)), label)
            .expect("add image");
    }
}
