use image::{GrayImage, Luma, RgbImage};

/// Luma-weighted grayscale conversion (BT.601 weights)
///
/// The `image` crate's own conversion uses BT.709 weights; scanners and the
/// rest of the document tooling expect the 0.299/0.587/0.114 split.
pub fn apply(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}
