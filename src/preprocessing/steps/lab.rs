//! sRGB <-> CIE L*a*b* (D65) conversion.

use image::{GrayImage, Luma, Rgb, RgbImage};

const WHITE_X: f32 = 0.950_456;
const WHITE_Z: f32 = 1.088_754;
const EPSILON: f32 = 0.008_856;
const KAPPA: f32 = 903.3;

/// Lightness/chroma planes of an image.
///
/// Lightness is quantised to 8 bits (`L·255/100`) for histogram work; the
/// chroma planes keep full precision so they survive a round trip untouched.
pub struct LabPlanes {
    pub lightness: GrayImage,
    pub a: Vec<f32>,
    pub b: Vec<f32>,
}

pub fn split(image: &RgbImage) -> LabPlanes {
    let (width, height) = image.dimensions();
    let len = width as usize * height as usize;
    let mut lightness = GrayImage::new(width, height);
    let mut a = Vec::with_capacity(len);
    let mut b = Vec::with_capacity(len);

    for (x, y, pixel) in image.enumerate_pixels() {
        let [l, pa, pb] = rgb_to_lab(pixel.0);
        let quantised = (l * 255.0 / 100.0).round().clamp(0.0, 255.0) as u8;
        lightness.put_pixel(x, y, Luma([quantised]));
        a.push(pa);
        b.push(pb);
    }

    LabPlanes { lightness, a, b }
}

/// Rebuild an RGB image from (possibly modified) planes
pub fn merge(planes: &LabPlanes) -> RgbImage {
    let (width, height) = planes.lightness.dimensions();
    RgbImage::from_fn(width, height, |x, y| {
        let idx = y as usize * width as usize + x as usize;
        let l = planes.lightness.get_pixel(x, y).0[0] as f32 * 100.0 / 255.0;
        Rgb(lab_to_rgb([l, planes.a[idx], planes.b[idx]]))
    })
}

pub fn rgb_to_lab(rgb: [u8; 3]) -> [f32; 3] {
    let [r, g, b] = rgb.map(|c| srgb_to_linear(c as f32 / 255.0));

    let x = (0.412_453 * r + 0.357_580 * g + 0.180_423 * b) / WHITE_X;
    let y = 0.212_671 * r + 0.715_160 * g + 0.072_169 * b;
    let z = (0.019_334 * r + 0.119_193 * g + 0.950_227 * b) / WHITE_Z;

    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    let l = if y > EPSILON { 116.0 * fy - 16.0 } else { KAPPA * y };

    [l, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

pub fn lab_to_rgb(lab: [f32; 3]) -> [u8; 3] {
    let [l, a, b] = lab;
    let fy = (l + 16.0) / 116.0;
    let fx = fy + a / 500.0;
    let fz = fy - b / 200.0;

    let y = if l > KAPPA * EPSILON { fy.powi(3) } else { l / KAPPA };
    let x = lab_f_inv(fx) * WHITE_X;
    let z = lab_f_inv(fz) * WHITE_Z;

    let r = 3.240_479 * x - 1.537_150 * y - 0.498_535 * z;
    let g = -0.969_256 * x + 1.875_992 * y + 0.041_556 * z;
    let bl = 0.055_648 * x - 0.204_043 * y + 1.057_311 * z;

    [r, g, bl].map(|c| (linear_to_srgb(c) * 255.0).round().clamp(0.0, 255.0) as u8)
}

fn lab_f(t: f32) -> f32 {
    if t > EPSILON {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

fn lab_f_inv(f: f32) -> f32 {
    let cube = f.powi(3);
    if cube > EPSILON {
        cube
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.040_45 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f32) -> f32 {
    let c = c.clamp(0.0, 1.0);
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_and_black_lightness() {
        let white = rgb_to_lab([255, 255, 255]);
        let black = rgb_to_lab([0, 0, 0]);
        assert!((white[0] - 100.0).abs() < 0.05);
        assert!(white[1].abs() < 0.05 && white[2].abs() < 0.05);
        assert!(black[0].abs() < 1e-4);
    }

    #[test]
    fn test_round_trip_is_close() {
        for rgb in [[200, 30, 40], [12, 180, 90], [90, 90, 250], [128, 128, 128]] {
            let back = lab_to_rgb(rgb_to_lab(rgb));
            for (orig, got) in rgb.iter().zip(back.iter()) {
                assert!((*orig as i32 - *got as i32).abs() <= 1, "{:?} -> {:?}", rgb, back);
            }
        }
    }

    #[test]
    fn test_split_merge_round_trip_within_quantisation() {
        let img = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
        let merged = merge(&split(&img));
        for (orig, got) in img.pixels().zip(merged.pixels()) {
            for c in 0..3 {
                assert!((orig.0[c] as i32 - got.0[c] as i32).abs() <= 4);
            }
        }
    }
}
