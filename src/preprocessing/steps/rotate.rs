use image::{Rgb, RgbImage};

/// Bicubic kernel sharpness, matching the common document-imaging choice
const CUBIC_A: f64 = -0.75;

/// 2x3 affine matrix mapping source coordinates to destination coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationMatrix {
    pub m: [[f64; 3]; 2],
}

impl RotationMatrix {
    /// Rotation by `degrees` about `center` at unit scale.
    ///
    /// Positive angles turn the content counter-clockwise on screen.
    pub fn about(center: (f64, f64), degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let (cx, cy) = center;
        Self {
            m: [
                [cos, sin, (1.0 - cos) * cx - sin * cy],
                [-sin, cos, sin * cx + (1.0 - cos) * cy],
            ],
        }
    }

    /// Rotation about the pixel centre of a `width`x`height` canvas
    pub fn for_canvas(width: u32, height: u32, degrees: f64) -> Self {
        Self::about(((width / 2) as f64, (height / 2) as f64), degrees)
    }

    pub fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b] = self.m;
        (
            a[0] * x + a[1] * y + a[2],
            b[0] * x + b[1] * y + b[2],
        )
    }

    /// Inverse of the affine map; `None` when the linear part is singular
    pub fn invert(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.m;
        let det = a * d - b * c;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);
        Some(Self {
            m: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

/// Rotate `image` by `degrees` about its centre, keeping the canvas size.
///
/// Each destination pixel is pulled from the source through the inverse
/// matrix with bicubic interpolation. Source reads outside the canvas clamp
/// to the nearest edge pixel, so uncovered corners repeat the border colour.
pub fn apply(image: &RgbImage, degrees: f64) -> RgbImage {
    if degrees == 0.0 {
        return image.clone();
    }

    let (width, height) = image.dimensions();
    let forward = RotationMatrix::for_canvas(width, height, degrees);
    // A pure rotation always has determinant 1
    let inverse = match forward.invert() {
        Some(inverse) => inverse,
        None => return image.clone(),
    };

    RgbImage::from_fn(width, height, |x, y| {
        let (sx, sy) = inverse.apply(x as f64, y as f64);
        sample_bicubic(image, sx, sy)
    })
}

fn sample_bicubic(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = (image.width() as i64, image.height() as i64);
    let x0 = x.floor();
    let y0 = y.floor();
    let wx = cubic_weights(x - x0);
    let wy = cubic_weights(y - y0);
    let (x0, y0) = (x0 as i64, y0 as i64);

    let mut acc = [0.0f64; 3];
    for (j, wyj) in wy.iter().enumerate() {
        let sy = (y0 - 1 + j as i64).clamp(0, height - 1) as u32;
        for (i, wxi) in wx.iter().enumerate() {
            let sx = (x0 - 1 + i as i64).clamp(0, width - 1) as u32;
            let pixel = image.get_pixel(sx, sy).0;
            let w = wxi * wyj;
            for (channel, value) in acc.iter_mut().zip(pixel) {
                *channel += w * value as f64;
            }
        }
    }

    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

/// Weights for the four taps at offsets -1, 0, 1, 2 around the sample point
fn cubic_weights(t: f64) -> [f64; 4] {
    let a = CUBIC_A;
    let w0 = ((a * (t + 1.0) - 5.0 * a) * (t + 1.0) + 8.0 * a) * (t + 1.0) - 4.0 * a;
    let w1 = ((a + 2.0) * t - (a + 3.0)) * t * t + 1.0;
    let w2 = ((a + 2.0) * (1.0 - t) - (a + 3.0)) * (1.0 - t) * (1.0 - t) + 1.0;
    let w3 = 1.0 - w0 - w1 - w2;
    [w0, w1, w2, w3]
}
