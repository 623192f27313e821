use image::{GrayImage, Luma};
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// Non-maximum suppression needs a 3x3 neighbourhood around every pixel
const MIN_EDGE_DIMENSION: u32 = 3;

/// tan(22.5°) and tan(67.5°): bounds of the four gradient direction sectors
const TAN_22_5: f32 = 0.414_213_56;
const TAN_67_5: f32 = 2.414_213_6;

/// Binary edge map (0 or 255) with hysteresis thresholding.
///
/// Gradients come straight from 3x3 Sobel kernels with an L1 magnitude
/// (`|gx| + |gy|`); the input is expected to be smoothed already, so no
/// extra blur is applied. Magnitudes above `high` are kept, magnitudes at
/// or below `low` are dropped, and the ones in between survive only when
/// 8-connected to a kept edge. Images too small to carry a gradient
/// produce an all-zero map rather than an error.
pub fn apply(gray: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width < MIN_EDGE_DIMENSION || height < MIN_EDGE_DIMENSION {
        return GrayImage::new(width, height);
    }

    let gradients = Gradients::new(gray);
    let candidates = gradients.suppress_non_maxima(low);
    hysteresis(&candidates, width, height, high)
}

struct Gradients {
    gx: Vec<i32>,
    gy: Vec<i32>,
    magnitude: Vec<i32>,
    width: usize,
    height: usize,
}

impl Gradients {
    fn new(gray: &GrayImage) -> Self {
        let horizontal = horizontal_sobel(gray);
        let vertical = vertical_sobel(gray);

        let gx: Vec<i32> = horizontal.pixels().map(|p| p.0[0] as i32).collect();
        let gy: Vec<i32> = vertical.pixels().map(|p| p.0[0] as i32).collect();
        let magnitude = gx.iter().zip(&gy).map(|(x, y)| x.abs() + y.abs()).collect();

        Self {
            gx,
            gy,
            magnitude,
            width: gray.width() as usize,
            height: gray.height() as usize,
        }
    }

    /// Magnitude with zero outside the image
    fn at(&self, x: i64, y: i64) -> i32 {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return 0;
        }
        self.magnitude[y as usize * self.width + x as usize]
    }

    /// Thin ridges to one pixel and keep only magnitudes above `low`.
    ///
    /// A pixel must strictly beat the neighbour behind it along the
    /// quantised gradient direction and at least match the one ahead, so a
    /// plateau two pixels wide keeps exactly one of them.
    fn suppress_non_maxima(&self, low: f32) -> Vec<i32> {
        let mut kept = vec![0i32; self.magnitude.len()];

        for y in 0..self.height {
            for x in 0..self.width {
                let idx = y * self.width + x;
                let m = self.magnitude[idx];
                if m as f32 <= low {
                    continue;
                }

                let (gx, gy) = (self.gx[idx], self.gy[idx]);
                let (ax, ay) = (gx.abs() as f32, gy.abs() as f32);
                let (xi, yi) = (x as i64, y as i64);

                let is_max = if ay < ax * TAN_22_5 {
                    m > self.at(xi - 1, yi) && m >= self.at(xi + 1, yi)
                } else if ay > ax * TAN_67_5 {
                    m > self.at(xi, yi - 1) && m >= self.at(xi, yi + 1)
                } else if (gx < 0) != (gy < 0) {
                    m > self.at(xi - 1, yi + 1) && m > self.at(xi + 1, yi - 1)
                } else {
                    m > self.at(xi - 1, yi - 1) && m > self.at(xi + 1, yi + 1)
                };

                if is_max {
                    kept[idx] = m;
                }
            }
        }

        kept
    }
}

/// Grow strong edges through 8-connected candidates
fn hysteresis(candidates: &[i32], width: u32, height: u32, high: f32) -> GrayImage {
    let (w, h) = (width as usize, height as usize);
    let mut edges = GrayImage::new(width, height);
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for y in 0..h {
        for x in 0..w {
            let m = candidates[y * w + x];
            if m as f32 > high && edges.get_pixel(x as u32, y as u32).0[0] == 0 {
                edges.put_pixel(x as u32, y as u32, Luma([255]));
                stack.push((x, y));
            }

            while let Some((cx, cy)) = stack.pop() {
                for ny in cy.saturating_sub(1)..=(cy + 1).min(h - 1) {
                    for nx in cx.saturating_sub(1)..=(cx + 1).min(w - 1) {
                        if candidates[ny * w + nx] > 0
                            && edges.get_pixel(nx as u32, ny as u32).0[0] == 0
                        {
                            edges.put_pixel(nx as u32, ny as u32, Luma([255]));
                            stack.push((nx, ny));
                        }
                    }
                }
            }
        }
    }

    edges
}
