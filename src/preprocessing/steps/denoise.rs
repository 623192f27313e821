use image::{GrayImage, Luma};

/// Largest mean squared patch distance between 8-bit pixels
const MAX_DISTANCE: usize = 255 * 255;

/// Non-local means denoising
///
/// Each output pixel is a weighted average of the pixels in a
/// `search_window`² neighbourhood, weighted by how closely the
/// `template_window`² patch around them matches the patch around the
/// target pixel: `w = exp(-(SSD / patch_area) / h²)`.
///
/// Patch distances are computed per search offset with a summed-area table
/// over the squared difference image, so the cost is
/// O(pixels × search_window²) regardless of the patch size. Weights come
/// from a table indexed by the mean distance rounded to an integer.
pub fn apply(gray: &GrayImage, strength: f32, template_window: u32, search_window: u32) -> GrayImage {
    let (width, height) = gray.dimensions();
    if strength <= 0.0 || width == 0 || height == 0 {
        return gray.clone();
    }

    let t = (template_window / 2) as i64;
    let s = (search_window / 2) as i64;
    let padded = Padded::new(gray, s + t);

    let patch_area = (template_window as u64) * (template_window as u64);
    let weights = weight_table(strength);

    let (w, h) = (width as usize, height as usize);
    let mut weighted_sum = vec![0.0f64; w * h];
    let mut weight_total = vec![0.0f64; w * h];

    // Difference grid covers every patch centred on an output pixel
    let grid_w = w + 2 * t as usize;
    let grid_h = h + 2 * t as usize;
    let mut integral = vec![0u64; (grid_w + 1) * (grid_h + 1)];
    let stride = grid_w + 1;
    let span = 2 * t as usize + 1;

    for dy in -s..=s {
        for dx in -s..=s {
            for gy in 0..grid_h {
                let py = gy as i64 - t;
                let a = padded.row(py, -t, grid_w);
                let b = padded.row(py + dy, dx - t, grid_w);

                let mut row_sum = 0u64;
                for gx in 0..grid_w {
                    let d = a[gx] as i64 - b[gx] as i64;
                    row_sum += (d * d) as u64;
                    integral[(gy + 1) * stride + gx + 1] = row_sum + integral[gy * stride + gx + 1];
                }
            }

            for y in 0..h {
                let shifted = padded.row(y as i64 + dy, dx, w);
                let top = y * stride;
                let bottom = (y + span) * stride;
                for x in 0..w {
                    let ssd = integral[bottom + x + span] + integral[top + x]
                        - integral[top + x + span]
                        - integral[bottom + x];

                    let distance = ((ssd + patch_area / 2) / patch_area) as usize;
                    let weight = weights[distance.min(MAX_DISTANCE)];
                    if weight == 0.0 {
                        continue;
                    }

                    let idx = y * w + x;
                    weighted_sum[idx] += weight * shifted[x] as f64;
                    weight_total[idx] += weight;
                }
            }
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let idx = y as usize * w + x as usize;
        // The zero offset always contributes weight 1, so the total is never 0
        let value = weighted_sum[idx] / weight_total[idx];
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// `exp(-d / h²)` for every integer mean distance `d`, zero once negligible
fn weight_table(strength: f32) -> Vec<f64> {
    let h2 = (strength as f64) * (strength as f64);
    (0..=MAX_DISTANCE)
        .map(|d| {
            let weight = (-(d as f64) / h2).exp();
            if weight < 1e-9 {
                0.0
            } else {
                weight
            }
        })
        .collect()
}

/// Edge-replicated view of an image with a fixed margin on every side
struct Padded {
    data: Vec<u8>,
    stride: usize,
    margin: i64,
}

impl Padded {
    fn new(gray: &GrayImage, margin: i64) -> Self {
        let (width, height) = (gray.width() as i64, gray.height() as i64);
        let stride = (width + 2 * margin) as usize;
        let rows = (height + 2 * margin) as usize;
        let mut data = Vec::with_capacity(stride * rows);

        for py in 0..rows as i64 {
            let y = (py - margin).clamp(0, height - 1) as u32;
            for px in 0..stride as i64 {
                let x = (px - margin).clamp(0, width - 1) as u32;
                data.push(gray.get_pixel(x, y).0[0]);
            }
        }

        Self { data, stride, margin }
    }

    /// `len` samples of row `y` starting at column `x`, in image coordinates
    /// that may reach `margin` pixels outside
    #[inline]
    fn row(&self, y: i64, x: i64, len: usize) -> &[u8] {
        let start = (y + self.margin) as usize * self.stride + (x + self.margin) as usize;
        &self.data[start..start + len]
    }
}
