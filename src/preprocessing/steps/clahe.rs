use image::{GrayImage, Luma};

const BINS: usize = 256;

/// Contrast-limited adaptive histogram equalization.
///
/// The image is cut into a `grid.0` x `grid.1` tile grid (shrunk when the
/// image has fewer pixels than tiles in a direction). Each tile gets an
/// equalization lookup table built from its clipped histogram, and every
/// pixel is mapped through a bilinear blend of the four tables whose tile
/// centres surround it, which hides the tile seams.
pub fn apply(gray: &GrayImage, clip_limit: f32, grid: (u32, u32)) -> GrayImage {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return gray.clone();
    }

    let tiles_x = grid.0.clamp(1, width) as usize;
    let tiles_y = grid.1.clamp(1, height) as usize;
    let (w, h) = (width as usize, height as usize);

    let mut luts = Vec::with_capacity(tiles_x * tiles_y);
    for ty in 0..tiles_y {
        let (y0, y1) = (ty * h / tiles_y, (ty + 1) * h / tiles_y);
        for tx in 0..tiles_x {
            let (x0, x1) = (tx * w / tiles_x, (tx + 1) * w / tiles_x);
            luts.push(tile_lut(gray, (x0, x1), (y0, y1), clip_limit));
        }
    }

    let tile_w = w as f32 / tiles_x as f32;
    let tile_h = h as f32 / tiles_y as f32;

    GrayImage::from_fn(width, height, |x, y| {
        let (tx1, tx2, xa) = neighbours(x as f32, tile_w, tiles_x);
        let (ty1, ty2, ya) = neighbours(y as f32, tile_h, tiles_y);
        let v = gray.get_pixel(x, y).0[0] as usize;

        let top = luts[ty1 * tiles_x + tx1][v] * (1.0 - xa) + luts[ty1 * tiles_x + tx2][v] * xa;
        let bottom = luts[ty2 * tiles_x + tx1][v] * (1.0 - xa) + luts[ty2 * tiles_x + tx2][v] * xa;
        let value = top * (1.0 - ya) + bottom * ya;

        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

/// Indices of the two tiles whose centres bracket `pos`, and the blend factor
fn neighbours(pos: f32, tile_size: f32, tiles: usize) -> (usize, usize, f32) {
    let f = (pos + 0.5) / tile_size - 0.5;
    let lower = f.floor();
    let alpha = f - lower;
    let last = tiles as i64 - 1;
    let t1 = (lower as i64).clamp(0, last) as usize;
    let t2 = (lower as i64 + 1).clamp(0, last) as usize;
    (t1, t2, alpha)
}

/// Equalization table for one tile, with histogram clipping.
///
/// Counts above `max(clip_limit · area / 256, 1)` are cut off and spread
/// evenly over all bins; any remainder goes to evenly spaced bins.
fn tile_lut(gray: &GrayImage, xs: (usize, usize), ys: (usize, usize), clip_limit: f32) -> [f32; BINS] {
    let mut hist = [0u32; BINS];
    for y in ys.0..ys.1 {
        for x in xs.0..xs.1 {
            hist[gray.get_pixel(x as u32, y as u32).0[0] as usize] += 1;
        }
    }

    let area = ((xs.1 - xs.0) * (ys.1 - ys.0)) as u32;
    let limit = ((clip_limit * area as f32 / BINS as f32) as u32).max(1);

    let mut clipped = 0u32;
    for count in hist.iter_mut() {
        if *count > limit {
            clipped += *count - limit;
            *count = limit;
        }
    }

    let batch = clipped / BINS as u32;
    let mut residual = clipped - batch * BINS as u32;
    for count in hist.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            hist[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0.0f32; BINS];
    let mut cumulative = 0u32;
    for (entry, count) in lut.iter_mut().zip(hist) {
        cumulative += count;
        *entry = (cumulative as f32 * scale).round().min(255.0);
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_range(img: &GrayImage) -> u8 {
        let min = img.pixels().map(|p| p.0[0]).min().unwrap();
        let max = img.pixels().map(|p| p.0[0]).max().unwrap();
        max - min
    }

    #[test]
    fn test_low_contrast_is_stretched() {
        // Values squeezed into 100..=131
        let img = GrayImage::from_fn(64, 64, |x, y| Luma([100 + ((x + y) % 32) as u8]));

        let result = apply(&img, 3.0, (8, 8));

        assert!(value_range(&result) > value_range(&img));
    }

    #[test]
    fn test_uniform_tile_keeps_its_level() {
        let img = GrayImage::from_pixel(64, 64, Luma([180]));
        let result = apply(&img, 3.0, (8, 8));
        let v = result.get_pixel(32, 32).0[0] as i32;
        assert!((v - 180).abs() <= 12, "got {}", v);
        // All tiles share the same table, so the output stays uniform
        assert!(result.pixels().all(|p| p.0[0] as i32 == v));
    }

    #[test]
    fn test_grid_larger_than_image() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 60 + y * 20) as u8]));
        let result = apply(&img, 3.0, (8, 8));
        assert_eq!(result.dimensions(), (3, 2));
    }

    #[test]
    fn test_is_deterministic() {
        let img = GrayImage::from_fn(50, 37, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        assert_eq!(apply(&img, 2.0, (4, 3)), apply(&img, 2.0, (4, 3)));
    }

    #[test]
    fn test_preserves_ordering_within_tile() {
        let img = GrayImage::from_fn(16, 16, |x, _| Luma([60 + x as u8 * 4]));
        let result = apply(&img, 3.0, (1, 1));
        for x in 1..16 {
            assert!(result.get_pixel(x, 0).0[0] >= result.get_pixel(x - 1, 0).0[0]);
        }
    }
}
