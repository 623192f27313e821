use image::GrayImage;
use serde::Serialize;
use std::f64::consts::PI;

/// A line in normal form: `x·cos(angle) + y·sin(angle) = radius`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LineObservation {
    /// Signed distance from the image origin, in pixels
    pub radius: f64,
    /// Normal direction in radians, in `[0, π)`
    pub angle: f64,
    /// Accumulator votes behind this line
    pub votes: u32,
}

impl LineObservation {
    pub fn angle_degrees(&self) -> f64 {
        self.angle.to_degrees()
    }
}

/// Accumulator resolution and acceptance threshold
#[derive(Debug, Clone, Copy)]
pub struct HoughOptions {
    pub distance_resolution: f64,
    pub angle_resolution: f64,
    pub vote_threshold: u32,
}

/// Standard Hough transform over a binary edge map.
///
/// Every non-zero pixel votes for all `(radius, angle)` cells of the lines
/// through it. A cell is reported when it collects at least `vote_threshold`
/// votes and is a local maximum among its four neighbours in the
/// accumulator. Results are ordered by votes, strongest first, with ties
/// broken by angle then radius so the output is fully deterministic.
pub fn detect_lines(edges: &GrayImage, options: HoughOptions) -> Vec<LineObservation> {
    let (width, height) = edges.dimensions();
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let rho = options.distance_resolution;
    let theta = options.angle_resolution;

    let mut num_angles = (PI / theta).round().max(1.0) as usize;
    // Drop a final bin that would land on π itself (the same line as 0)
    if num_angles > 1 && (PI - (num_angles - 1) as f64 * theta).abs() < theta / 2.0 {
        num_angles -= 1;
    }
    let max_radius = (width + height) as f64;
    let num_radii = ((2.0 * max_radius + 1.0) / rho).round().max(1.0) as usize;
    let radius_offset = (num_radii - 1) as f64 / 2.0;

    let trig: Vec<(f64, f64)> = (0..num_angles)
        .map(|n| {
            let a = n as f64 * theta;
            (a.cos() / rho, a.sin() / rho)
        })
        .collect();

    // Padded by one cell on every side so the peak test needs no bounds checks
    let stride = num_radii + 2;
    let mut accumulator = vec![0u32; (num_angles + 2) * stride];

    let mut voters = 0usize;
    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel.0[0] == 0 {
            continue;
        }
        voters += 1;
        for (n, &(cos_t, sin_t)) in trig.iter().enumerate() {
            let r = (x as f64 * cos_t + y as f64 * sin_t + radius_offset).round();
            if r < 0.0 || r >= num_radii as f64 {
                continue;
            }
            accumulator[(n + 1) * stride + r as usize + 1] += 1;
        }
    }

    if voters == 0 {
        return Vec::new();
    }

    let mut lines = Vec::new();
    for n in 0..num_angles {
        for r in 0..num_radii {
            let base = (n + 1) * stride + r + 1;
            let votes = accumulator[base];
            if votes < options.vote_threshold {
                continue;
            }
            let is_peak = votes > accumulator[base - 1]
                && votes >= accumulator[base + 1]
                && votes > accumulator[base - stride]
                && votes >= accumulator[base + stride];
            if !is_peak {
                continue;
            }
            lines.push(LineObservation {
                radius: (r as f64 - radius_offset) * rho,
                angle: n as f64 * theta,
                votes,
            });
        }
    }

    lines.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then(a.angle.total_cmp(&b.angle))
            .then(a.radius.total_cmp(&b.radius))
    });

    tracing::debug!(
        "Hough accumulator {}x{} from {} edge pixels, {} lines",
        num_angles,
        num_radii,
        voters,
        lines.len()
    );

    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn options(vote_threshold: u32) -> HoughOptions {
        HoughOptions {
            distance_resolution: 1.0,
            angle_resolution: PI / 180.0,
            vote_threshold,
        }
    }

    #[test]
    fn test_horizontal_line_has_vertical_normal() {
        let mut edges = GrayImage::new(100, 60);
        for x in 0..100 {
            edges.put_pixel(x, 30, Luma([255]));
        }

        let lines = detect_lines(&edges, options(80));

        let best = lines.first().expect("line should be detected");
        assert_eq!(best.votes, 100);
        assert!((best.angle_degrees() - 90.0).abs() < 1e-9);
        assert!((best.radius - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_line_has_zero_angle() {
        let mut edges = GrayImage::new(60, 100);
        for y in 0..100 {
            edges.put_pixel(12, y, Luma([255]));
        }

        let lines = detect_lines(&edges, options(80));

        let best = lines.first().expect("line should be detected");
        assert_eq!(best.angle, 0.0);
        assert!((best.radius - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_filters_short_lines() {
        let mut edges = GrayImage::new(100, 100);
        for x in 0..40 {
            edges.put_pixel(x, 50, Luma([255]));
        }

        assert!(detect_lines(&edges, options(41)).is_empty());
        assert!(!detect_lines(&edges, options(40)).is_empty());
    }

    #[test]
    fn test_empty_edge_map_yields_no_lines() {
        let edges = GrayImage::new(50, 50);
        assert!(detect_lines(&edges, options(1)).is_empty());
    }

    #[test]
    fn test_angles_stay_below_half_turn() {
        let mut edges = GrayImage::new(30, 30);
        for i in 0..30 {
            edges.put_pixel(i, i, Luma([255]));
        }

        for line in detect_lines(&edges, options(5)) {
            assert!(line.angle >= 0.0 && line.angle < PI);
        }
    }
}
