use crate::error::SheetError;
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::io::Cursor;
use std::path::Path;
use std::time::Instant;

use super::params::EnhancementParameters;
use super::steps;
use super::steps::hough::{HoughOptions, LineObservation};
use super::steps::tilt::TiltEstimate;

/// Timing information for a single pipeline stage
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    pub name: String,
    pub time_ms: u64,
}

/// Output of one pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct Enhanced {
    /// Upright, contrast-enhanced page (not serialized)
    #[serde(skip)]
    pub image: RgbImage,
    /// Tilt that was corrected, in degrees
    pub tilt: TiltEstimate,
    /// Lines found by the accumulator before angle filtering
    pub lines_detected: usize,
    /// Total processing time in milliseconds
    pub total_time_ms: u64,
    /// Individual stage timings
    pub steps: Vec<StepTiming>,
}

impl Enhanced {
    pub fn into_parts(self) -> (RgbImage, TiltEstimate) {
        (self.image, self.tilt)
    }
}

/// Deskew-and-enhance pipeline with validated parameters.
///
/// Holds no state besides its parameters, so one instance can serve any
/// number of pages, including concurrently from several threads.
#[derive(Debug, Clone)]
pub struct Pipeline {
    params: EnhancementParameters,
}

impl Pipeline {
    pub fn new(params: EnhancementParameters) -> Result<Self, SheetError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &EnhancementParameters {
        &self.params
    }

    /// Deskew and enhance one page
    pub fn process(&self, image: &RgbImage) -> Result<Enhanced, SheetError> {
        ensure_area(image)?;
        let start = Instant::now();
        let mut timings = Vec::new();

        let (tilt, lines) = self.measure(image, &mut timings);

        let rotated = run_step("rotate", &mut timings, || steps::rotate::apply(image, tilt));

        let enhanced = run_step("contrast", &mut timings, || {
            enhance_contrast(&rotated, &self.params)
        });
        drop(rotated);

        let (width, height) = image.dimensions();
        tracing::info!(
            "Corrected {:.2} degree tilt on {}x{} page ({} lines)",
            tilt,
            width,
            height,
            lines
        );

        Ok(Enhanced {
            image: enhanced,
            tilt,
            lines_detected: lines,
            total_time_ms: start.elapsed().as_millis() as u64,
            steps: timings,
        })
    }

    /// Estimate the tilt of a page without correcting it
    pub fn estimate_tilt(&self, image: &RgbImage) -> Result<TiltEstimate, SheetError> {
        ensure_area(image)?;
        let mut timings = Vec::new();
        Ok(self.measure(image, &mut timings).0)
    }

    /// Line observations of a page, strongest first
    pub fn detect_lines(&self, image: &RgbImage) -> Result<Vec<LineObservation>, SheetError> {
        ensure_area(image)?;
        let mut timings = Vec::new();
        Ok(self.observe(image, &mut timings))
    }

    fn measure(&self, image: &RgbImage, timings: &mut Vec<StepTiming>) -> (TiltEstimate, usize) {
        let lines = self.observe(image, timings);
        let tilt = run_step("estimate", timings, || steps::tilt::estimate(&lines));
        (tilt, lines.len())
    }

    fn observe(&self, image: &RgbImage, timings: &mut Vec<StepTiming>) -> Vec<LineObservation> {
        let p = &self.params;

        let gray = run_step("grayscale", timings, || steps::grayscale::apply(image));

        let denoised = run_step("denoise", timings, || {
            steps::denoise::apply(
                &gray,
                p.denoise_strength,
                p.denoise_template_window,
                p.denoise_search_window,
            )
        });
        drop(gray);

        let edges = run_step("edges", timings, || {
            steps::edges::apply(&denoised, p.edge_low_threshold, p.edge_high_threshold)
        });
        drop(denoised);

        run_step("hough", timings, || {
            steps::hough::detect_lines(
                &edges,
                HoughOptions {
                    distance_resolution: p.hough_distance_resolution,
                    angle_resolution: p.hough_angle_resolution,
                    vote_threshold: p.hough_vote_threshold,
                },
            )
        })
    }
}

/// Run the whole pipeline once: validate parameters, then deskew and enhance
pub fn process(image: &RgbImage, params: &EnhancementParameters) -> Result<Enhanced, SheetError> {
    Pipeline::new(params.clone())?.process(image)
}

/// Adaptive contrast enhancement on the lightness channel only
pub fn enhance_contrast(image: &RgbImage, params: &EnhancementParameters) -> RgbImage {
    let mut planes = steps::lab::split(image);
    planes.lightness = steps::clahe::apply(
        &planes.lightness,
        params.contrast_clip_limit,
        params.contrast_tile_size,
    );
    steps::lab::merge(&planes)
}

/// Decode an in-memory image into 3-channel RGB
pub fn decode(bytes: &[u8]) -> Result<RgbImage, SheetError> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| SheetError::InvalidImage(format!("Failed to decode image: {}", e)))?
        .into_rgb8();
    ensure_area(&image)?;
    Ok(image)
}

/// Decode an image file into 3-channel RGB
pub fn open(path: &Path) -> Result<RgbImage, SheetError> {
    let image = image::open(path)
        .map_err(|e| {
            SheetError::InvalidImage(format!("Failed to open {}: {}", path.display(), e))
        })?
        .into_rgb8();
    ensure_area(&image)?;
    Ok(image)
}

/// Encode an image as PNG, the format handed to downstream consumers
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, SheetError> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| SheetError::Internal(format!("Failed to encode PNG: {}", e)))?;
    Ok(buffer)
}

fn ensure_area(image: &RgbImage) -> Result<(), SheetError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(SheetError::InvalidImage(format!(
            "Image has zero area ({}x{})",
            width, height
        )));
    }
    Ok(())
}

fn run_step<T, F>(name: &str, timings: &mut Vec<StepTiming>, step_fn: F) -> T
where
    F: FnOnce() -> T,
{
    let step_start = Instant::now();
    let result = step_fn();
    let time_ms = step_start.elapsed().as_millis() as u64;
    tracing::debug!("Step {} took {}ms", name, time_ms);
    timings.push(StepTiming {
        name: name.to_string(),
        time_ms,
    });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const PAPER: Rgb<u8> = Rgb([245, 245, 240]);
    const INK: Rgb<u8> = Rgb([25, 25, 60]);

    /// Page of ruled lines leaning `degrees` clockwise (image y axis down),
    /// with `margin` pixels of bare background on every side
    fn ruled_page(size: u32, degrees: f64, background: Rgb<u8>, margin: u32) -> RgbImage {
        inked_page(size, degrees, INK, background, margin)
    }

    fn inked_page(size: u32, degrees: f64, ink: Rgb<u8>, background: Rgb<u8>, margin: u32) -> RgbImage {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let c = size as f64 / 2.0;
        let body = margin..size - margin;
        RgbImage::from_fn(size, size, |x, y| {
            let (dx, dy) = (x as f64 - c, y as f64 - c);
            // Distance across the lines
            let v = -dx * sin + dy * cos + 1000.0;
            if body.contains(&x) && body.contains(&y) && v % 30.0 < 4.0 {
                ink
            } else {
                background
            }
        })
    }

    #[test]
    fn test_output_dimensions_match_input() {
        for (w, h) in [(64, 40), (17, 93), (1, 1)] {
            let img = RgbImage::from_pixel(w, h, PAPER);
            let result = process(&img, &EnhancementParameters::default()).unwrap();
            assert_eq!(result.image.dimensions(), (w, h));
        }
    }

    #[test]
    fn test_zero_area_image_is_rejected() {
        let img = RgbImage::new(0, 10);
        let result = process(&img, &EnhancementParameters::default());
        assert!(matches!(result, Err(SheetError::InvalidImage(_))));
    }

    #[test]
    fn test_invalid_parameters_fail_before_processing() {
        let params = EnhancementParameters {
            contrast_tile_size: (8, 0),
            ..Default::default()
        };
        let img = RgbImage::from_pixel(10, 10, PAPER);
        assert!(matches!(process(&img, &params), Err(SheetError::Configuration(_))));
    }

    #[test]
    fn test_blank_page_gets_contrast_only() {
        let params = EnhancementParameters::default();
        let img = RgbImage::from_pixel(120, 90, Rgb([210, 200, 190]));

        let result = process(&img, &params).unwrap();

        assert_eq!(result.tilt, 0.0);
        assert_eq!(result.lines_detected, 0);
        assert_eq!(result.image, enhance_contrast(&img, &params));
    }

    #[test]
    fn test_recovers_known_tilt() {
        let img = ruled_page(300, 5.0, PAPER, 0);
        let result = process(&img, &EnhancementParameters::default()).unwrap();
        assert!((result.tilt - 5.0).abs() <= 0.5, "estimated {}", result.tilt);
    }

    #[test]
    fn test_recovers_tilt_of_light_pencil_rules() {
        let img = inked_page(300, 5.0, Rgb([170, 170, 170]), Rgb([235, 235, 235]), 0);
        let result = process(&img, &EnhancementParameters::default()).unwrap();

        assert!(result.lines_detected > 0);
        assert!((result.tilt - 5.0).abs() <= 0.5, "estimated {}", result.tilt);
    }

    #[test]
    fn test_recovers_negative_tilt() {
        let img = ruled_page(300, -3.0, PAPER, 0);
        let result = process(&img, &EnhancementParameters::default()).unwrap();
        assert!((result.tilt + 3.0).abs() <= 0.5, "estimated {}", result.tilt);
    }

    #[test]
    fn test_corrected_page_measures_level() {
        let pipeline = Pipeline::new(EnhancementParameters::default()).unwrap();
        let img = ruled_page(300, 5.0, PAPER, 0);

        let corrected = pipeline.process(&img).unwrap();
        let residual = pipeline.estimate_tilt(&corrected.image).unwrap();

        assert!(residual.abs() <= 0.5, "residual tilt {}", residual);
    }

    #[test]
    fn test_upright_page_stays_upright_when_reprocessed() {
        let pipeline = Pipeline::new(EnhancementParameters::default()).unwrap();
        let img = ruled_page(200, 0.0, PAPER, 0);

        let first = pipeline.process(&img).unwrap();
        let second = pipeline.process(&first.image).unwrap();

        assert!(first.tilt.abs() <= 1.0);
        assert!(second.tilt.abs() <= 1.0);
    }

    #[test]
    fn test_vertical_rules_fold_to_zero() {
        let img = RgbImage::from_fn(200, 200, |x, _| if x % 40 < 4 { INK } else { PAPER });
        let pipeline = Pipeline::new(EnhancementParameters::default()).unwrap();

        let lines = pipeline.detect_lines(&img).unwrap();
        let tilt = pipeline.estimate_tilt(&img).unwrap();

        assert!(!lines.is_empty());
        assert!(tilt.abs() < 1e-9, "estimated {}", tilt);
    }

    #[test]
    fn test_rotated_corners_repeat_border_colour() {
        let border = Rgb([200, 40, 40]);
        let img = ruled_page(300, 6.0, border, 20);

        let result = process(&img, &EnhancementParameters::default()).unwrap();
        assert!((result.tilt - 6.0).abs() <= 0.5, "estimated {}", result.tilt);

        for (x, y) in [(0, 0), (299, 0), (0, 299), (299, 299)] {
            let [r, g, b] = result.image.get_pixel(x, y).0;
            assert!(r > 120 && r > g + 60 && r > b + 60, "corner ({}, {}) = {:?}", x, y, [r, g, b]);
        }
    }

    #[test]
    fn test_is_deterministic() {
        let img = ruled_page(160, 4.0, PAPER, 0);
        let params = EnhancementParameters::default();

        let a = process(&img, &params).unwrap();
        let b = process(&img, &params).unwrap();

        assert_eq!(a.tilt, b.tilt);
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn test_records_every_stage() {
        let img = RgbImage::from_pixel(20, 20, PAPER);
        let result = process(&img, &EnhancementParameters::default()).unwrap();
        let names: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["grayscale", "denoise", "edges", "hough", "estimate", "rotate", "contrast"]
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"not an image"), Err(SheetError::InvalidImage(_))));
    }

    #[test]
    fn test_png_round_trip_keeps_pixels() {
        let img = ruled_page(32, 0.0, PAPER, 0);
        let bytes = encode_png(&img).unwrap();
        assert_eq!(decode(&bytes).unwrap(), img);
    }
}
