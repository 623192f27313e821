use crate::error::SheetError;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::Path;

/// Finest accumulator angle step, in radians (about 0.006°)
pub const MIN_HOUGH_ANGLE_RESOLUTION: f64 = 1e-4;

/// Finest accumulator radius step, in pixels
pub const MIN_HOUGH_DISTANCE_RESOLUTION: f64 = 0.1;

/// Tunables for the deskew-and-enhance pipeline.
///
/// Missing fields in a JSON document fall back to [`EnhancementParameters::default`],
/// so `{"denoise_strength": 10}` is a valid partial override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementParameters {
    /// Non-local-means filter strength (`h`). Zero disables denoising.
    pub denoise_strength: f32,
    /// Side of the square patch compared by the denoiser (odd)
    pub denoise_template_window: u32,
    /// Side of the square neighbourhood searched for similar patches (odd)
    pub denoise_search_window: u32,
    /// Canny hysteresis lower bound
    pub edge_low_threshold: f32,
    /// Canny hysteresis upper bound
    pub edge_high_threshold: f32,
    /// Radius step of the line accumulator, in pixels
    pub hough_distance_resolution: f64,
    /// Angle step of the line accumulator, in radians
    pub hough_angle_resolution: f64,
    /// Minimum accumulator votes for a line to be reported
    pub hough_vote_threshold: u32,
    /// CLAHE clip limit (relative to a flat histogram)
    pub contrast_clip_limit: f32,
    /// CLAHE tile grid as (columns, rows)
    pub contrast_tile_size: (u32, u32),
}

impl Default for EnhancementParameters {
    fn default() -> Self {
        Self {
            denoise_strength: 15.0,
            denoise_template_window: 7,
            denoise_search_window: 21,
            edge_low_threshold: 50.0,
            edge_high_threshold: 150.0,
            hough_distance_resolution: 1.0,
            hough_angle_resolution: PI / 180.0,
            hough_vote_threshold: 120,
            contrast_clip_limit: 3.0,
            contrast_tile_size: (8, 8),
        }
    }
}

impl EnhancementParameters {
    /// Load parameters from a JSON file, validating them before returning
    pub fn from_file(path: &Path) -> Result<Self, SheetError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            SheetError::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    /// Parse (possibly partial) parameters from a JSON document
    pub fn from_json(raw: &str) -> Result<Self, SheetError> {
        let params: Self = serde_json::from_str(raw)
            .map_err(|e| SheetError::Configuration(format!("Invalid parameters: {}", e)))?;
        params.validate()?;
        Ok(params)
    }

    /// Reject values that would make a pipeline stage meaningless.
    ///
    /// Runs once before any pixel is touched; stages assume a validated set.
    pub fn validate(&self) -> Result<(), SheetError> {
        if !self.denoise_strength.is_finite() || self.denoise_strength < 0.0 {
            return Err(invalid("denoise_strength must be a finite value >= 0"));
        }
        check_odd_window("denoise_template_window", self.denoise_template_window)?;
        check_odd_window("denoise_search_window", self.denoise_search_window)?;

        let (low, high) = (self.edge_low_threshold, self.edge_high_threshold);
        if !low.is_finite() || !high.is_finite() || low < 0.0 || high < 0.0 {
            return Err(invalid("edge thresholds must be finite values >= 0"));
        }
        if low > high {
            return Err(invalid(format!(
                "edge_low_threshold ({}) exceeds edge_high_threshold ({})",
                low, high
            )));
        }

        let rho = self.hough_distance_resolution;
        if !rho.is_finite() || rho < MIN_HOUGH_DISTANCE_RESOLUTION {
            return Err(invalid(format!(
                "hough_distance_resolution must be >= {} pixels, got {}",
                MIN_HOUGH_DISTANCE_RESOLUTION, rho
            )));
        }
        let theta = self.hough_angle_resolution;
        if !theta.is_finite() || theta < MIN_HOUGH_ANGLE_RESOLUTION || theta >= PI {
            return Err(invalid(format!(
                "hough_angle_resolution must lie in [{}, pi) radians, got {}",
                MIN_HOUGH_ANGLE_RESOLUTION, theta
            )));
        }
        if self.hough_vote_threshold == 0 {
            return Err(invalid("hough_vote_threshold must be >= 1"));
        }

        if !self.contrast_clip_limit.is_finite() || self.contrast_clip_limit <= 0.0 {
            return Err(invalid("contrast_clip_limit must be > 0"));
        }
        let (cols, rows) = self.contrast_tile_size;
        if cols == 0 || rows == 0 {
            return Err(invalid(format!(
                "contrast_tile_size must be positive, got ({}, {})",
                cols, rows
            )));
        }

        Ok(())
    }
}

fn check_odd_window(name: &str, size: u32) -> Result<(), SheetError> {
    if size == 0 || size % 2 == 0 {
        return Err(invalid(format!("{} must be odd and >= 1, got {}", name, size)));
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> SheetError {
    SheetError::Configuration(message.into())
}
