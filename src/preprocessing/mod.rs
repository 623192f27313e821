//! Deskew-and-enhance pipeline for scanned pages
//!
//! Estimates the page tilt from a Hough-line angle histogram, rotates the
//! page upright and equalizes local contrast on the lightness channel.

pub mod params;
pub mod pipeline;
pub mod steps;

pub use params::EnhancementParameters;
pub use pipeline::{decode, encode_png, open, process, Enhanced, Pipeline, StepTiming};
pub use steps::hough::LineObservation;
pub use steps::tilt::TiltEstimate;
