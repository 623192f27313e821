//! Individual pipeline stages

pub mod clahe;
pub mod denoise;
pub mod edges;
pub mod grayscale;
pub mod hough;
pub mod lab;
pub mod rotate;
pub mod tilt;
