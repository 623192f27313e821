//! Deskew and contrast-enhancement pipeline for scanned answer sheets, plus
//! the region-by-region grading flow built on top of it.

pub mod batch;
pub mod config;
pub mod error;
pub mod grading;
pub mod preprocessing;
pub mod report;
pub mod server;

pub use error::SheetError;
