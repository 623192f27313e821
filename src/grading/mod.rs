//! Region-by-region grading of answer sheets.
//!
//! Reading text from image regions, generating missing keys and scoring
//! answers are capabilities supplied from outside through the traits below;
//! [`gemini::GeminiClient`] implements all three against a hosted model.

pub mod evaluator;
pub mod gemini;
pub mod template;

use crate::error::SheetError;
use image::{imageops, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub use evaluator::{QuestionResult, SheetEvaluator, StudentReport};
pub use gemini::GeminiClient;
pub use template::{Region, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    Mcq,
    Fillblank,
    Descriptive,
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionType::Mcq => "mcq",
            QuestionType::Fillblank => "fillblank",
            QuestionType::Descriptive => "descriptive",
        };
        f.write_str(name)
    }
}

/// Axis-aligned pixel rectangle, stored in JSON as `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i64; 4]", into = "[i64; 4]")]
pub struct BoundingBox {
    pub x1: i64,
    pub y1: i64,
    pub x2: i64,
    pub y2: i64,
}

impl From<[i64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [i64; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [i64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: i64, y1: i64, x2: i64, y2: i64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    /// Copy of the part of `image` inside the box, clipped to the image
    pub fn crop(&self, image: &RgbImage) -> Result<RgbImage, SheetError> {
        let (width, height) = image.dimensions();
        let x1 = self.x1.clamp(0, width as i64);
        let x2 = self.x2.clamp(0, width as i64);
        let y1 = self.y1.clamp(0, height as i64);
        let y2 = self.y2.clamp(0, height as i64);

        if x2 <= x1 || y2 <= y1 {
            return Err(SheetError::Template(format!(
                "Region {:?} lies outside the {}x{} image",
                <[i64; 4]>::from(*self),
                width,
                height
            )));
        }

        Ok(imageops::crop_imm(
            image,
            x1 as u32,
            y1 as u32,
            (x2 - x1) as u32,
            (y2 - y1) as u32,
        )
        .to_image())
    }
}

/// What a recognizer is asked to read from a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extraction {
    /// Printed text, as on a question paper or answer key
    Printed,
    /// A student's handwritten answer or mark
    Answer(QuestionType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub score: u32,
    pub reason: String,
}

/// Reads text out of one region of a page
pub trait Recognizer: Send + Sync {
    fn extract(
        &self,
        image: &RgbImage,
        region: BoundingBox,
        extraction: Extraction,
    ) -> Result<String, SheetError>;
}

/// Produces a reference answer when the key sheet has none
pub trait KeyGenerator: Send + Sync {
    fn generate_key(&self, question: &str, kind: QuestionType) -> Result<String, SheetError>;
}

/// Judges a student answer against the key
pub trait Grader: Send + Sync {
    fn score(&self, question: &str, key_answer: &str, student_answer: &str)
        -> Result<Score, SheetError>;
}

/// The three capabilities grading needs
#[derive(Clone)]
pub struct Collaborators {
    pub recognizer: Arc<dyn Recognizer>,
    pub keys: Arc<dyn KeyGenerator>,
    pub grader: Arc<dyn Grader>,
}

impl Collaborators {
    /// Use one service for reading, key generation and scoring
    pub fn shared<M>(model: Arc<M>) -> Self
    where
        M: Recognizer + KeyGenerator + Grader + 'static,
    {
        Self {
            recognizer: model.clone(),
            keys: model.clone(),
            grader: model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_bbox_json_is_array() {
        let bbox = BoundingBox::new(400, 80, 480, 140);
        assert_eq!(serde_json::to_string(&bbox).unwrap(), "[400,80,480,140]");
        let back: BoundingBox = serde_json::from_str("[400,80,480,140]").unwrap();
        assert_eq!(back, bbox);
    }

    #[test]
    fn test_question_type_names() {
        let kind: QuestionType = serde_json::from_str("\"fillblank\"").unwrap();
        assert_eq!(kind, QuestionType::Fillblank);
        assert_eq!(QuestionType::Mcq.to_string(), "mcq");
    }

    #[test]
    fn test_crop_clamps_to_image() {
        let img = RgbImage::from_fn(100, 50, |x, y| Rgb([x as u8, y as u8, 0]));
        let crop = BoundingBox::new(90, -10, 130, 20).crop(&img).unwrap();
        assert_eq!(crop.dimensions(), (10, 20));
        assert_eq!(crop.get_pixel(0, 0), &Rgb([90, 0, 0]));
    }

    #[test]
    fn test_crop_outside_image_fails() {
        let img = RgbImage::new(100, 50);
        let err = BoundingBox::new(120, 0, 150, 20).crop(&img).unwrap_err();
        assert!(matches!(err, SheetError::Template(_)));
        assert!(BoundingBox::new(10, 10, 10, 40).crop(&img).is_err());
    }
}
