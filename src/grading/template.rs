use super::{BoundingBox, QuestionType};
use crate::error::SheetError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_NAME: &str = "Default Layout (Q1-Q7)";

/// Rows of the built-in seven-question sheet: (question, type, row y)
const DEFAULT_ROWS: [(u32, QuestionType, i64); 7] = [
    (1, QuestionType::Mcq, 100),
    (2, QuestionType::Mcq, 170),
    (3, QuestionType::Mcq, 250),
    (4, QuestionType::Mcq, 350),
    (5, QuestionType::Mcq, 450),
    (6, QuestionType::Mcq, 580),
    (7, QuestionType::Fillblank, 650),
];

const QUESTION_X1: i64 = 50;
const ANSWER_X1: i64 = 400;
const ANSWER_X2: i64 = 480;
const ROW_ABOVE: i64 = 20;
const ROW_BELOW: i64 = 40;

/// Where each question, its key and the student's answer sit on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub template_name: String,
    pub regions: Vec<Region>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub q_no: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    /// Question text on the question paper
    pub question_bbox: BoundingBox,
    /// Key answer on the answer key; absent means the key is generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_bbox: Option<BoundingBox>,
    /// Student answer on each answer sheet
    pub answer_bbox: BoundingBox,
}

impl Template {
    /// Seven-row layout: six multiple-choice rows and one fill-in-the-blank,
    /// question text on the left and a shared answer/key box on the right
    pub fn default_layout() -> Self {
        let regions = DEFAULT_ROWS
            .iter()
            .map(|&(q_no, kind, y)| {
                let answer = BoundingBox::new(ANSWER_X1, y - ROW_ABOVE, ANSWER_X2, y + ROW_BELOW);
                Region {
                    q_no,
                    kind,
                    question_bbox: BoundingBox::new(
                        QUESTION_X1,
                        y - ROW_ABOVE,
                        ANSWER_X1,
                        y + ROW_BELOW,
                    ),
                    key_bbox: Some(answer),
                    answer_bbox: answer,
                }
            })
            .collect();

        Self {
            template_name: DEFAULT_NAME.to_string(),
            regions,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SheetError> {
        let template: Template = serde_json::from_str(json)
            .map_err(|e| SheetError::Template(format!("Invalid template JSON: {}", e)))?;
        template.validate()?;
        Ok(template)
    }

    pub fn load(path: &Path) -> Result<Self, SheetError> {
        let json = fs::read_to_string(path).map_err(|e| {
            SheetError::Template(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Load `path`, first writing the default layout there if the file is
    /// missing or empty
    pub fn load_or_generate(path: &Path) -> Result<Self, SheetError> {
        let missing = fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
        if missing {
            tracing::warn!(
                "Template {} not found or empty, writing default layout",
                path.display()
            );
            Self::default_layout().save(path)?;
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), SheetError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                SheetError::Template(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| SheetError::Template(format!("Failed to serialize template: {}", e)))?;
        fs::write(path, json).map_err(|e| {
            SheetError::Template(format!("Failed to write {}: {}", path.display(), e))
        })?;
        tracing::info!("Template written to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), SheetError> {
        if self.regions.is_empty() {
            return Err(SheetError::Template("Template has no regions".to_string()));
        }
        for region in &self.regions {
            let boxes = [
                ("question_bbox", Some(region.question_bbox)),
                ("key_bbox", region.key_bbox),
                ("answer_bbox", Some(region.answer_bbox)),
            ];
            for (name, bbox) in boxes {
                if bbox.is_some_and(|b| b.is_empty()) {
                    return Err(SheetError::Template(format!(
                        "Q{}: {} has no area",
                        region.q_no, name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_layout_rows() {
        let template = Template::default_layout();
        assert_eq!(template.regions.len(), 7);

        let first = &template.regions[0];
        assert_eq!(first.kind, QuestionType::Mcq);
        assert_eq!(first.question_bbox, BoundingBox::new(50, 80, 400, 140));
        assert_eq!(first.answer_bbox, BoundingBox::new(400, 80, 480, 140));
        assert_eq!(first.key_bbox, Some(first.answer_bbox));

        let last = &template.regions[6];
        assert_eq!(last.q_no, 7);
        assert_eq!(last.kind, QuestionType::Fillblank);
        assert_eq!(last.answer_bbox, BoundingBox::new(400, 630, 480, 690));
    }

    #[test]
    fn test_parses_region_without_key() {
        let json = r#"{
            "template_name": "t",
            "regions": [
                {"q_no": 1, "type": "descriptive",
                 "question_bbox": [0, 0, 10, 10], "answer_bbox": [10, 0, 20, 10]}
            ]
        }"#;
        let template = Template::from_json(json).unwrap();
        assert_eq!(template.regions[0].key_bbox, None);
        assert_eq!(template.regions[0].kind, QuestionType::Descriptive);
    }

    #[test]
    fn test_rejects_empty_box() {
        let json = r#"{"template_name": "t", "regions": [
            {"q_no": 3, "type": "mcq", "question_bbox": [0, 0, 10, 10],
             "answer_bbox": [10, 10, 10, 20]}]}"#;
        let err = Template::from_json(json).unwrap_err();
        assert!(err.to_string().contains("Q3"));
    }

    #[test]
    fn test_rejects_no_regions() {
        let json = r#"{"template_name": "t", "regions": []}"#;
        assert!(matches!(
            Template::from_json(json),
            Err(SheetError::Template(_))
        ));
    }

    #[test]
    fn test_load_or_generate_writes_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data").join("template.json");

        let template = Template::load_or_generate(&path).unwrap();

        assert!(path.exists());
        assert_eq!(template, Template::default_layout());
    }

    #[test]
    fn test_load_or_generate_replaces_empty_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.json");
        fs::write(&path, "").unwrap();

        let template = Template::load_or_generate(&path).unwrap();
        assert_eq!(template.regions.len(), 7);
    }

    #[test]
    fn test_load_or_generate_keeps_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("template.json");
        let mut custom = Template::default_layout();
        custom.regions.truncate(2);
        custom.save(&path).unwrap();

        assert_eq!(Template::load_or_generate(&path).unwrap(), custom);
    }
}
