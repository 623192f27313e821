use super::{Collaborators, Extraction, Grader, QuestionType, Recognizer, Template};
use crate::error::SheetError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const OPTIONS: [char; 3] = ['A', 'B', 'C'];
const NO_MARK: &str = "X";
const SCORING_FAILED: &str = "Scoring failed";
const LANGUAGE: &str = "en";

/// Per-question outcome for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub q_no: u32,
    #[serde(rename = "type")]
    pub kind: QuestionType,
    pub student_answer: String,
    pub key_answer: String,
    pub score: u32,
    pub feedback: String,
    pub correct_answer: String,
    pub reason_for_wrong: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentReport {
    pub student_id: String,
    pub language: String,
    /// `"<points>/<questions>"`
    pub total_score: String,
    pub details: Vec<QuestionResult>,
}

impl StudentReport {
    pub fn points(&self) -> u32 {
        self.details.iter().map(|d| d.score).sum()
    }
}

/// Question text and key for one template region
#[derive(Debug, Clone)]
struct PreparedQuestion {
    text: String,
    key: String,
}

/// Grades answer sheets against one question paper and answer key.
///
/// Question texts and keys are read once in [`SheetEvaluator::prepare`];
/// every sheet after that only costs one read and one scoring call per
/// region.
pub struct SheetEvaluator {
    template: Template,
    questions: Vec<PreparedQuestion>,
    recognizer: Arc<dyn Recognizer>,
    grader: Arc<dyn Grader>,
}

impl SheetEvaluator {
    pub fn prepare(
        question_paper: &RgbImage,
        answer_key: &RgbImage,
        template: Template,
        collaborators: &Collaborators,
    ) -> Result<Self, SheetError> {
        template.validate()?;
        let recognizer = &collaborators.recognizer;

        let mut questions = Vec::with_capacity(template.regions.len());
        for region in &template.regions {
            let text = recognizer
                .extract(question_paper, region.question_bbox, Extraction::Printed)
                .unwrap_or_else(|e| {
                    tracing::warn!("Q{}: failed to read question text: {}", region.q_no, e);
                    String::new()
                });
            let text = text.trim().to_string();

            let read_key = match region.key_bbox {
                Some(bbox) => recognizer
                    .extract(answer_key, bbox, Extraction::Printed)
                    .unwrap_or_else(|e| {
                        tracing::warn!("Q{}: failed to read key: {}", region.q_no, e);
                        String::new()
                    }),
                None => String::new(),
            };

            let mut key = clean_key(&read_key);
            if needs_generated_key(&key, region.kind) {
                tracing::warn!("Q{}: key missing or unreadable, generating it", region.q_no);
                match collaborators.keys.generate_key(&text, region.kind) {
                    Ok(generated) => key = clean_key(&generated),
                    Err(e) => tracing::error!("Q{}: key generation failed: {}", region.q_no, e),
                }
            }
            if region.kind == QuestionType::Mcq {
                if let Some(option) = first_option(&key) {
                    key = option.to_string();
                }
            }

            tracing::debug!("Q{}: key {:?}", region.q_no, key);
            questions.push(PreparedQuestion { text, key });
        }

        Ok(Self {
            template,
            questions,
            recognizer: collaborators.recognizer.clone(),
            grader: collaborators.grader.clone(),
        })
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn language(&self) -> &'static str {
        LANGUAGE
    }

    /// Key answers in template order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.questions.iter().map(|q| q.key.as_str())
    }

    /// Grade one sheet. Per-question failures are recorded in the report
    /// instead of failing the sheet.
    pub fn evaluate(&self, student_id: &str, sheet: &RgbImage) -> StudentReport {
        let mut details = Vec::with_capacity(self.questions.len());

        for (region, question) in self.template.regions.iter().zip(&self.questions) {
            let raw = self
                .recognizer
                .extract(sheet, region.answer_bbox, Extraction::Answer(region.kind))
                .unwrap_or_else(|e| {
                    tracing::warn!("{} Q{}: failed to read answer: {}", student_id, region.q_no, e);
                    String::new()
                });
            let student_answer = clean_answer(&raw, region.kind);

            let (score, feedback, reason_for_wrong) =
                match self.grader.score(&question.text, &question.key, &student_answer) {
                    Ok(result) => {
                        let score = result.score.min(1);
                        let reason_for_wrong = if score == 0 {
                            result.reason.clone()
                        } else {
                            "N/A".to_string()
                        };
                        (score, result.reason, reason_for_wrong)
                    }
                    Err(e) => {
                        tracing::error!("{} Q{}: scoring failed: {}", student_id, region.q_no, e);
                        (0, e.to_string(), SCORING_FAILED.to_string())
                    }
                };

            details.push(QuestionResult {
                q_no: region.q_no,
                kind: region.kind,
                student_answer,
                key_answer: question.key.clone(),
                score,
                feedback,
                correct_answer: question.key.clone(),
                reason_for_wrong,
            });
        }

        let points: u32 = details.iter().map(|d| d.score).sum();
        tracing::info!("{}: scored {}/{}", student_id, points, details.len());

        StudentReport {
            student_id: student_id.to_string(),
            language: LANGUAGE.to_string(),
            total_score: format!("{}/{}", points, details.len()),
            details,
        }
    }
}

/// Drop quotes, periods and commas, then surrounding whitespace
pub fn clean_key(raw: &str) -> String {
    strip_punctuation(raw).trim().to_string()
}

/// A key is usable with two or more alphanumerics, or as a lone option
/// letter for multiple choice
pub fn needs_generated_key(key: &str, kind: QuestionType) -> bool {
    if kind == QuestionType::Mcq && is_option_letter(key) {
        return false;
    }
    key.chars().filter(|c| c.is_ascii_alphanumeric()).count() < 2
}

/// Normalize a recognized student answer for comparison and reporting
pub fn clean_answer(raw: &str, kind: QuestionType) -> String {
    let answer = strip_punctuation(&raw.to_uppercase()).trim().to_string();
    if kind == QuestionType::Mcq && answer.chars().count() > 1 {
        return first_option(&answer)
            .map(String::from)
            .unwrap_or_else(|| NO_MARK.to_string());
    }
    answer
}

/// First option letter that stands alone as a word, ignoring case
pub fn first_option(text: &str) -> Option<char> {
    let chars: Vec<char> = text.to_uppercase().chars().collect();
    let is_word = |c: &char| c.is_alphanumeric() || *c == '_';

    chars.iter().enumerate().find_map(|(i, c)| {
        let before = i.checked_sub(1).and_then(|j| chars.get(j));
        let after = chars.get(i + 1);
        let standalone = !before.is_some_and(is_word) && !after.is_some_and(is_word);
        (OPTIONS.contains(c) && standalone).then_some(*c)
    })
}

fn is_option_letter(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(
        (chars.next(), chars.next()),
        (Some(c), None) if OPTIONS.contains(&c.to_ascii_uppercase())
    )
}

fn strip_punctuation(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '"' | '.' | ',')).collect()
}
