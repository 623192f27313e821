use super::{BoundingBox, Extraction, Grader, KeyGenerator, QuestionType, Recognizer, Score};
use crate::config::GeminiConfig;
use crate::error::SheetError;
use crate::preprocessing::encode_png;
use base64::{engine::general_purpose, Engine as _};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;

/// Client for the hosted Gemini `generateContent` endpoint.
///
/// Blocking; call it from worker threads, not from the async runtime.
pub struct GeminiClient {
    agent: ureq::Agent,
    config: GeminiConfig,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct ScoreReply {
    score: f64,
    #[serde(default)]
    reason: String,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.timeout))
            .build()
            .into();
        Self { agent, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn generate(
        &self,
        parts: Vec<Part>,
        schema: Option<serde_json::Value>,
    ) -> Result<String, SheetError> {
        let start = Instant::now();
        let body = build_request(parts, self.config.temperature, schema);
        let body = serde_json::to_string(&body)
            .map_err(|e| SheetError::Internal(format!("Failed to encode request: {}", e)))?;

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .agent
            .post(url.as_str())
            .header("x-goog-api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .send(body.as_bytes())
            .map_err(|e| SheetError::Recognition(format!("Model request failed: {}", e)))?;

        let text = response
            .into_body()
            .read_to_string()
            .map_err(|e| SheetError::Recognition(format!("Failed to read model reply: {}", e)))?;

        let reply: GenerateResponse = serde_json::from_str(&text)
            .map_err(|e| SheetError::Recognition(format!("Unexpected model reply: {}", e)))?;

        tracing::debug!(
            "{} replied in {}ms",
            self.config.model,
            start.elapsed().as_millis()
        );
        reply_text(reply)
    }
}

impl Recognizer for GeminiClient {
    fn extract(
        &self,
        image: &RgbImage,
        region: BoundingBox,
        extraction: Extraction,
    ) -> Result<String, SheetError> {
        let crop = region.crop(image)?;
        let png = encode_png(&crop)?;

        let parts = vec![
            Part {
                text: Some(extraction_prompt(extraction).to_string()),
                ..Default::default()
            },
            Part {
                inline_data: Some(InlineData {
                    mime_type: "image/png".to_string(),
                    data: general_purpose::STANDARD.encode(png),
                }),
                ..Default::default()
            },
        ];

        Ok(self.generate(parts, None)?.trim().to_string())
    }
}

impl KeyGenerator for GeminiClient {
    fn generate_key(&self, question: &str, kind: QuestionType) -> Result<String, SheetError> {
        let prompt = key_prompt(question, kind);
        Ok(self.generate(vec![text_part(prompt)], None)?.trim().to_string())
    }
}

impl Grader for GeminiClient {
    fn score(
        &self,
        question: &str,
        key_answer: &str,
        student_answer: &str,
    ) -> Result<Score, SheetError> {
        let prompt = score_prompt(question, key_answer, student_answer);
        let reply = self.generate(vec![text_part(prompt)], Some(score_schema()))?;
        parse_score(&reply)
    }
}

fn text_part(text: String) -> Part {
    Part {
        text: Some(text),
        ..Default::default()
    }
}

fn build_request(
    parts: Vec<Part>,
    temperature: f32,
    schema: Option<serde_json::Value>,
) -> GenerateRequest {
    GenerateRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts,
        }],
        generation_config: GenerationConfig {
            temperature,
            response_mime_type: schema.as_ref().map(|_| "application/json".to_string()),
            response_schema: schema,
        },
    }
}

/// Concatenated text of the first candidate
fn reply_text(reply: GenerateResponse) -> Result<String, SheetError> {
    let content = reply
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .ok_or_else(|| SheetError::Recognition("Model returned no candidates".to_string()))?;

    Ok(content
        .parts
        .into_iter()
        .filter_map(|p| p.text)
        .collect::<Vec<_>>()
        .join(""))
}

fn parse_score(reply: &str) -> Result<Score, SheetError> {
    let parsed: ScoreReply = serde_json::from_str(reply.trim())
        .map_err(|e| SheetError::Recognition(format!("Unparsable score {:?}: {}", reply, e)))?;
    Ok(Score {
        score: parsed.score.max(0.0).round() as u32,
        reason: parsed.reason,
    })
}

fn score_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "score": {"type": "INTEGER", "description": "The assigned score (0 or 1)."},
            "reason": {"type": "STRING", "description": "The reason for the assigned score."}
        },
        "required": ["score", "reason"]
    })
}

fn extraction_prompt(extraction: Extraction) -> &'static str {
    match extraction {
        Extraction::Printed => {
            "Transcribe ONLY the printed text in this image region, exactly as written. \
             Return nothing else."
        }
        Extraction::Answer(QuestionType::Mcq) => {
            "Analyze this image region from a student's answer sheet. Identify the mark inside \
             or next to the answer box and provide ONLY the corresponding option letter \
             (A, B, or C). If no clear mark is present, return 'X'."
        }
        Extraction::Answer(QuestionType::Fillblank) => {
            "Analyze this image region from a student's answer sheet. Extract ONLY the \
             handwritten answer (word or number) for the fill-in-the-blank question."
        }
        Extraction::Answer(QuestionType::Descriptive) => {
            "Analyze this image region from a student's answer sheet. Extract ALL the \
             handwritten text written by the student."
        }
    }
}

fn key_prompt(question: &str, kind: QuestionType) -> String {
    match kind {
        QuestionType::Mcq => format!(
            "Provide ONLY the correct option letter (A, B, or C) for the following question: {}",
            question
        ),
        QuestionType::Fillblank => format!(
            "Provide ONLY the single correct word or short phrase that correctly completes \
             the following question: {}",
            question
        ),
        QuestionType::Descriptive => format!(
            "Provide a brief, concise, and complete reference answer for the following \
             question: {}",
            question
        ),
    }
}

fn score_prompt(question: &str, key_answer: &str, student_answer: &str) -> String {
    format!(
        "You are an expert examiner. Compare a student's answer against the correct key \
         answer for a question. Score the answer as 1 (Correct) or 0 (Incorrect) based on \
         semantic meaning, then give a brief, professional reason for the score.\n\n\
         Question: \"{}\"\n\
         Correct Key Answer: \"{}\"\n\
         Student Answer: \"{}\"\n\n\
         Reply strictly as a JSON object: {{\"score\": 0 or 1, \"reason\": \"...\"}}",
        question.trim(),
        key_answer.trim(),
        student_answer.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let request = build_request(
            vec![
                text_part("hello".to_string()),
                Part {
                    inline_data: Some(InlineData {
                        mime_type: "image/png".to_string(),
                        data: "AAAA".to_string(),
                    }),
                    ..Default::default()
                },
            ],
            0.0,
            None,
        );
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(
            value["contents"][0]["parts"][1]["inlineData"]["mimeType"],
            "image/png"
        );
        assert!(value["contents"][0]["parts"][0].get("inlineData").is_none());
        assert!(value["generationConfig"].get("responseSchema").is_none());
    }

    #[test]
    fn test_schema_request_asks_for_json() {
        let request = build_request(vec![text_part("q".to_string())], 0.0, Some(score_schema()));
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(
            value["generationConfig"]["responseSchema"]["properties"]["score"]["type"],
            "INTEGER"
        );
    }

    #[test]
    fn test_reply_text_joins_parts() {
        let reply: GenerateResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"role": "model",
                "parts": [{"text": "Par"}, {"text": "is"}]}}]}"#,
        )
        .unwrap();
        assert_eq!(reply_text(reply).unwrap(), "Paris");
    }

    #[test]
    fn test_empty_reply_is_error() {
        let reply: GenerateResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(matches!(reply_text(reply), Err(SheetError::Recognition(_))));
    }

    #[test]
    fn test_parse_score() {
        let score = parse_score(r#" {"score": 1, "reason": "Same meaning"} "#).unwrap();
        assert_eq!(score.score, 1);
        assert_eq!(score.reason, "Same meaning");

        assert_eq!(parse_score(r#"{"score": -1}"#).unwrap().score, 0);
        assert!(parse_score("correct").is_err());
    }

    #[test]
    fn test_prompts_follow_question_type() {
        assert!(key_prompt("2+2?", QuestionType::Mcq).contains("option letter"));
        assert!(key_prompt("2+2?", QuestionType::Fillblank).ends_with("2+2?"));
        assert!(extraction_prompt(Extraction::Answer(QuestionType::Mcq)).contains("'X'"));
        assert!(score_prompt(" q ", "k", "s").contains("Question: \"q\""));
    }
}
