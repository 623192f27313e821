use crate::preprocessing::EnhancementParameters;
use std::time::Duration;

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub max_file_size: usize,
    /// Parameters used when a request does not send its own
    pub enhancement: EnhancementParameters,
    /// Hosted model settings; grading endpoints are disabled without them
    pub gemini: Option<GeminiConfig>,
}

/// Connection settings for the hosted vision model
#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub endpoint: String,
    pub temperature: f32,
    pub timeout: Duration,
}

impl GeminiConfig {
    /// Settings for `api_key`, or `None` when the key is absent or blank
    pub fn from_key(api_key: Option<String>, model: Option<String>) -> Option<Self> {
        let api_key = api_key?.trim().to_string();
        if api_key.is_empty() {
            return None;
        }

        Some(Self {
            api_key,
            model: model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            endpoint: DEFAULT_GEMINI_ENDPOINT.to_string(),
            temperature: 0.0,
            timeout: Duration::from_secs(60),
        })
    }
}

// Keeps the key out of logs
impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
