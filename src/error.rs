use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetError {
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Recognition failed: {0}")]
    Recognition(String),

    #[error("Failed to write report: {0}")]
    Report(String),

    #[error("Image too large: {size} bytes (max: {max} bytes)")]
    ImageTooLarge { size: usize, max: usize },

    #[error("Missing file in request")]
    MissingFile,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No recognizer configured (set GEMINI_API_KEY)")]
    RecognizerUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SheetError {
    /// Stable machine-readable code reported to HTTP clients
    pub fn code(&self) -> &'static str {
        match self {
            SheetError::InvalidImage(_) => "INVALID_IMAGE",
            SheetError::Configuration(_) => "CONFIGURATION_ERROR",
            SheetError::Template(_) => "TEMPLATE_ERROR",
            SheetError::Recognition(_) => "RECOGNITION_ERROR",
            SheetError::Report(_) => "REPORT_ERROR",
            SheetError::ImageTooLarge { .. } => "IMAGE_TOO_LARGE",
            SheetError::MissingFile => "MISSING_FILE",
            SheetError::InvalidRequest(_) => "INVALID_REQUEST",
            SheetError::RecognizerUnavailable => "RECOGNIZER_UNAVAILABLE",
            SheetError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            SheetError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SheetError::Configuration(_) | SheetError::Template(_) => StatusCode::BAD_REQUEST,
            SheetError::Recognition(_) => StatusCode::BAD_GATEWAY,
            SheetError::Report(_) | SheetError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SheetError::ImageTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SheetError::MissingFile | SheetError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            SheetError::RecognizerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for SheetError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_image_maps_to_unprocessable() {
        let response = SheetError::InvalidImage("zero area".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_missing_recognizer_maps_to_unavailable() {
        let err = SheetError::RecognizerUnavailable;
        assert_eq!(err.code(), "RECOGNIZER_UNAVAILABLE");
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
