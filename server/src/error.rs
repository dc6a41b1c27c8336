use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use tts_core::SynthError;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Synthesis failed: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl From<SynthError> for ApiError {
    fn from(err: SynthError) -> Self {
        match err {
            SynthError::EmptyText => ApiError::InvalidInput("Text cannot be empty".to_string()),
            // {:#} renders the full context chain
            SynthError::Upstream(e) => ApiError::Upstream(format!("{e:#}")),
        }
    }
}

/// Error response structure
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message, detail) = match self {
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None)
            }
            ApiError::Upstream(msg) => {
                tracing::error!("Upstream synthesis error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Synthesis failed".to_string(),
                    Some(msg),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg, None)
            }
        };

        let body = Json(ErrorResponse {
            error: error_message,
            code: status.as_u16(),
            detail,
        });

        (status, body).into_response()
    }
}
