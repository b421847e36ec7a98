use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing credentials or unusable settings.
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The messaging gateway rejected or failed a call.
    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("completion api rate limited: {0}")]
    RateLimited(String),

    #[error("completion api quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Any other completion API failure.
    #[error("provider error: {0}")]
    Provider(String),

    /// Speech-to-text or text-to-speech failure.
    #[error("speech error: {0}")]
    Speech(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
