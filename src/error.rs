/// Unified error types for Aurora Lens
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the indexer
#[derive(Error, Debug)]
pub enum LensError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Record payload failed lexicon-shape validation (permanent, not retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Outbound HTTP errors (PLC directory, PDS, tap service)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Firehose websocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON encode/decode errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// DID resolution errors (malformed DID or DID document)
    #[error("DID resolution error: {0}")]
    DidResolution(String),

    /// Admin API authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Job exceeded its execution timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error response format for the ops endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert LensError to HTTP response
impl IntoResponse for LensError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            LensError::Validation(_) => (
                StatusCode::BAD_REQUEST,
                "InvalidRequest",
                self.to_string(),
            ),
            LensError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                "NotFound",
                self.to_string(),
            ),
            LensError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            LensError::Database(_) | LensError::Internal(_) | LensError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for indexer operations
pub type LensResult<T> = Result<T, LensError>;
