//! Error handling for the capture synchronization core

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name resolution or socket creation failed
    #[error("Unreachable: {0}")]
    Unreachable(String),

    /// Reply deadline missed
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Slave answered NO to a READY or START
    #[error("Slave not armed")]
    NotArmed,

    /// Unexpected reply bytes (policy-equivalent to a timeout)
    #[error("Malformed reply: {0}")]
    Malformed(String),

    /// Camera pipeline (re)initialization failed
    #[error("Camera init failed: {0}")]
    CameraInit(String),

    /// Capture queue full or slot already armed
    #[error("Capture busy")]
    Busy,

    /// Capture sequence failure with its diagnostic string
    #[error("{0}")]
    Capture(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::Busy => (StatusCode::CONFLICT, "CAPTURE_BUSY", "capture busy".to_string()),
            Error::NotArmed => (StatusCode::CONFLICT, "NOT_ARMED", self.to_string()),
            Error::Unreachable(msg) => (StatusCode::BAD_GATEWAY, "UNREACHABLE", msg.clone()),
            Error::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, "TIMEOUT", msg.clone()),
            Error::Malformed(msg) => (StatusCode::BAD_GATEWAY, "MALFORMED", msg.clone()),
            Error::CameraInit(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CAMERA_INIT",
                msg.clone(),
            ),
            Error::Capture(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "CAPTURE", msg.clone()),
            Error::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERIALIZATION_ERROR",
                e.to_string(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Io(e) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", e.to_string()),
            Error::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg.clone(),
            ),
        };

        tracing::error!(
            status = %status,
            error_code = %error_code,
            message = %message,
            "Request error"
        );

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}
