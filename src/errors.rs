use crate::{
    handlers::convert_handlers::ConvertRequestError,
    services::{artifact_store::RedeemError, converter::ConversionError},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
///
/// An empty message renders as a bare status with no body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Status code only, no body.
    pub fn bare(status: StatusCode) -> Self {
        Self::new(status, String::new())
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.status)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.message.is_empty() {
            return self.status.into_response();
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

/// Download failures carry no body: 404 for unknown ids, 410 once consumed.
impl From<RedeemError> for AppError {
    fn from(err: RedeemError) -> Self {
        match err {
            RedeemError::NotFound(_) => AppError::bare(StatusCode::NOT_FOUND),
            RedeemError::Gone(_) => AppError::bare(StatusCode::GONE),
        }
    }
}

/// Request validation failures are the client's fault; multipart errors keep
/// the status axum chose for them (400, 413, ...).
impl From<ConvertRequestError> for AppError {
    fn from(err: ConvertRequestError) -> Self {
        match err {
            ConvertRequestError::Multipart(e) => AppError::new(e.status(), e.body_text()),
            other => AppError::bad_request(other.to_string()),
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        AppError::internal(format!("Conversion error: {}", err))
    }
}
