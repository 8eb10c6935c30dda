use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest { code: &'static str, message: String },
    #[error("unauthorized: {message}")]
    Unauthorized {
        code: &'static str,
        message: &'static str,
    },
    #[error("session not found")]
    InvalidSession,
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },
    #[error("service unavailable")]
    Unavailable,
    #[error("internal error")]
    Internal { code: &'static str, message: String },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(code: &'static str, message: &'static str) -> Self {
        Self::Unauthorized { code, message }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            code: "stream_conflict",
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            code: "internal_error",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::InvalidSession => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing code and message. Internal details never leave the process.
    pub fn public_parts(&self) -> (&'static str, String) {
        match self {
            Self::BadRequest { code, message } => (*code, message.clone()),
            Self::Unauthorized { code, message } => (*code, message.to_string()),
            Self::InvalidSession => (
                "invalid_session",
                "session not found or already closed".to_string(),
            ),
            Self::Conflict { code, message } => (*code, message.clone()),
            Self::Unavailable => ("shutting_down", "server is shutting down".to_string()),
            Self::Internal { code, .. } => (*code, "internal server error".to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Self::Internal { message, .. } = &self {
            tracing::error!(error = %message, "request failed with internal error");
        }
        let status = self.status();
        let (code, message) = self.public_parts();

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}
