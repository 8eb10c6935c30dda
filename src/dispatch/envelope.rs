//! Canonical success/error envelope returned by every tool call
//!
//! Every outcome of the dispatch core, whether produced by validation,
//! throttling, or the handler itself, is normalized into a `ResponseEnvelope`.

use std::fmt;

use rust_mcp_sdk::schema::{CallToolResult, ContentBlock, TextContent};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DEFAULT_SUCCESS_MESSAGE: &str = "Operation completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    RateLimitExceeded,
    InvalidParameters,
    ApiError,
    AuthenticationFailed,
    NetworkError,
    MockMode,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 7] = [
        ErrorCode::RateLimitExceeded,
        ErrorCode::InvalidParameters,
        ErrorCode::ApiError,
        ErrorCode::AuthenticationFailed,
        ErrorCode::NetworkError,
        ErrorCode::MockMode,
        ErrorCode::InternalError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidParameters => "INVALID_PARAMETERS",
            Self::ApiError => "API_ERROR",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::NetworkError => "NETWORK_ERROR",
            Self::MockMode => "MOCK_MODE",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    fn default_message(self) -> &'static str {
        match self {
            Self::RateLimitExceeded => "Rate limit exceeded, please retry later",
            Self::InvalidParameters => "Invalid parameters",
            Self::ApiError => "The upstream API returned an error",
            Self::AuthenticationFailed => "Authentication with the upstream API failed",
            Self::NetworkError => "Could not reach the upstream API",
            Self::MockMode => "Operation is not available in mock mode",
            Self::InternalError => "An unexpected internal error occurred",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single tool invocation.
///
/// Fields are private so that the two constructors are the only way to build
/// an envelope: `content` is never empty, and `error_code` is `Some` exactly
/// when `is_error` is true.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    content: Vec<String>,
    is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<ErrorCode>,
    request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl ResponseEnvelope {
    pub fn success(message: impl Into<String>, data: Option<Value>, request_id: impl Into<String>) -> Self {
        let message = non_blank(message.into(), DEFAULT_SUCCESS_MESSAGE);
        let mut content = vec![message];
        if let Some(rendered) = data.as_ref().and_then(render_data) {
            content.push(rendered);
        }

        Self {
            content,
            is_error: false,
            error_code: None,
            request_id: request_id.into(),
            data,
        }
    }

    pub fn error(message: impl Into<String>, code: ErrorCode, request_id: impl Into<String>) -> Self {
        Self {
            content: vec![non_blank(message.into(), code.default_message())],
            is_error: true,
            error_code: Some(code),
            request_id: request_id.into(),
            data: None,
        }
    }

    pub fn content(&self) -> &[String] {
        &self.content
    }

    pub fn message(&self) -> &str {
        &self.content[0]
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error_code
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn into_call_tool_result(self) -> CallToolResult {
        let mut structured = Map::new();
        structured.insert("requestId".to_string(), json!(self.request_id));
        if let Some(code) = self.error_code {
            structured.insert("errorCode".to_string(), json!(code));
        }
        if let Some(data) = self.data {
            structured.insert("data".to_string(), data);
        }

        CallToolResult {
            content: self
                .content
                .into_iter()
                .map(|text| ContentBlock::from(TextContent::new(text, None, None)))
                .collect(),
            is_error: self.is_error.then_some(true),
            meta: None,
            structured_content: Some(structured),
        }
    }
}

fn non_blank(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn render_data(data: &Value) -> Option<String> {
    if data.is_null() {
        return None;
    }
    serde_json::to_string_pretty(data).ok()
}
