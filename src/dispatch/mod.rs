//! Tool dispatch core
//!
//! Single entry point for `tools/call`: resolves the tool, applies rate
//! limiting and required-argument validation, invokes the handler, and turns
//! every outcome into a `ResponseEnvelope`. Nothing escapes this boundary as
//! an error or a panic.

pub mod envelope;
pub mod rate_limiter;

use std::{panic::AssertUnwindSafe, time::Instant};

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::registry::{HandlerError, ToolRegistry};
use envelope::{ErrorCode, ResponseEnvelope};
use rate_limiter::{RateLimitConfig, RateLimiter};

/// One dispatched call. The id is generated server-side for log correlation.
#[derive(Debug, Clone)]
pub struct ToolRequest {
    pub operation: String,
    pub arguments: Option<Map<String, Value>>,
    pub request_id: String,
}

impl ToolRequest {
    pub fn new(operation: impl Into<String>, arguments: Option<Map<String, Value>>) -> Self {
        Self {
            operation: operation.into(),
            arguments,
            request_id: Uuid::new_v4().to_string(),
        }
    }
}

pub struct ToolDispatcher {
    registry: ToolRegistry,
    limiter: RateLimiter,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, rate_limit: RateLimitConfig) -> Self {
        Self {
            registry,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn execute(
        &self,
        operation: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ResponseEnvelope {
        let request = ToolRequest::new(operation, arguments);
        let started_at = Instant::now();
        let envelope = self.dispatch(&request).await;
        let outcome = if envelope.is_error() { "failure" } else { "success" };

        info!(
            request_id = %request.request_id,
            tool = %request.operation,
            outcome,
            error_code = envelope.error_code().map(ErrorCode::as_str).unwrap_or("-"),
            duration_ms = started_at.elapsed().as_millis(),
            "tool call dispatched"
        );

        envelope
    }

    async fn dispatch(&self, request: &ToolRequest) -> ResponseEnvelope {
        let request_id = request.request_id.as_str();

        let Some(arguments) = request.arguments.as_ref() else {
            return ResponseEnvelope::error(
                format!("Missing arguments for tool: {}", request.operation),
                ErrorCode::InvalidParameters,
                request_id,
            );
        };

        let Some(registration) = self.registry.resolve(&request.operation) else {
            return ResponseEnvelope::error(
                format!("Unknown tool: {}", request.operation),
                ErrorCode::InvalidParameters,
                request_id,
            );
        };

        if !self.limiter.admit(registration.name).is_accepted() {
            let config = self.limiter.config();
            warn!(
                request_id,
                tool = registration.name,
                max_calls = config.max_calls,
                window_secs = config.window.as_secs(),
                "tool call rejected by rate limiter"
            );
            return ResponseEnvelope::error(
                format!(
                    "Rate limit exceeded for {}: at most {} calls per {} seconds. Please retry later.",
                    registration.name,
                    config.max_calls,
                    config.window.as_secs()
                ),
                ErrorCode::RateLimitExceeded,
                request_id,
            );
        }

        if let Some(missing) = registration
            .required
            .iter()
            .find(|field| arguments.get(**field).is_none_or(Value::is_null))
        {
            return ResponseEnvelope::error(
                format!("Missing required parameter: {missing}"),
                ErrorCode::InvalidParameters,
                request_id,
            );
        }

        let outcome = AssertUnwindSafe(registration.handler.call(registration.name, arguments))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(output)) => ResponseEnvelope::success(output.summary, Some(output.data), request_id),
            Ok(Err(failure)) => failure_envelope(registration.name, failure, request_id),
            Err(_) => {
                error!(request_id, tool = registration.name, "tool handler panicked");
                ResponseEnvelope::error(String::new(), ErrorCode::InternalError, request_id)
            }
        }
    }
}

/// Maps a handler failure onto the response taxonomy by its declared kind.
pub fn classify(failure: &HandlerError) -> ErrorCode {
    match failure {
        HandlerError::InvalidParameters(_) => ErrorCode::InvalidParameters,
        HandlerError::RateLimited(_) => ErrorCode::RateLimitExceeded,
        HandlerError::Authentication(_) => ErrorCode::AuthenticationFailed,
        HandlerError::Network(_) => ErrorCode::NetworkError,
        HandlerError::MockMode(_) => ErrorCode::MockMode,
        HandlerError::Api {
            status: Some(401 | 403),
            ..
        } => ErrorCode::AuthenticationFailed,
        HandlerError::Api {
            status: Some(429), ..
        } => ErrorCode::RateLimitExceeded,
        HandlerError::Api { .. } => ErrorCode::ApiError,
        HandlerError::Internal(_) => ErrorCode::InternalError,
    }
}

fn failure_envelope(tool: &str, failure: HandlerError, request_id: &str) -> ResponseEnvelope {
    let code = classify(&failure);
    match failure {
        HandlerError::Internal(detail) => {
            error!(request_id, tool, detail = %detail, "tool handler failed internally");
            ResponseEnvelope::error(String::new(), code, request_id)
        }
        HandlerError::InvalidParameters(message)
        | HandlerError::RateLimited(message)
        | HandlerError::Authentication(message)
        | HandlerError::Network(message)
        | HandlerError::MockMode(message)
        | HandlerError::Api { message, .. } => {
            warn!(request_id, tool, error_code = code.as_str(), "tool handler reported failure");
            ResponseEnvelope::error(message, code, request_id)
        }
    }
}
