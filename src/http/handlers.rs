//! Axum HTTP handlers for the web server
//!
//! Provides the session-aware Model Context Protocol endpoint (`POST`, `GET`,
//! and `DELETE /mcp`) and the public metadata endpoints.

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::{debug, warn};

use crate::errors::AppError;
use crate::mcp::rpc::{is_json_rpc_error, json_rpc_error, INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::server::{handle_json_rpc_value, is_notification, SessionPhase};
use crate::AppState;

pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub tools: usize,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub mcp_endpoint: &'static str,
    pub transport: &'static str,
    pub session_header: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
        tools: state.dispatcher.registry().len(),
    })
}

pub async fn discovery() -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        mcp_endpoint: "/mcp",
        transport: "streamable-http",
        session_header: SESSION_HEADER,
    })
}

pub async fn mcp_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => {
            return (
                StatusCode::OK,
                Json(json_rpc_error(None, PARSE_ERROR, "Parse error")),
            )
                .into_response()
        }
    };

    match session_header(&headers) {
        SessionHeader::Absent => handle_initialize(&state, payload).await,
        SessionHeader::Present(session_id) => handle_established(&state, session_id, payload).await,
        SessionHeader::Malformed => AppError::InvalidSession.into_response(),
    }
}

async fn handle_initialize(state: &AppState, payload: Value) -> Response {
    let session = match state.sessions.handle_initial(&payload) {
        Ok(session) => session,
        Err(err) => return AppError::from(err).into_response(),
    };

    match handle_json_rpc_value(state, payload, SessionPhase::Initializing).await {
        Some(response) if !is_json_rpc_error(&response) => {
            with_session_header(Json(response).into_response(), session.id())
        }
        outcome => {
            // A session whose initialize failed is never usable.
            let _ = state.sessions.terminate(session.id());
            debug!(session_id = %session.id(), "initialize failed, session discarded");
            match outcome {
                Some(response) => (StatusCode::OK, Json(response)).into_response(),
                None => AppError::bad_request(
                    "invalid_initialize",
                    "initialize must be sent as a request with an id",
                )
                .into_response(),
            }
        }
    }
}

async fn handle_established(state: &AppState, session_id: &str, payload: Value) -> Response {
    let lease = match state.sessions.handle_subsequent(session_id).await {
        Ok(lease) => lease,
        Err(err) => return AppError::from(err).into_response(),
    };

    if let Some(batch) = payload.as_array() {
        if batch.is_empty() {
            return (
                StatusCode::OK,
                Json(vec![json_rpc_error(None, INVALID_REQUEST, "Invalid Request")]),
            )
                .into_response();
        }

        let mut responses = Vec::new();
        for item in batch {
            let response =
                handle_json_rpc_value(state, item.clone(), SessionPhase::Established).await;
            if let Some(response) = response {
                responses.push(response);
            }
        }

        if !responses.iter().any(is_json_rpc_error) {
            lease.complete();
        }
        if responses.is_empty() {
            return with_session_header(StatusCode::ACCEPTED.into_response(), session_id);
        }
        return with_session_header(Json(Value::Array(responses)).into_response(), session_id);
    }

    let notification = is_notification(&payload);
    match handle_json_rpc_value(state, payload, SessionPhase::Established).await {
        Some(response) => {
            if !is_json_rpc_error(&response) {
                lease.complete();
            }
            with_session_header(Json(response).into_response(), session_id)
        }
        None => {
            if notification {
                lease.complete();
            }
            with_session_header(StatusCode::ACCEPTED.into_response(), session_id)
        }
    }
}

pub async fn mcp_get(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let session_id = require_session_id(&headers)?;
    let receiver = state.sessions.open_stream(session_id)?;

    let stream = ReceiverStream::new(receiver)
        .map(|message| Ok(Event::default().event("message").data(message.to_string())));

    Ok(Sse::new(stream))
}

pub async fn mcp_delete(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let session_id = require_session_id(&headers)?;
    state.sessions.terminate(session_id)?;
    Ok(StatusCode::NO_CONTENT)
}

enum SessionHeader<'a> {
    Absent,
    Present(&'a str),
    /// Sent but undecodable or blank; answered as an unknown session.
    Malformed,
}

fn session_header(headers: &HeaderMap) -> SessionHeader<'_> {
    let Some(value) = headers.get(SESSION_HEADER) else {
        return SessionHeader::Absent;
    };
    match value.to_str().map(str::trim) {
        Ok(session_id) if !session_id.is_empty() => SessionHeader::Present(session_id),
        _ => SessionHeader::Malformed,
    }
}

fn require_session_id(headers: &HeaderMap) -> Result<&str, AppError> {
    match session_header(headers) {
        SessionHeader::Present(session_id) => Ok(session_id),
        SessionHeader::Malformed => Err(AppError::InvalidSession),
        SessionHeader::Absent => Err(AppError::bad_request(
            "missing_session",
            "mcp-session-id header is required",
        )),
    }
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    match HeaderValue::from_str(session_id) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Err(_) => warn!("session id is not a valid header value"),
    }
    response
}
