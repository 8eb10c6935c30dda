//! Upstream CRM API client capability.
//!
//! Handlers talk to the CRM through the `CrmClient` trait. When no API key is
//! configured no client is built at all, and handlers fall back to their
//! offline mock path.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use serde_json::Value;
use tracing::debug;

use crate::domain::registry::HandlerError;

#[async_trait]
pub trait CrmClient: Send + Sync {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, HandlerError>;
    async fn post(&self, path: &str, body: Value) -> Result<Value, HandlerError>;
}

#[derive(Debug, Clone)]
pub struct HttpCrmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCrmClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, HandlerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| HandlerError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, HandlerError> {
        let response = request
            .header("X-Api-Key", &self.api_key)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;
        debug!(status = status.as_u16(), bytes = body.len(), "upstream response received");

        if !status.is_success() {
            return Err(map_status_error(status, &body));
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|_| HandlerError::Api {
            status: Some(status.as_u16()),
            message: "upstream API returned a malformed response".to_string(),
        })
    }
}

#[async_trait]
impl CrmClient for HttpCrmClient {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, HandlerError> {
        self.send(self.http.get(self.url(path)).query(query)).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, HandlerError> {
        self.send(self.http.post(self.url(path)).json(&body)).await
    }
}

fn map_transport_error(err: reqwest::Error) -> HandlerError {
    if err.is_timeout() {
        HandlerError::Network("upstream API request timed out".to_string())
    } else if err.is_connect() || err.is_request() {
        HandlerError::Network("could not connect to the upstream API".to_string())
    } else {
        HandlerError::Network(format!("upstream API transport failure: {err}"))
    }
}

fn map_status_error(status: StatusCode, body: &str) -> HandlerError {
    let detail = upstream_error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => HandlerError::Authentication(
            detail.unwrap_or_else(|| "upstream API rejected the configured API key".to_string()),
        ),
        StatusCode::TOO_MANY_REQUESTS => HandlerError::RateLimited(
            detail.unwrap_or_else(|| "upstream API rate limit reached".to_string()),
        ),
        _ => HandlerError::Api {
            status: Some(status.as_u16()),
            message: detail.unwrap_or_else(|| {
                format!(
                    "upstream API request failed with status {}",
                    status.as_u16()
                )
            }),
        },
    }
}

fn upstream_error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["error", "message", "error_message"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}
