use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod http;
pub mod logging;
pub mod mcp;
pub mod session;
pub mod upstream;

use dispatch::ToolDispatcher;
use session::SessionManager;

#[derive(Clone)]
pub struct AppState {
    pub api_token: Arc<str>,
    pub sessions: Arc<SessionManager>,
    pub dispatcher: Arc<ToolDispatcher>,
}

impl AppState {
    pub fn new(
        api_token: String,
        sessions: Arc<SessionManager>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Self {
        Self {
            api_token: Arc::<str>::from(api_token),
            sessions,
            dispatcher,
        }
    }
}

pub fn build_app(state: AppState) -> Router {
    let protected = Router::new()
        .route(
            "/mcp",
            post(http::handlers::mcp_post)
                .get(http::handlers::mcp_get)
                .delete(http::handlers::mcp_delete),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer_token,
        ));

    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .merge(protected)
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        dispatch::rate_limiter::RateLimitConfig,
        domain::registry::ToolRegistry,
        http::handlers::SESSION_HEADER,
        session::SessionSettings,
    };

    use super::*;

    const TOKEN: &str = "token-1234567890ab";
    const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-06-18","clientInfo":{"name":"test-client","version":"1.0.0"},"capabilities":{}}}"#;

    fn state() -> AppState {
        AppState::new(
            TOKEN.to_string(),
            Arc::new(SessionManager::new(SessionSettings {
                heartbeat_interval: Duration::from_secs(30),
                idle_timeout: None,
            })),
            Arc::new(ToolDispatcher::new(
                ToolRegistry::standard(None),
                RateLimitConfig::default(),
            )),
        )
    }

    fn app() -> Router {
        build_app(state())
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("request execution");
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        let json = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).expect("valid json response")
        };
        (status, headers, json)
    }

    fn mcp_request(method: &str, session_id: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .uri("/mcp")
            .method(method)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        if let Some(session_id) = session_id {
            builder = builder.header(SESSION_HEADER, session_id);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request build")
    }

    async fn initialize(app: &Router) -> String {
        let (status, headers, _) = send(app, mcp_request("POST", None, INITIALIZE)).await;
        assert_eq!(status, StatusCode::OK);
        headers
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .expect("session header")
            .to_string()
    }

    async fn call_tool(app: &Router, session_id: &str, id: u64, name: &str, arguments: Value) -> Value {
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments},
        });
        let (status, _, json) = send(
            app,
            mcp_request("POST", Some(session_id), &body.to_string()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        json
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, _, body) = send(
            &app(),
            Request::builder()
                .uri("/health")
                .method("GET")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tools"], 10);
    }

    #[tokio::test]
    async fn discovery_is_public() {
        let (status, _, body) = send(
            &app(),
            Request::builder()
                .uri("/.well-known/mcp")
                .method("GET")
                .body(Body::empty())
                .expect("request build"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mcp_endpoint"], "/mcp");
        assert_eq!(body["session_header"], SESSION_HEADER);
    }

    #[tokio::test]
    async fn mcp_requires_token() {
        let (status, _, body) = send(
            &app(),
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(INITIALIZE))
                .expect("request build"),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "missing_token");
    }

    #[tokio::test]
    async fn mcp_rejects_wrong_token() {
        let (status, _, body) = send(
            &app(),
            Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::AUTHORIZATION, "Bearer not-the-token")
                .body(Body::from(INITIALIZE))
                .expect("request build"),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "invalid_token");
    }

    #[tokio::test]
    async fn malformed_json_is_a_parse_error() {
        let (status, _, body) = send(&app(), mcp_request("POST", None, "{not json")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn initialize_returns_session_and_capabilities() {
        let app = app();
        let (status, headers, body) = send(&app, mcp_request("POST", None, INITIALIZE)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SESSION_HEADER).is_some());
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2025-06-18");
        assert_eq!(body["result"]["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
        assert!(body["result"]["capabilities"]["tools"].is_object());
        assert!(body["result"]["capabilities"]["resources"].is_null());
    }

    #[tokio::test]
    async fn each_initialize_creates_a_new_session() {
        let app = app();
        let first = initialize(&app).await;
        let second = initialize(&app).await;

        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn unsupported_protocol_version_discards_session() {
        let state = state();
        let app = build_app(state.clone());
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"1999-01-01","clientInfo":{"name":"c","version":"1"},"capabilities":{}}}"#;

        let (status, headers, json) = send(&app, mcp_request("POST", None, body)).await;

        assert_eq!(status, StatusCode::OK);
        assert!(headers.get(SESSION_HEADER).is_none());
        assert_eq!(json["error"]["code"], -32602);
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn non_initialize_without_session_is_bad_request() {
        let (status, _, body) = send(
            &app(),
            mcp_request("POST", None, r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "session_required");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (status, _, body) = send(
            &app(),
            mcp_request(
                "POST",
                Some("00000000-0000-4000-8000-000000000000"),
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "invalid_session");
    }

    #[tokio::test]
    async fn undecodable_or_blank_session_header_never_creates_a_session() {
        let state = state();
        let app = build_app(state.clone());

        for value in [
            HeaderValue::from_bytes(b"\xffbogus").expect("opaque header value"),
            HeaderValue::from_static("   "),
        ] {
            let request = Request::builder()
                .uri("/mcp")
                .method("POST")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
                .header(SESSION_HEADER, value)
                .body(Body::from(INITIALIZE))
                .expect("request build");

            let (status, headers, body) = send(&app, request).await;

            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["code"], "invalid_session");
            assert!(headers.get(SESSION_HEADER).is_none());
        }
        assert!(state.sessions.is_empty());
    }

    #[tokio::test]
    async fn blank_session_header_on_get_is_not_found() {
        let (status, _, body) = send(&app(), mcp_request("GET", Some("  "), "")).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "invalid_session");
    }

    #[tokio::test]
    async fn initialize_on_established_session_is_rejected() {
        let state = state();
        let app = build_app(state.clone());
        let session_id = initialize(&app).await;

        let (status, _, body) = send(&app, mcp_request("POST", Some(&session_id), INITIALIZE)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(body["error"]["message"], "session already initialized");
        assert!(body.get("result").is_none());
        assert_eq!(state.sessions.len(), 1);

        let batch = format!("[{INITIALIZE}]");
        let (_, _, body) = send(&app, mcp_request("POST", Some(&session_id), &batch)).await;
        assert_eq!(body[0]["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn tools_list_names_every_tool_once() {
        let app = app();
        let session_id = initialize(&app).await;

        let (status, headers, body) = send(
            &app,
            mcp_request(
                "POST",
                Some(&session_id),
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()),
            Some(session_id.as_str())
        );
        let names = body["result"]["tools"]
            .as_array()
            .expect("tools array")
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "search-leads",
                "enrich-lead",
                "search-contacts",
                "get-contact",
                "create-contact",
                "search-deals",
                "get-deal",
                "create-deal",
                "list-sequences",
                "add-to-sequence",
            ]
        );
    }

    #[tokio::test]
    async fn initialized_notification_is_accepted_and_activates_session() {
        let state = state();
        let app = build_app(state.clone());
        let session_id = initialize(&app).await;

        let (status, _, body) = send(
            &app,
            mcp_request(
                "POST",
                Some(&session_id),
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            ),
        )
        .await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, Value::Null);
        let session = state.sessions.get(&session_id).expect("session");
        assert_eq!(session.state(), session::SessionState::Active);
    }

    #[tokio::test]
    async fn search_leads_without_criteria_is_a_tool_error() {
        let app = app();
        let session_id = initialize(&app).await;

        let body = call_tool(&app, &session_id, 3, "search-leads", json!({})).await;

        assert_eq!(body["id"], 3);
        assert_eq!(body["result"]["isError"], true);
        assert_eq!(
            body["result"]["structuredContent"]["errorCode"],
            "INVALID_PARAMETERS"
        );
        assert!(body["result"]["content"][0]["text"]
            .as_str()
            .expect("text")
            .contains("At least one search criterion is required"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_error() {
        let app = app();
        let session_id = initialize(&app).await;

        let body = call_tool(&app, &session_id, 4, "drop-everything", json!({})).await;

        assert_eq!(body["result"]["isError"], true);
        assert!(body["result"]["content"][0]["text"]
            .as_str()
            .expect("text")
            .contains("drop-everything"));
    }

    #[tokio::test]
    async fn mock_mode_read_succeeds_and_write_is_refused() {
        let app = app();
        let session_id = initialize(&app).await;

        let read = call_tool(
            &app,
            &session_id,
            5,
            "search-leads",
            json!({"person_titles": ["CTO"]}),
        )
        .await;
        assert!(read["result"].get("isError").is_none());
        assert_eq!(read["result"]["structuredContent"]["data"]["mock"], true);
        assert!(read["result"]["structuredContent"]["requestId"].is_string());

        let write = call_tool(
            &app,
            &session_id,
            6,
            "create-deal",
            json!({"name": "Pilot"}),
        )
        .await;
        assert_eq!(write["result"]["isError"], true);
        assert_eq!(write["result"]["structuredContent"]["errorCode"], "MOCK_MODE");
    }

    #[tokio::test]
    async fn batch_on_established_session_answers_requests_only() {
        let app = app();
        let session_id = initialize(&app).await;
        let batch = json!([
            {"jsonrpc": "2.0", "id": 10, "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": 11, "method": "nope"},
        ]);

        let (status, _, body) = send(
            &app,
            mcp_request("POST", Some(&session_id), &batch.to_string()),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let responses = body.as_array().expect("batch response");
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 10);
        assert_eq!(responses[1]["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn delete_terminates_session() {
        let app = app();
        let session_id = initialize(&app).await;

        let (status, _, _) = send(&app, mcp_request("DELETE", Some(&session_id), "")).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _, _) = send(
            &app,
            mcp_request(
                "POST",
                Some(&session_id),
                r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _, _) = send(&app, mcp_request("DELETE", Some(&session_id), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_without_session_header_is_bad_request() {
        let (status, _, body) = send(&app(), mcp_request("DELETE", None, "")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "missing_session");
    }

    #[tokio::test]
    async fn second_stream_on_a_session_conflicts() {
        let app = app();
        let session_id = initialize(&app).await;

        let first = app
            .clone()
            .oneshot(mcp_request("GET", Some(&session_id), ""))
            .await
            .expect("request execution");
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(
            first
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let (status, _, body) = send(&app, mcp_request("GET", Some(&session_id), "")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "stream_conflict");

        drop(first);
    }

    #[tokio::test]
    async fn stream_for_unknown_session_is_not_found() {
        let (status, _, _) = send(&app(), mcp_request("GET", Some("missing"), "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
