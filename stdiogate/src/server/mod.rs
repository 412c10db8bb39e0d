//! HTTP transport.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | POST   | `{path}` | Submit one JSON-RPC message; opens a session when no `Mcp-Session-Id` is sent |
//! | GET    | `{path}` | Attach the session's response stream (SSE or NDJSON) |
//! | DELETE | `{path}` | Close the session |
//! | GET    | `/health`, `/ready` | Probes |
//! | GET    | `/metrics` | OpenMetrics exposition |
//!
//! Client-facing failures are answered with a JSON-RPC error body and an
//! HTTP status that reflects the error class.

mod stream;

pub use stream::NDJSON_CONTENT_TYPE;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, State, rejection::BytesRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use prometheus_client::registry::Registry;
use stdiogate_core::jsonrpc::{JsonRpcId, JsonRpcMessageKind};
use stdiogate_core::lifecycle::{LifecycleManager, health_router};
use stdiogate_core::GatewayError;
use tracing::{debug, error, warn};

use crate::config::TransportMode;
use crate::framing::parse_body;
use crate::router::{CloseReason, MessageRouter};
use crate::session::SessionId;

/// Session header, as defined by the MCP streamable HTTP transport.
pub const SESSION_HEADER: &str = "mcp-session-id";

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub lifecycle: Arc<LifecycleManager>,
    pub prom_registry: Arc<Registry>,
    pub transport: TransportMode,
    pub keep_alive: Duration,
}

/// Build the full HTTP application.
pub fn app(state: AppState, path: &str, max_body_bytes: usize) -> Router {
    let lifecycle = state.lifecycle.clone();
    let mcp = Router::new()
        .route(
            path,
            post(handle_post).get(handle_stream).delete(handle_delete),
        )
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state);

    health_router(lifecycle).merge(mcp)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    if state.lifecycle.is_shutting_down() {
        return error_response(&state, GatewayError::ShuttingDown, JsonRpcId::Null);
    }

    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            let err = GatewayError::InvalidRequest {
                details: rejection.body_text(),
            };
            return error_response_with_status(&state, status, err, JsonRpcId::Null);
        }
    };

    let frame = match parse_body(&body) {
        Ok(frame) => frame,
        Err(e) => return error_response(&state, e.into(), JsonRpcId::Null),
    };
    let request_id = match &frame.kind {
        JsonRpcMessageKind::Request { id, .. } => id.clone(),
        _ => JsonRpcId::Null,
    };

    let (session_id, opened) = match session_header(&headers) {
        Some(Ok(id)) => (id, false),
        Some(Err(raw)) => {
            return error_response(
                &state,
                GatewayError::SessionClosed { session_id: raw },
                request_id,
            );
        }
        None => match state.router.open_session() {
            Ok(id) => (id, true),
            Err(err) => return error_response(&state, err, request_id),
        },
    };

    if let Err(err) = state.router.submit(&session_id, frame).await {
        if opened {
            state.router.close_session(&session_id, CloseReason::Disconnect);
        }
        return error_response(&state, err, request_id);
    }

    let mut response = StatusCode::ACCEPTED.into_response();
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = match require_session(&headers) {
        Ok(id) => id,
        Err(err) => return error_response(&state, err, JsonRpcId::Null),
    };
    let rx = match state.router.take_stream(&session_id) {
        Ok(rx) => rx,
        Err(err) => return error_response(&state, err, JsonRpcId::Null),
    };
    debug!(session_id = %session_id, transport = ?state.transport, "stream attached");

    let mut response = stream::session_stream(
        state.transport,
        state.keep_alive,
        state.router.clone(),
        session_id,
        rx,
    );
    if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

async fn handle_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let session_id = match require_session(&headers) {
        Ok(id) => id,
        Err(err) => return error_response(&state, err, JsonRpcId::Null),
    };
    if state.router.close_session(&session_id, CloseReason::Client) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(
            &state,
            GatewayError::SessionClosed {
                session_id: session_id.to_string(),
            },
            JsonRpcId::Null,
        )
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    let mut buffer = String::new();
    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, &state.prom_registry) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// `None` when absent; `Some(Err(raw))` when present but not a session id.
fn session_header(headers: &HeaderMap) -> Option<Result<SessionId, String>> {
    let value = headers.get(SESSION_HEADER)?;
    let raw = String::from_utf8_lossy(value.as_bytes()).into_owned();
    Some(raw.trim().parse::<SessionId>().map_err(|_| raw))
}

fn require_session(headers: &HeaderMap) -> Result<SessionId, GatewayError> {
    match session_header(headers) {
        Some(Ok(id)) => Ok(id),
        Some(Err(raw)) => Err(GatewayError::SessionClosed { session_id: raw }),
        None => Err(GatewayError::InvalidRequest {
            details: "missing Mcp-Session-Id header".to_string(),
        }),
    }
}

/// HTTP status for a client-facing error.
pub fn status_for(err: &GatewayError) -> StatusCode {
    match err {
        GatewayError::ParseError { .. }
        | GatewayError::InvalidRequest { .. }
        | GatewayError::MethodNotFound { .. } => StatusCode::BAD_REQUEST,
        GatewayError::SessionClosed { .. } => StatusCode::NOT_FOUND,
        GatewayError::DuplicateId { .. } | GatewayError::StreamAlreadyAttached { .. } => {
            StatusCode::CONFLICT
        }
        GatewayError::ChildUnavailable { .. }
        | GatewayError::SessionLimitReached { .. }
        | GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::RequestTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::UnknownCorrelation { .. }
        | GatewayError::SessionOverflow { .. }
        | GatewayError::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(state: &AppState, err: GatewayError, id: JsonRpcId) -> Response {
    error_response_with_status(state, status_for(&err), err, id)
}

fn error_response_with_status(
    state: &AppState,
    status: StatusCode,
    err: GatewayError,
    id: JsonRpcId,
) -> Response {
    let correlation_id = uuid::Uuid::new_v4().to_string();
    warn!(
        correlation_id = %correlation_id,
        error_type = err.error_type_name(),
        status = status.as_u16(),
        error = %err,
        "rejecting client message"
    );
    state.router.metrics().record_client_error(err.error_type_name());
    (status, Json(err.to_response(id, &correlation_id).to_value())).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotificationPolicy;
    use crate::framing::{FrameReader, FrameWriter};
    use crate::router::RouterConfig;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use stdiogate_core::metrics::GatewayMetrics;
    use tokio::io::DuplexStream;
    use tower::ServiceExt;

    struct TestApp {
        app: Router,
        router: Arc<MessageRouter>,
        lifecycle: Arc<LifecycleManager>,
        child_stdin: FrameReader<DuplexStream>,
    }

    fn test_app(transport: TransportMode, max_sessions: usize) -> TestApp {
        let mut registry = Registry::default();
        let metrics = Arc::new(GatewayMetrics::new(&mut registry));
        let router = Arc::new(MessageRouter::new(
            RouterConfig {
                queue_capacity: 16,
                max_sessions,
                notification_policy: NotificationPolicy::Broadcast,
                marker_pointer: "/params/_meta/sessionId".to_string(),
            },
            metrics,
        ));
        let (gateway_side, child_side) = tokio::io::duplex(64 * 1024);
        router.attach_child(Arc::new(FrameWriter::new(gateway_side)));

        let lifecycle = Arc::new(LifecycleManager::new());
        let state = AppState {
            router: router.clone(),
            lifecycle: lifecycle.clone(),
            prom_registry: Arc::new(registry),
            transport,
            keep_alive: Duration::from_secs(15),
        };
        TestApp {
            app: app(state, "/mcp", 1024),
            router,
            lifecycle,
            child_stdin: FrameReader::new(child_side),
        }
    }

    fn post(session: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/mcp")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = session {
            builder = builder.header(SESSION_HEADER, id);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn with_session(method: &str, session: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri("/mcp")
            .header(SESSION_HEADER, session)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn session_of(response: &Response) -> String {
        response.headers()[SESSION_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_post_without_session_opens_one() {
        let mut t = test_app(TransportMode::Sse, 8);
        let response = t
            .app
            .clone()
            .oneshot(post(None, r#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let session = session_of(&response);
        assert!(t.router.is_open(&session.parse().unwrap()));

        let forwarded = t.child_stdin.next_frame().await.unwrap().unwrap();
        assert_eq!(forwarded.message["method"], "initialize");
    }

    #[tokio::test]
    async fn test_post_malformed_body() {
        let t = test_app(TransportMode::Sse, 8);
        let response = t.app.clone().oneshot(post(None, "{not json")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert!(body["id"].is_null());
        assert_eq!(t.router.session_count(), 0);
    }

    #[tokio::test]
    async fn test_post_batch_rejected() {
        let t = test_app(TransportMode::Sse, 8);
        let response = t
            .app
            .clone()
            .oneshot(post(None, r#"[{"jsonrpc":"2.0","id":1,"method":"a"}]"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_post_unknown_session() {
        let t = test_app(TransportMode::Sse, 8);
        let response = t
            .app
            .clone()
            .oneshot(post(
                Some(&SessionId::new().to_string()),
                r#"{"jsonrpc":"2.0","id":"q","method":"ping"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["id"], "q");
        assert_eq!(body["error"]["data"]["error_type"], "session_closed");
    }

    #[tokio::test]
    async fn test_body_limit_returns_413() {
        let t = test_app(TransportMode::Sse, 8);
        let padding = "x".repeat(2048);
        let body = format!(r#"{{"jsonrpc":"2.0","id":1,"method":"echo","params":"{padding}"}}"#);
        let response = t.app.clone().oneshot(post(None, &body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_session_limit_returns_503() {
        let t = test_app(TransportMode::Sse, 1);
        let note = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let first = t.app.clone().oneshot(post(None, note)).await.unwrap();
        assert_eq!(first.status(), StatusCode::ACCEPTED);

        let second = t.app.clone().oneshot(post(None, note)).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json_body(second).await["error"]["code"], -32006);
    }

    #[tokio::test]
    async fn test_post_while_shutting_down() {
        let t = test_app(TransportMode::Sse, 8);
        t.lifecycle.begin_shutdown();
        let response = t
            .app
            .clone()
            .oneshot(post(None, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            json_body(response).await["error"]["data"]["error_type"],
            "shutting_down"
        );
    }

    #[tokio::test]
    async fn test_second_stream_conflicts() {
        let t = test_app(TransportMode::Ndjson, 8);
        let session = t.router.open_session().unwrap().to_string();

        let first = t.app.clone().oneshot(with_session("GET", &session)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[header::CONTENT_TYPE], NDJSON_CONTENT_TYPE);

        let second = t.app.clone().oneshot(with_session("GET", &session)).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        drop(first);
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_session() {
        let t = test_app(TransportMode::Sse, 8);
        let id = t.router.open_session().unwrap();
        let response = t
            .app
            .clone()
            .oneshot(with_session("GET", &id.to_string()))
            .await
            .unwrap();
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert!(t.router.is_open(&id));
        drop(response);
        assert!(!t.router.is_open(&id));
    }

    #[tokio::test]
    async fn test_ndjson_stream_yields_lines() {
        let t = test_app(TransportMode::Ndjson, 8);
        let id = t.router.open_session().unwrap();
        let response = t
            .app
            .clone()
            .oneshot(with_session("GET", &id.to_string()))
            .await
            .unwrap();

        t.router
            .dispatch(crate::framing::parse_frame(r#"{"jsonrpc":"2.0","method":"hello"}"#).unwrap());
        let mut body = response.into_body();
        let chunk = body.frame().await.unwrap().unwrap().into_data().unwrap();
        let line = std::str::from_utf8(&chunk).unwrap();
        assert!(line.ends_with('\n'));
        let message: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(message["method"], "hello");
    }

    #[tokio::test]
    async fn test_delete_closes_session() {
        let t = test_app(TransportMode::Sse, 8);
        let id = t.router.open_session().unwrap().to_string();

        let response = t.app.clone().oneshot(with_session("DELETE", &id)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let again = t.app.clone().oneshot(with_session("DELETE", &id)).await.unwrap();
        assert_eq!(again.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_without_session_header() {
        let t = test_app(TransportMode::Sse, 8);
        let request = Request::builder()
            .method("GET")
            .uri("/mcp")
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let t = test_app(TransportMode::Sse, 8);
        t.router.open_session().unwrap();
        let request = Request::builder()
            .method("GET")
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("stdiogate_sessions_active 1"));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&GatewayError::DuplicateId { id: "1".into() }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&GatewayError::ChildUnavailable {
                reason: "gone".into()
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&GatewayError::RequestTimeout { timeout_ms: 1 }),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
