//! Shared harness: an in-process gateway supervising the `mock_provider`
//! binary, driven over real HTTP with reqwest.

#![allow(dead_code)]

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde_json::{Value, json};
use stdiogate::config::{ChildCommand, GatewayConfig, TransportMode};
use stdiogate::gateway::{Gateway, RunningGateway};
use stdiogate::server::SESSION_HEADER;
use stdiogate_core::lifecycle::LifecycleManager;

pub const WAIT: Duration = Duration::from_secs(10);

pub fn provider_command() -> ChildCommand {
    ChildCommand {
        program: env!("CARGO_BIN_EXE_mock_provider").to_string(),
        args: vec![],
    }
}

/// Gateway defaults tuned for fast tests: ephemeral port, short backoff and
/// short stop escalation.
pub fn test_config(transport: TransportMode) -> GatewayConfig {
    let mut config = GatewayConfig::new(provider_command());
    config.port = 0;
    config.transport = transport;
    config.restart.initial_backoff = Duration::from_millis(20);
    config.restart.max_backoff = Duration::from_millis(200);
    config.grace.stdin_close_grace = Duration::from_millis(500);
    config.grace.sigterm_grace = Duration::from_millis(500);
    config.keep_alive = Duration::from_secs(1);
    config
}

pub struct TestGateway {
    pub gateway: RunningGateway,
    pub client: reqwest::Client,
    pub base: String,
    pub endpoint: String,
}

impl TestGateway {
    pub async fn start(config: GatewayConfig) -> Self {
        let path = config.path.clone();
        let gateway = Gateway::start(config, Arc::new(LifecycleManager::new()))
            .await
            .expect("gateway should start");
        let base = format!("http://{}", gateway.local_addr());
        Self {
            endpoint: format!("{base}{path}"),
            base,
            gateway,
            client: reqwest::Client::new(),
        }
    }

    /// Handshake: open a session with an `initialized` notification.
    pub async fn open_session(&self) -> String {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
        response.headers()[SESSION_HEADER]
            .to_str()
            .unwrap()
            .to_string()
    }

    pub async fn post(&self, session: &str, body: Value) -> reqwest::Response {
        self.client
            .post(&self.endpoint)
            .header(SESSION_HEADER, session)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// POST a request and assert it was accepted.
    pub async fn call(&self, session: &str, id: Value, method: &str, params: Value) {
        let response = self
            .post(
                session,
                json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}),
            )
            .await;
        assert_eq!(response.status(), 202, "{method} should be accepted");
    }

    pub async fn stream(&self, session: &str) -> MessageStream {
        let response = self
            .client
            .get(&self.endpoint)
            .header(SESSION_HEADER, session)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let sse = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));
        MessageStream {
            body: Box::pin(response.bytes_stream()),
            buf: Vec::new(),
            sse,
        }
    }

    pub async fn delete(&self, session: &str) -> reqwest::Response {
        self.client
            .delete(&self.endpoint)
            .header(SESSION_HEADER, session)
            .send()
            .await
            .unwrap()
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }

    pub async fn metrics(&self) -> String {
        self.get("/metrics").await.text().await.unwrap()
    }

    /// Poll `/metrics` until it contains `needle`.
    pub async fn wait_for_metric(&self, needle: &str) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if self.metrics().await.contains(needle) {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "metric {needle} never appeared"
            );
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    /// Poll `/ready` until it reports 200.
    pub async fn wait_ready(&self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        while self.get("/ready").await.status() != 200 {
            assert!(tokio::time::Instant::now() < deadline, "gateway never became ready");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Reads JSON-RPC messages from an NDJSON or SSE response body.
pub struct MessageStream {
    body: ByteStream,
    buf: Vec<u8>,
    sse: bool,
}

impl MessageStream {
    /// Next message, or `None` on timeout or end of stream.
    pub async fn next(&mut self, within: Duration) -> Option<Value> {
        tokio::time::timeout(within, self.next_message())
            .await
            .ok()
            .flatten()
    }

    pub async fn expect(&mut self) -> Value {
        self.next(WAIT).await.expect("expected a message on the stream")
    }

    pub async fn assert_quiet(&mut self, within: Duration) {
        if let Some(message) = self.next(within).await {
            panic!("unexpected message: {message}");
        }
    }

    /// True if the server ends the stream within `within`.
    pub async fn closes_within(&mut self, within: Duration) -> bool {
        tokio::time::timeout(within, async {
            while let Some(Ok(_)) = self.body.next().await {}
        })
        .await
        .is_ok()
    }

    async fn next_message(&mut self) -> Option<Value> {
        loop {
            while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim();
                let payload = if self.sse {
                    match line.strip_prefix("data:") {
                        Some(data) => data.trim(),
                        None => continue,
                    }
                } else {
                    line
                };
                if payload.is_empty() {
                    continue;
                }
                return serde_json::from_str(payload).ok();
            }
            let chunk = self.body.next().await?.ok()?;
            self.buf.extend_from_slice(&chunk);
        }
    }
}
