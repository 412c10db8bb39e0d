//! Session response streams.
//!
//! A session's queued messages are drained into either an SSE body or a
//! chunked NDJSON body. The stream owns a [`CloseOnDrop`] guard, so when the
//! client goes away and hyper drops the body, the session is closed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::config::TransportMode;
use crate::router::{CloseReason, MessageRouter};
use crate::session::SessionId;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Closes the session when the response body is dropped.
struct CloseOnDrop {
    router: Arc<MessageRouter>,
    session_id: SessionId,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if self.router.close_session(&self.session_id, CloseReason::Disconnect) {
            tracing::debug!(session_id = %self.session_id, "response stream dropped");
        }
    }
}

fn messages(
    router: Arc<MessageRouter>,
    session_id: SessionId,
    rx: mpsc::Receiver<Value>,
) -> impl Stream<Item = Value> + Send + 'static {
    let guard = CloseOnDrop { router, session_id };
    stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let message = rx.recv().await?;
        Some((message, (rx, guard)))
    })
}

/// Build the streaming response for one session.
pub fn session_stream(
    transport: TransportMode,
    keep_alive: Duration,
    router: Arc<MessageRouter>,
    session_id: SessionId,
    rx: mpsc::Receiver<Value>,
) -> Response {
    let messages = messages(router, session_id, rx);
    match transport {
        TransportMode::Sse => {
            let events = messages.map(|message| Event::default().event("message").json_data(message));
            Sse::new(events)
                .keep_alive(KeepAlive::new().interval(keep_alive))
                .into_response()
        }
        TransportMode::Ndjson => {
            let lines = messages.map(|message| {
                let mut line = serde_json::to_vec(&message)?;
                line.push(b'\n');
                Ok::<_, serde_json::Error>(Bytes::from(line))
            });
            (
                [(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)],
                Body::from_stream(lines),
            )
                .into_response()
        }
    }
}
