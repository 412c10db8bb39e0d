//! Message router: the correlation point between sessions and the child.
//!
//! Outbound, a client request is registered in the [`SessionRegistry`], its
//! `id` is replaced by a fresh [`CorrelationKey`], and it is written to the
//! child. Inbound, a child response is resolved by that key, its `id` is
//! restored to the client's original value, and it is queued on the owning
//! session's outlet and nowhere else.
//!
//! Delivery never awaits. Each session has a bounded queue; a session whose
//! queue is full is closed rather than letting it stall the child's stdout
//! reader. The one write the reader side makes (refusing a child request) is
//! handed to its own task so the reader never waits on the stdin lock.

mod sweeper;

pub use sweeper::{SweepConfig, spawn_sweeper};

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use stdiogate_core::jsonrpc::{JsonRpcId, JsonRpcMessageKind};
use stdiogate_core::metrics::{GatewayMetrics, RequestOutcome};
use stdiogate_core::GatewayError;
use tokio::io::AsyncRead;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, NotificationPolicy};
use crate::error::FramingError;
use crate::framing::{Frame, FrameReader, FrameWriter};
use crate::session::{CorrelationKey, PendingEntry, SessionId, SessionRegistry};

/// Why a session was closed (metrics label and log field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit `DELETE`.
    Client,
    /// The response stream was dropped.
    Disconnect,
    /// The outbound queue was full.
    Overflow,
    /// No stream attached and no client activity within the idle timeout.
    Idle,
    /// Gateway shutdown or restart exhaustion.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Disconnect => "disconnect",
            Self::Overflow => "overflow",
            Self::Idle => "idle",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub queue_capacity: usize,
    pub max_sessions: usize,
    pub notification_policy: NotificationPolicy,
    /// JSON pointer to the session marker in a notification.
    pub marker_pointer: String,
}

impl From<&GatewayConfig> for RouterConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            queue_capacity: config.session_queue_capacity,
            max_sessions: config.max_sessions,
            notification_policy: config.notification_policy,
            marker_pointer: config.marker_pointer(),
        }
    }
}

/// The current child incarnation as seen by the router.
struct ChildLink {
    writer: Arc<FrameWriter>,
    /// Cancelled when a write fails; the supervisor treats it like an exit.
    broken: CancellationToken,
}

/// Per-session delivery queue. The receiver is parked here until a stream
/// attaches, so messages produced before `GET` are not lost.
struct Outlet {
    tx: mpsc::Sender<Value>,
    rx: Mutex<Option<mpsc::Receiver<Value>>>,
}

pub struct MessageRouter {
    registry: SessionRegistry,
    outlets: DashMap<SessionId, Outlet>,
    child: ArcSwapOption<ChildLink>,
    metrics: Arc<GatewayMetrics>,
    config: RouterConfig,
}

impl MessageRouter {
    pub fn new(config: RouterConfig, metrics: Arc<GatewayMetrics>) -> Self {
        Self {
            registry: SessionRegistry::new(config.max_sessions),
            outlets: DashMap::new(),
            child: ArcSwapOption::empty(),
            metrics,
            config,
        }
    }

    pub fn metrics(&self) -> &GatewayMetrics {
        &self.metrics
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────

    pub fn open_session(&self) -> Result<SessionId, GatewayError> {
        let id = self.registry.open()?;
        let (tx, rx) = mpsc::channel(self.config.queue_capacity);
        self.outlets.insert(
            id,
            Outlet {
                tx,
                rx: Mutex::new(Some(rx)),
            },
        );
        self.metrics.record_session_opened();
        info!(session_id = %id, "session opened");
        Ok(id)
    }

    /// Hand out the session's response stream. At most once per session.
    pub fn take_stream(&self, id: &SessionId) -> Result<mpsc::Receiver<Value>, GatewayError> {
        let outlet = self.outlets.get(id).ok_or_else(|| GatewayError::SessionClosed {
            session_id: id.to_string(),
        })?;
        let taken = outlet.rx.lock().take();
        let rx = taken.ok_or_else(|| GatewayError::StreamAlreadyAttached {
            session_id: id.to_string(),
        })?;
        self.registry.attach_stream(id);
        Ok(rx)
    }

    /// Close a session, abandoning its pending requests. Returns false if
    /// the session was not open.
    pub fn close_session(&self, id: &SessionId, reason: CloseReason) -> bool {
        let Some(abandoned) = self.registry.close(id) else {
            return false;
        };
        self.outlets.remove(id);

        for (key, entry) in &abandoned {
            debug!(
                session_id = %id,
                correlation_key = %key,
                client_id = %entry.client_id,
                method = %entry.method,
                "request abandoned"
            );
            self.metrics.record_request(RequestOutcome::Abandoned);
        }
        self.metrics.record_session_closed(reason.as_str());
        self.metrics.set_pending(self.registry.pending_count());
        info!(
            session_id = %id,
            reason = reason.as_str(),
            abandoned = abandoned.len(),
            "session closed"
        );
        true
    }

    pub fn close_all(&self, reason: CloseReason) {
        for id in self.registry.session_ids() {
            self.close_session(&id, reason);
        }
    }

    /// Close sessions that never attached a stream and have been quiet for
    /// `idle`. Returns how many.
    pub fn close_idle(&self, idle: Duration) -> usize {
        let idle_ids = self.registry.idle_sessions(idle);
        idle_ids
            .iter()
            .filter(|id| self.close_session(id, CloseReason::Idle))
            .count()
    }

    pub fn is_open(&self, id: &SessionId) -> bool {
        self.registry.is_open(id)
    }

    pub fn session_count(&self) -> usize {
        self.registry.session_count()
    }

    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Client → child
    // ─────────────────────────────────────────────────────────────────────

    /// Forward one client message to the child on behalf of `session_id`.
    ///
    /// Requests are answered later on the session stream; notifications are
    /// forwarded verbatim. Client responses are rejected: the gateway never
    /// forwards child-originated requests, so there is nothing to answer.
    pub async fn submit(&self, session_id: &SessionId, frame: Frame) -> Result<(), GatewayError> {
        let Frame { kind, mut message } = frame;
        match kind {
            JsonRpcMessageKind::Request { id, method } => {
                let key = self.registry.register(session_id, id.clone(), &method)?;
                set_id(&mut message, key.to_wire());
                self.metrics.set_pending(self.registry.pending_count());
                debug!(
                    session_id = %session_id,
                    client_id = %id,
                    correlation_key = %key,
                    method = %method,
                    "forwarding request"
                );

                if let Err(err) = self.write_to_child(&message).await {
                    let cancelled = self.registry.cancel(key);
                    self.metrics.set_pending(self.registry.pending_count());
                    if cancelled.is_none() {
                        // child_exited already failed it on the session stream.
                        debug!(correlation_key = %key, "write failed after request was failed");
                        return Ok(());
                    }
                    return Err(err);
                }
                Ok(())
            }
            JsonRpcMessageKind::Notification { method } => {
                if !self.registry.touch(session_id) {
                    return Err(GatewayError::SessionClosed {
                        session_id: session_id.to_string(),
                    });
                }
                debug!(session_id = %session_id, method = %method, "forwarding notification");
                self.write_to_child(&message).await
            }
            JsonRpcMessageKind::Response { .. } => Err(GatewayError::InvalidRequest {
                details: "responses from clients are not accepted".to_string(),
            }),
        }
    }

    async fn write_to_child(&self, message: &Value) -> Result<(), GatewayError> {
        let Some(link) = self.child.load_full() else {
            return Err(GatewayError::ChildUnavailable {
                reason: "child process is not running".to_string(),
            });
        };
        link.writer.send(message).await.map_err(|e| {
            warn!(error = %e, "write to child failed");
            link.broken.cancel();
            GatewayError::ChildUnavailable {
                reason: e.to_string(),
            }
        })
    }

    // ─────────────────────────────────────────────────────────────────────
    // Child incarnations
    // ─────────────────────────────────────────────────────────────────────

    /// Route outbound traffic to a new child. The returned token is
    /// cancelled if a write to it fails.
    pub fn attach_child(&self, writer: Arc<FrameWriter>) -> CancellationToken {
        let broken = CancellationToken::new();
        self.child.store(Some(Arc::new(ChildLink {
            writer,
            broken: broken.clone(),
        })));
        broken
    }

    /// Stop routing to the current child. Returns its writer, if any.
    pub fn detach_child(&self) -> Option<Arc<FrameWriter>> {
        self.child.swap(None).map(|link| link.writer.clone())
    }

    /// The child is gone: fail every in-flight request with
    /// `ChildUnavailable` on its own session.
    pub fn child_exited(&self, reason: &str) {
        self.detach_child();
        let failed = self.registry.fail_all();
        self.metrics.set_pending(self.registry.pending_count());
        if failed.is_empty() {
            return;
        }

        warn!(reason, failed = failed.len(), "failing in-flight requests");
        let err = GatewayError::ChildUnavailable {
            reason: reason.to_string(),
        };
        for (key, entry) in failed {
            self.metrics.record_request(RequestOutcome::ChildUnavailable);
            self.deliver_error(key, &entry, &err);
        }
    }

    /// Fail requests pending longer than `timeout`. Returns how many.
    pub fn expire_overdue(&self, timeout: Duration) -> usize {
        let expired = self.registry.expire(timeout);
        if expired.is_empty() {
            return 0;
        }
        self.metrics.set_pending(self.registry.pending_count());

        let err = GatewayError::RequestTimeout {
            timeout_ms: timeout.as_millis() as u64,
        };
        let count = expired.len();
        for (key, entry) in expired {
            warn!(
                session_id = %entry.session_id,
                correlation_key = %key,
                method = %entry.method,
                "request timed out"
            );
            self.metrics.record_request(RequestOutcome::TimedOut);
            self.deliver_error(key, &entry, &err);
        }
        count
    }

    // ─────────────────────────────────────────────────────────────────────
    // Child → clients
    // ─────────────────────────────────────────────────────────────────────

    /// Consume the child's stdout until EOF, dispatching every frame.
    pub async fn run_reader<R: AsyncRead + Unpin>(&self, mut reader: FrameReader<R>) {
        while let Some(item) = reader.next_frame().await {
            match item {
                Ok(frame) => self.dispatch(frame),
                Err(FramingError::Io(e)) => {
                    warn!(error = %e, "child stdout read failed");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, error_type = e.error_type(), "skipping malformed record from child");
                    self.metrics.record_framing_error(e.error_type());
                }
            }
        }
        debug!("child stdout closed");
    }

    /// Route one message emitted by the child. Never waits.
    pub fn dispatch(&self, frame: Frame) {
        let failed = frame.is_error_response();
        let Frame { kind, message } = frame;
        match kind {
            JsonRpcMessageKind::Response { id } => self.route_response(&id, message, failed),
            JsonRpcMessageKind::Notification { method } => {
                self.route_notification(&method, message);
            }
            JsonRpcMessageKind::Request { id, method } => {
                self.refuse_child_request(id, method);
            }
        }
    }

    fn route_response(&self, id: &JsonRpcId, mut message: Value, failed: bool) {
        let entry = CorrelationKey::from_wire(id).and_then(|key| self.registry.resolve(key).ok());
        let Some(entry) = entry else {
            debug!(id = %id, "dropping response with no pending request");
            self.metrics.stale_responses_total.inc();
            return;
        };
        self.metrics.set_pending(self.registry.pending_count());
        self.metrics
            .request_duration_ms
            .observe(entry.sent_at.elapsed().as_secs_f64() * 1000.0);
        self.metrics.record_request(if failed {
            RequestOutcome::Failed
        } else {
            RequestOutcome::Completed
        });

        set_id(&mut message, entry.client_id.to_value());
        self.deliver(&entry.session_id, message);
    }

    fn route_notification(&self, method: &str, message: Value) {
        if self.config.notification_policy == NotificationPolicy::Scoped {
            if let Some(marker) = message.pointer(&self.config.marker_pointer).cloned() {
                let target = marker
                    .as_str()
                    .and_then(|s| s.parse::<SessionId>().ok())
                    .filter(|id| self.outlets.contains_key(id));
                match target {
                    Some(id) => {
                        self.metrics.record_notification("scoped");
                        self.deliver(&id, message);
                    }
                    None => {
                        debug!(method, marker = %marker, "dropping notification for unknown session");
                        self.metrics.record_notification("dropped");
                    }
                }
                return;
            }
        }

        let targets: Vec<SessionId> = self.outlets.iter().map(|e| *e.key()).collect();
        self.metrics.record_notification("broadcast");
        for id in targets {
            self.deliver(&id, message.clone());
        }
    }

    /// No single client can answer a request from the child, so the gateway
    /// answers it with "method not found". The write runs on its own task:
    /// stdin may be held by a client write that is waiting for the child to
    /// drain, and the child may be waiting for us to read its stdout.
    fn refuse_child_request(&self, id: JsonRpcId, method: String) {
        warn!(id = %id, method = %method, "refusing request from child");
        let Some(link) = self.child.load_full() else {
            debug!(id = %id, "no child to answer");
            return;
        };
        let response = GatewayError::MethodNotFound { method }
            .to_response(id, "gateway")
            .to_value();
        tokio::spawn(async move {
            if let Err(e) = link.writer.send(&response).await {
                debug!(error = %e, "could not answer child request");
                link.broken.cancel();
            }
        });
    }

    fn deliver_error(&self, key: CorrelationKey, entry: &PendingEntry, err: &GatewayError) {
        let response = err
            .to_response(entry.client_id.clone(), &key.to_string())
            .to_value();
        self.deliver(&entry.session_id, response);
    }

    /// Queue a message for one session without waiting.
    fn deliver(&self, session_id: &SessionId, message: Value) -> bool {
        let result = match self.outlets.get(session_id) {
            Some(outlet) => outlet.tx.try_send(message),
            None => return false,
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    session_id = %session_id,
                    capacity = self.config.queue_capacity,
                    "session queue full, closing session"
                );
                self.close_session(session_id, CloseReason::Overflow);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.close_session(session_id, CloseReason::Disconnect);
                false
            }
        }
    }
}

fn set_id(message: &mut Value, id: Value) {
    if let Some(obj) = message.as_object_mut() {
        obj.insert("id".to_string(), id);
    }
}
