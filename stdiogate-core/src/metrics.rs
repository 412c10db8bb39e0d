//! Prometheus metrics using the prometheus-client crate.
//!
//! [`GatewayMetrics`] registers every gateway metric on a caller-owned
//! [`Registry`]; the HTTP transport exposes the registry on `/metrics` in
//! OpenMetrics text format.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

// ─────────────────────────────────────────────────────────────────────────────
// Label Sets
// ─────────────────────────────────────────────────────────────────────────────

/// Final outcome of a routed client request.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Child answered with `result`.
    Completed,
    /// Child answered with `error`.
    Failed,
    /// Owning session closed before the answer arrived.
    Abandoned,
    /// Per-request timeout elapsed.
    TimedOut,
    /// Child exited or its stdin closed while the request was in flight.
    ChildUnavailable,
}

impl RequestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
            Self::TimedOut => "timed_out",
            Self::ChildUnavailable => "child_unavailable",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorTypeLabels {
    pub error_type: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    /// "broadcast", "scoped" or "dropped"
    pub delivery: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CloseLabels {
    /// "client", "disconnect", "overflow", "idle" or "shutdown"
    pub reason: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Bucket Definitions
// ─────────────────────────────────────────────────────────────────────────────

/// Request round-trip buckets in milliseconds (child processing dominates).
const REQUEST_DURATION_BUCKETS: [f64; 12] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 30000.0, 120000.0,
];

// ─────────────────────────────────────────────────────────────────────────────
// GatewayMetrics
// ─────────────────────────────────────────────────────────────────────────────

/// All gateway metrics.
///
/// Cheap to share behind an `Arc`; every metric type is internally atomic.
#[derive(Debug)]
pub struct GatewayMetrics {
    pub sessions_active: Gauge,
    pub sessions_opened_total: Counter,
    pub sessions_closed_total: Family<CloseLabels, Counter>,
    pub pending_requests: Gauge,
    pub requests_total: Family<OutcomeLabels, Counter>,
    pub request_duration_ms: Histogram,
    pub client_errors_total: Family<ErrorTypeLabels, Counter>,
    pub framing_errors_total: Family<ErrorTypeLabels, Counter>,
    pub notifications_total: Family<DeliveryLabels, Counter>,
    pub stale_responses_total: Counter,
    pub child_restarts_total: Counter,
}

impl GatewayMetrics {
    /// Create and register all metrics with the given registry.
    pub fn new(registry: &mut Registry) -> Self {
        let sessions_active = Gauge::default();
        registry.register(
            "stdiogate_sessions_active",
            "Currently open client sessions",
            sessions_active.clone(),
        );

        let sessions_opened_total = Counter::default();
        registry.register(
            "stdiogate_sessions_opened",
            "Client sessions opened",
            sessions_opened_total.clone(),
        );

        let sessions_closed_total = Family::<CloseLabels, Counter>::default();
        registry.register(
            "stdiogate_sessions_closed",
            "Client sessions closed by reason",
            sessions_closed_total.clone(),
        );

        let pending_requests = Gauge::default();
        registry.register(
            "stdiogate_pending_requests",
            "Requests forwarded to the child and awaiting a response",
            pending_requests.clone(),
        );

        let requests_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "stdiogate_requests",
            "Routed client requests by final outcome",
            requests_total.clone(),
        );

        let request_duration_ms = Histogram::new(REQUEST_DURATION_BUCKETS.iter().copied());
        registry.register(
            "stdiogate_request_duration_ms",
            "Time from forwarding a request to receiving the child's response",
            request_duration_ms.clone(),
        );

        let client_errors_total = Family::<ErrorTypeLabels, Counter>::default();
        registry.register(
            "stdiogate_client_errors",
            "Errors returned to HTTP clients by type",
            client_errors_total.clone(),
        );

        let framing_errors_total = Family::<ErrorTypeLabels, Counter>::default();
        registry.register(
            "stdiogate_framing_errors",
            "Malformed records skipped on the child's stdout",
            framing_errors_total.clone(),
        );

        let notifications_total = Family::<DeliveryLabels, Counter>::default();
        registry.register(
            "stdiogate_notifications",
            "Child notifications by delivery mode",
            notifications_total.clone(),
        );

        let stale_responses_total = Counter::default();
        registry.register(
            "stdiogate_stale_responses",
            "Child responses dropped because their correlation key was not pending",
            stale_responses_total.clone(),
        );

        let child_restarts_total = Counter::default();
        registry.register(
            "stdiogate_child_restarts",
            "Child process restart attempts",
            child_restarts_total.clone(),
        );

        Self {
            sessions_active,
            sessions_opened_total,
            sessions_closed_total,
            pending_requests,
            requests_total,
            request_duration_ms,
            client_errors_total,
            framing_errors_total,
            notifications_total,
            stale_responses_total,
            child_restarts_total,
        }
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened_total.inc();
        self.sessions_active.inc();
    }

    pub fn record_session_closed(&self, reason: &str) {
        self.sessions_active.dec();
        self.sessions_closed_total
            .get_or_create(&CloseLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    pub fn record_request(&self, outcome: RequestOutcome) {
        self.requests_total
            .get_or_create(&OutcomeLabels {
                outcome: outcome.as_str().to_string(),
            })
            .inc();
    }

    pub fn set_pending(&self, pending: usize) {
        self.pending_requests.set(pending as i64);
    }

    pub fn record_client_error(&self, error_type: &str) {
        self.client_errors_total
            .get_or_create(&ErrorTypeLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn record_framing_error(&self, error_type: &str) {
        self.framing_errors_total
            .get_or_create(&ErrorTypeLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }

    pub fn record_notification(&self, delivery: &str) {
        self.notifications_total
            .get_or_create(&DeliveryLabels {
                delivery: delivery.to_string(),
            })
            .inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_metrics_register_and_encode() {
        let mut registry = Registry::default();
        let metrics = GatewayMetrics::new(&mut registry);

        metrics.record_session_opened();
        metrics.record_session_opened();
        metrics.record_session_closed("client");
        metrics.record_request(RequestOutcome::Completed);
        metrics.record_request(RequestOutcome::TimedOut);
        metrics.record_framing_error("malformed_json");
        metrics.record_notification("broadcast");
        metrics.set_pending(3);
        metrics.request_duration_ms.observe(12.0);

        let mut out = String::new();
        encode(&mut out, &registry).unwrap();

        assert!(out.contains("stdiogate_sessions_active 1"));
        assert!(out.contains("stdiogate_sessions_opened_total 2"));
        assert!(out.contains(r#"stdiogate_sessions_closed_total{reason="client"} 1"#));
        assert!(out.contains(r#"stdiogate_requests_total{outcome="timed_out"} 1"#));
        assert!(out.contains(r#"stdiogate_framing_errors_total{error_type="malformed_json"} 1"#));
        assert!(out.contains("stdiogate_pending_requests 3"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(RequestOutcome::ChildUnavailable.as_str(), "child_unavailable");
        assert_eq!(RequestOutcome::Abandoned.as_str(), "abandoned");
    }
}
