//! Health and readiness probe handlers.
//!
//! | Endpoint | Condition | Status |
//! |----------|-----------|--------|
//! | /health  | Process alive | 200 |
//! | /health  | Stopped | 503 |
//! | /ready   | Ready and child running | 200 |
//! | /ready   | Starting, child down, or shutting down | 503 |

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;

use super::{LifecycleManager, LifecycleState};

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub child_incarnations: u32,
}

#[derive(Debug, Serialize)]
struct UnhealthyResponse {
    status: &'static str,
    reason: String,
}

/// Readiness checks result.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessChecks {
    /// Whether a child incarnation is currently running
    pub child_running: bool,
}

impl ReadinessChecks {
    #[must_use]
    pub fn all_pass(&self) -> bool {
        self.child_running
    }

    /// Returns the first failing check name.
    #[must_use]
    pub fn first_failure(&self) -> Option<&'static str> {
        if !self.child_running {
            Some("child_running")
        } else {
            None
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Create the health/readiness router (`GET /health`, `GET /ready`).
pub fn health_router(lifecycle: Arc<LifecycleManager>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .with_state(lifecycle)
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    if matches!(lifecycle.state(), LifecycleState::Stopped) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(UnhealthyResponse {
                status: "unhealthy",
                reason: "service_stopped".to_string(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy",
            version: lifecycle.version(),
            uptime_seconds: lifecycle.uptime_seconds(),
            child_incarnations: lifecycle.child_incarnations(),
        }),
    )
        .into_response()
}

async fn readiness_handler(State(lifecycle): State<Arc<LifecycleManager>>) -> Response {
    let checks = lifecycle.readiness_checks();

    if lifecycle.is_shutting_down() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "not_ready",
                checks,
                reason: Some("shutting_down".to_string()),
            }),
        )
            .into_response();
    }

    if checks.all_pass() && lifecycle.is_ready() {
        return (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                checks,
                reason: None,
            }),
        )
            .into_response();
    }

    let reason = match checks.first_failure() {
        Some(failed) => failed.to_string(),
        None => format!("lifecycle_state: {}", lifecycle.state()),
    };
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            checks,
            reason: Some(reason),
        }),
    )
        .into_response()
}

// ============================================================================
// Tests
// ============================================================================
