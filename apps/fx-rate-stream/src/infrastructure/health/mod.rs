//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, engine status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (checks tick freshness)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::EngineStats;
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::metrics::get_metrics_handle;

/// Missed intervals after which ticks are considered stale.
const STALE_AFTER_INTERVALS: u32 = 3;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy", "degraded", or "unhealthy".
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Broadcast engine status.
    pub engine: EngineStatus,
    /// Connection and subscription counts.
    pub subscriptions: SubscriptionStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Ticks are flowing.
    Healthy,
    /// The last cycle failed but ticks are still fresh.
    Degraded,
    /// No successful cycle within the staleness window.
    Unhealthy,
}

/// Broadcast engine status.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    /// Completed cycles.
    pub cycles_completed: u64,
    /// Failed cycles.
    pub cycles_failed: u64,
    /// Frames queued to connections.
    pub deliveries: u64,
    /// Frames dropped.
    pub delivery_failures: u64,
    /// Time of the last completed cycle.
    pub last_success: Option<DateTime<Utc>>,
}

/// Subscription statistics.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStatus {
    /// Live connections.
    pub connections: usize,
    /// Instruments with at least one subscriber.
    pub instruments: usize,
    /// Total (connection, instrument) pairs.
    pub subscriptions: usize,
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    tick_interval: Duration,
    registry: SharedRegistry,
    engine: Arc<EngineStats>,
}

impl HealthServerState {
    /// Create new health server state.
    #[must_use]
    pub fn new(
        version: String,
        tick_interval: Duration,
        registry: SharedRegistry,
        engine: Arc<EngineStats>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            tick_interval,
            registry,
            engine,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let app = health_router(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);

    if response.status == HealthStatus::Unhealthy {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    let now = Utc::now();
    let uptime = state.started_at.elapsed();
    let last_success_ms = state.engine.last_success_ms();
    let registry = state.registry.stats();

    let status = determine_health_status(
        now.timestamp_millis(),
        last_success_ms,
        state.engine.last_cycle_failed(),
        uptime,
        state.tick_interval,
    );

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: uptime.as_secs(),
        current_time: now,
        engine: EngineStatus {
            cycles_completed: state.engine.cycles_completed(),
            cycles_failed: state.engine.cycles_failed(),
            deliveries: state.engine.deliveries(),
            delivery_failures: state.engine.delivery_failures(),
            last_success: last_success_ms.and_then(DateTime::from_timestamp_millis),
        },
        subscriptions: SubscriptionStatus {
            connections: registry.connections,
            instruments: registry.instruments,
            subscriptions: registry.subscriptions,
        },
    }
}

fn determine_health_status(
    now_ms: i64,
    last_success_ms: Option<i64>,
    last_cycle_failed: bool,
    uptime: Duration,
    tick_interval: Duration,
) -> HealthStatus {
    let stale_after = tick_interval.saturating_mul(STALE_AFTER_INTERVALS);

    let fresh = match last_success_ms {
        Some(ms) => {
            let age_ms = u64::try_from(now_ms.saturating_sub(ms)).unwrap_or(0);
            Duration::from_millis(age_ms) <= stale_after
        }
        // Grace period before the first cycles have had a chance to run
        None => uptime <= stale_after,
    };

    match (fresh, last_cycle_failed) {
        (true, false) => HealthStatus::Healthy,
        (true, true) => HealthStatus::Degraded,
        (false, _) => HealthStatus::Unhealthy,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::instrument::InstrumentCatalog;
    use crate::domain::subscription::SubscriptionRegistry;

    const INTERVAL: Duration = Duration::from_secs(5);
    const NOW_MS: i64 = 1_773_480_413_000;

    fn state() -> Arc<HealthServerState> {
        let catalog = Arc::new(InstrumentCatalog::bundled().unwrap());
        let registry = Arc::new(SubscriptionRegistry::new(catalog));
        let conn = registry.connect();
        registry.subscribe(conn, None).unwrap();
        Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            INTERVAL,
            registry,
            Arc::new(EngineStats::default()),
        ))
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status_fresh_ticks() {
        let status = determine_health_status(NOW_MS, Some(NOW_MS - 4_000), false, INTERVAL * 10, INTERVAL);
        assert_eq!(status, HealthStatus::Healthy);
    }

    #[test]
    fn determine_status_last_cycle_failed() {
        let status = determine_health_status(NOW_MS, Some(NOW_MS - 6_000), true, INTERVAL * 10, INTERVAL);
        assert_eq!(status, HealthStatus::Degraded);
    }

    #[test]
    fn determine_status_stale_ticks() {
        let status = determine_health_status(NOW_MS, Some(NOW_MS - 16_000), false, INTERVAL * 10, INTERVAL);
        assert_eq!(status, HealthStatus::Unhealthy);
    }

    #[test]
    fn determine_status_startup_grace() {
        assert_eq!(
            determine_health_status(NOW_MS, None, false, Duration::from_secs(1), INTERVAL),
            HealthStatus::Healthy
        );
        assert_eq!(
            determine_health_status(NOW_MS, None, false, Duration::from_secs(60), INTERVAL),
            HealthStatus::Unhealthy
        );
    }

    #[tokio::test]
    async fn liveness_endpoint() {
        let response = health_router(state())
            .oneshot(Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_during_startup_grace() {
        let response = health_router(state())
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_endpoint_reports_registry() {
        let response = health_router(state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "0.1.0");
        assert_eq!(json["subscriptions"]["connections"], 1);
        assert!(json["subscriptions"]["instruments"].as_u64().unwrap() > 40);
        assert_eq!(json["engine"]["cycles_completed"], 0);
        assert!(json["engine"]["last_success"].is_null());
    }

    #[tokio::test]
    async fn metrics_endpoint_without_recorder() {
        let response = health_router(state())
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
