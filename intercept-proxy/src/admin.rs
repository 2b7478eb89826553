use crate::registry::{PendingInfo, PendingRegistry};
use crate::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use tracing::info;

/// Shared state for metrics
#[derive(Debug, Default)]
pub struct Metrics {
    pub total_requests: AtomicU64,
    pub intercepted: AtomicU64,
    pub passed_through: AtomicU64,
    pub forwarded: AtomicU64,
    pub dropped: AtomicU64,
    pub stale_actions: AtomicU64,
    pub rejected_actions: AtomicU64,
    pub publish_failures: AtomicU64,
    pub transport_errors: AtomicU64,
}

impl Metrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, pending_flows: usize) -> MetricsResponse {
        MetricsResponse {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            intercepted: self.intercepted.load(Ordering::Relaxed),
            passed_through: self.passed_through.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            stale_actions: self.stale_actions.load(Ordering::Relaxed),
            rejected_actions: self.rejected_actions.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            pending_flows,
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsResponse {
    pub total_requests: u64,
    pub intercepted: u64,
    pub passed_through: u64,
    pub forwarded: u64,
    pub dropped: u64,
    pub stale_actions: u64,
    pub rejected_actions: u64,
    pub publish_failures: u64,
    pub transport_errors: u64,
    pub pending_flows: usize,
}

#[derive(Clone)]
struct AdminState {
    metrics: Arc<Metrics>,
    registry: PendingRegistry,
}

pub fn admin_router(metrics: Arc<Metrics>, registry: PendingRegistry) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/pending", get(pending_handler))
        .with_state(AdminState { metrics, registry })
}

pub async fn start_admin_server(port: u16, metrics: Arc<Metrics>, registry: PendingRegistry) -> Result<()> {
    let app = admin_router(metrics, registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting Admin API on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        crate::error::ProxyError::Network(format!("Failed to bind admin port {}: {}", port, e))
    })?;

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::ProxyError::Network(format!("Admin server failed: {}", e)))?;

    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn metrics_handler(State(state): State<AdminState>) -> Json<MetricsResponse> {
    Json(state.metrics.snapshot(state.registry.len()))
}

async fn pending_handler(State(state): State<AdminState>) -> Json<Vec<PendingInfo>> {
    Json(state.registry.pending())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reads_counters() {
        let metrics = Metrics::default();
        Metrics::incr(&metrics.total_requests);
        Metrics::incr(&metrics.total_requests);
        Metrics::incr(&metrics.dropped);

        let snapshot = metrics.snapshot(4);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.dropped, 1);
        assert_eq!(snapshot.forwarded, 0);
        assert_eq!(snapshot.pending_flows, 4);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["pending_flows"], 4);
    }
}
