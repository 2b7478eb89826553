use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use intercept_common::{Action, ActionOutcome, FlowId, FlowSnapshot, ToggleState};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::board::BoardEntry;
use crate::coordinator::{Coordinator, CoordinatorStats};
use crate::repeater::{Repeater, RepeaterRequest, RepeaterResponse};
use crate::ws::ws_handler;
use crate::ControlPlaneError;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub repeater: Arc<Repeater>,
}

/// Response for the root endpoint
#[derive(Serialize)]
pub struct WelcomeResponse {
    pub service: String,
    pub version: String,
    pub status: String,
    pub endpoints: Vec<EndpointInfo>,
}

/// Information about available endpoints
#[derive(Serialize)]
pub struct EndpointInfo {
    pub path: String,
    pub method: String,
    pub description: String,
}

impl EndpointInfo {
    fn new(method: &str, path: &str, description: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_string(),
            description: description.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct OutcomesResponse {
    pub status: &'static str,
    pub acknowledged: usize,
}

#[derive(Serialize)]
pub struct RemoveResponse {
    pub status: &'static str,
    pub removed: bool,
}

/// Build the full HTTP surface. The action-polling route is left out of
/// request tracing: the proxy hits it several times per second.
pub fn router(state: AppState) -> Router {
    let traced = Router::new()
        // Root endpoint - welcome page
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        // Proxy-facing intercept endpoints
        .route("/api/intercept/status", get(get_status_handler).post(set_status_handler))
        .route("/api/intercept/new", post(new_flow_handler))
        .route("/api/intercept/outcomes", post(outcomes_handler))
        // Operator-facing intercept endpoints
        .route("/api/intercept/decisions", post(decision_handler))
        .route("/api/intercept/requests", get(list_requests_handler))
        .route("/api/intercept/requests/:id", delete(remove_request_handler))
        .route("/api/intercept/stats", get(stats_handler))
        .route("/api/repeater/send", post(repeater_handler))
        .route("/ws", get(ws_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let polling = Router::new().route("/api/intercept/actions", get(drain_actions_handler));

    traced
        .merge(polling)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Root endpoint handler - lists the available endpoints
async fn root_handler() -> Json<WelcomeResponse> {
    let endpoints = vec![
        EndpointInfo::new("GET", "/", "This service description"),
        EndpointInfo::new("GET", "/health", "Basic health check"),
        EndpointInfo::new("GET", "/api/intercept/status", "Current intercept toggle"),
        EndpointInfo::new("POST", "/api/intercept/status", "Set the intercept toggle"),
        EndpointInfo::new("POST", "/api/intercept/new", "Publish a paused flow snapshot (proxy)"),
        EndpointInfo::new("GET", "/api/intercept/actions", "Drain queued decisions (proxy)"),
        EndpointInfo::new("POST", "/api/intercept/outcomes", "Acknowledge applied decisions (proxy)"),
        EndpointInfo::new("POST", "/api/intercept/decisions", "Queue a forward or drop decision"),
        EndpointInfo::new("GET", "/api/intercept/requests", "Intercepted flows with their status"),
        EndpointInfo::new("DELETE", "/api/intercept/requests/{id}", "Remove a flow from the view"),
        EndpointInfo::new("GET", "/api/intercept/stats", "Coordinator counters"),
        EndpointInfo::new("POST", "/api/repeater/send", "Send an arbitrary HTTP request"),
        EndpointInfo::new("GET", "/ws", "Subscriber event channel (WebSocket)"),
    ];

    Json(WelcomeResponse {
        service: "Intercept Control Plane".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "running".to_string(),
        endpoints,
    })
}

/// Basic health check handler
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "service": "control-plane"
    }))
}

async fn get_status_handler(State(state): State<AppState>) -> Json<ToggleState> {
    Json(ToggleState {
        enabled: state.coordinator.is_enabled(),
    })
}

async fn set_status_handler(
    State(state): State<AppState>,
    Json(toggle): Json<ToggleState>,
) -> Json<ToggleState> {
    state.coordinator.set_toggle(toggle.enabled).await;
    Json(toggle)
}

async fn new_flow_handler(
    State(state): State<AppState>,
    Json(snapshot): Json<FlowSnapshot>,
) -> Json<StatusResponse> {
    state.coordinator.record_snapshot(snapshot).await;
    Json(StatusResponse { status: "ok" })
}

async fn drain_actions_handler(State(state): State<AppState>) -> Json<Vec<Action>> {
    Json(state.coordinator.take_actions().await)
}

async fn outcomes_handler(
    State(state): State<AppState>,
    Json(outcomes): Json<Vec<ActionOutcome>>,
) -> Json<OutcomesResponse> {
    let acknowledged = state.coordinator.record_outcomes(&outcomes).await;
    Json(OutcomesResponse {
        status: "ok",
        acknowledged,
    })
}

async fn decision_handler(
    State(state): State<AppState>,
    Json(action): Json<Action>,
) -> Result<(StatusCode, Json<StatusResponse>), ControlPlaneError> {
    state.coordinator.submit_action(action).await?;
    Ok((StatusCode::ACCEPTED, Json(StatusResponse { status: "queued" })))
}

async fn list_requests_handler(State(state): State<AppState>) -> Json<Vec<BoardEntry>> {
    Json(state.coordinator.view().await)
}

async fn remove_request_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<RemoveResponse> {
    let removed = state.coordinator.remove_from_view(&FlowId::from(id)).await;
    Json(RemoveResponse {
        status: "ok",
        removed,
    })
}

async fn stats_handler(State(state): State<AppState>) -> Json<CoordinatorStats> {
    Json(state.coordinator.stats().await)
}

async fn repeater_handler(
    State(state): State<AppState>,
    Json(request): Json<RepeaterRequest>,
) -> Result<Json<RepeaterResponse>, ControlPlaneError> {
    Ok(Json(state.repeater.send(request).await?))
}
