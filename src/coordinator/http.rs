//! Status API for a coordinator node

use crate::common::ElectionMetrics;
use crate::coordinator::gate::LeadershipGate;
use crate::coordinator::session::SessionStatus;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct CoordState {
    pub identity: String,
    pub primary: bool,
    pub gate: LeadershipGate,
    pub status: Arc<SessionStatus>,
    pub metrics: Arc<ElectionMetrics>,
}

async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    axum::Json(json!({
        "status": "healthy",
        "state": state.gate.state(),
        "is_leader": state.gate.is_leader(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn admin_status(State(state): State<CoordState>) -> impl IntoResponse {
    axum::Json(json!({
        "identity": state.identity,
        "primary": state.primary,
        "state": state.gate.state(),
        "is_leader": state.gate.is_leader(),
        "session": state.status.snapshot(),
        "uptime_secs": state.metrics.uptime_secs(),
    }))
}

async fn metrics(State(state): State<CoordState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/admin/status", axum::routing::get(admin_status))
        .route("/metrics", axum::routing::get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
