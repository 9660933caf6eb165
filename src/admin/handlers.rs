use axum::{extract::State, Json};
use serde::Serialize;

use crate::breaker::Snapshot;
use crate::endpoint::EndpointKey;
use crate::http::server::AppState;
use crate::lifecycle::TaskStats;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub breakers: usize,
    pub subscriptions: usize,
    pub tasks: TaskStats,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let orchestrator = &state.orchestrator;
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        breakers: orchestrator.registry().len(),
        subscriptions: orchestrator.graph().subscriptions().len(),
        tasks: orchestrator.tasks().stats(),
    })
}

/// State and counts of every breaker in this process.
pub async fn get_breakers(State(state): State<AppState>) -> Json<Vec<Snapshot>> {
    Json(state.orchestrator.registry().snapshot())
}

/// Endpoints whose status topic this process consumes.
pub async fn get_subscriptions(State(state): State<AppState>) -> Json<Vec<EndpointKey>> {
    Json(state.orchestrator.graph().subscriptions())
}
