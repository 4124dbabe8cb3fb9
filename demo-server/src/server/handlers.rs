use crate::error::ApiError;
use axum::{Json, extract::State};
use cluster_client::{ClusterError, ClusterSession, RefreshStats, SessionState, TopologySummary};
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: Arc<ClusterSession>,
}

#[derive(Debug, Serialize)]
pub struct TopologyResponse {
    pub session: SessionState,
    pub refresh_mode: &'static str,
    pub refresh: RefreshStats,
    pub connected_nodes: Vec<String>,
    pub topology: TopologySummary,
}

/// Smoke test: `SET hoge hoge` through the cluster session
pub async fn test_set(State(state): State<AppState>) -> Result<String, ApiError> {
    debug!("REST SET key=hoge");
    let reply = state.session.set("hoge", "hoge").await?;
    Ok(reply.to_string())
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "demo-server",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Current slot map and refresh counters
pub async fn cluster_topology(
    State(state): State<AppState>,
) -> Result<Json<TopologyResponse>, ApiError> {
    let session = &state.session;
    let topology = session.topology().ok_or(ClusterError::TopologyUnknown)?;

    Ok(Json(TopologyResponse {
        session: session.state(),
        refresh_mode: session.refresh_mode().name(),
        refresh: session.refresh_stats(),
        connected_nodes: session
            .connected_nodes()
            .iter()
            .map(ToString::to_string)
            .collect(),
        topology: topology.summary(),
    }))
}
