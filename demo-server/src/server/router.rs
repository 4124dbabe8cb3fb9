use super::handlers::{self, AppState};
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Create the Axum router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/test", get(handlers::test_set))
        .route("/cluster/topology", get(handlers::cluster_topology))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
