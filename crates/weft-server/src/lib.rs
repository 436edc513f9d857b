//! # weft-server
//!
//! HTTP API for the weft workflow engine: submit, status, node rows,
//! timeline, metrics, bottlenecks, cancel, rerun, and daily trends.

pub mod config;
pub mod handlers;
pub mod types;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use handlers::AppState;

/// Assemble the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/execute", post(handlers::execute))
        .route("/api/executions", get(handlers::list_executions))
        .route("/api/execution/:id", get(handlers::get_execution))
        .route("/api/executions/:id/nodes", get(handlers::list_nodes))
        .route("/api/executions/:id/timeline", get(handlers::timeline))
        .route("/api/executions/:id/metrics", get(handlers::metrics))
        .route("/api/executions/:id/bottlenecks", get(handlers::bottlenecks))
        .route("/api/executions/:id/cancel", post(handlers::cancel))
        .route("/api/executions/:id/rerun", post(handlers::rerun))
        .route("/api/analytics/trends", get(handlers::trends))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
