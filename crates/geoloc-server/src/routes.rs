//! API route definitions

use crate::handlers;
use crate::state::AppState;

use axum::{Router, routing::get};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let cors = if state.config.server.cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .max_age(Duration::from_secs(3600))
    } else {
        CorsLayer::new()
    };

    Router::new()
        // Health & Status
        .route("/health", get(handlers::health_check))
        .route("/api/v1/stats", get(handlers::get_stats))
        // Metrics (Prometheus format)
        .route("/metrics", get(handlers::metrics))
        // Pipeline output
        .route("/api/v1/zones", get(handlers::list_zones))
        .route("/api/v1/zones/{id}", get(handlers::get_zone))
        .route("/api/v1/pose", get(handlers::get_pose))
        .route("/api/v1/events", get(handlers::list_events))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
