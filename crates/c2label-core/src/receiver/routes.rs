//! Receiver routes

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState};

/// Create the receiver router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // CloudEvents are pushed to the root path
        .route("/", post(handlers::receive_event))

        // Operations
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))

        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
