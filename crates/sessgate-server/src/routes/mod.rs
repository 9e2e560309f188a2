//! API route modules.

pub mod health;
pub mod sessions;

use axum::{Router, middleware, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::middleware::session_middleware;
use crate::state::AppState;

/// Create the main router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    // Public routes (no session)
    let public_routes = Router::new().route("/health", get(health::health_check));

    // Session-bound routes
    let session_routes = Router::new()
        .merge(sessions::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            session_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .nest("/api", session_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
