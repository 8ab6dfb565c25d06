mod cache;
mod entities;
mod health;
mod search;
mod state;

pub use state::AdminState;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use super::middleware::{log_responses, set_request_context};

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/_health", get(health::admin_health))
        .route("/cache/stats", get(cache::cache_stats))
        .route("/cache/clear", post(cache::clear_cache))
        .route("/cache/invalidate", post(cache::invalidate_cache))
        .route("/cache/health", get(cache::cache_health))
        .route("/search/rebuild", post(search::rebuild_index))
        .route("/search/meta", get(search::index_meta))
        .route("/entities/cars/{id}", get(entities::car_entity))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}
