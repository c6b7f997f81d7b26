//! API routes

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers::*;

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chains/:underlying/:expiry", get(get_chain))
        .route("/api/v1/subscriptions/stats", get(subscription_stats))
        .route("/api/v1/watchlist", post(add_to_watchlist))
        .route("/api/v1/watchlist/:user", get(get_watchlist))
        .route(
            "/api/v1/watchlist/:user/:symbol/:expiry",
            delete(remove_from_watchlist),
        )
        .with_state(Arc::new(state))
}
