//! API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use market_data::{CacheError, OptionChainCacheService, OptionChainSkeleton};
use std::sync::Arc;
use std::time::Instant;
use subscription::{ConnectionState, SubscriptionManager, SubscriptionStats};
use tracing::{error, warn};
use watchlist::{WatchlistError, WatchlistManager};

use crate::api::models::*;

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub struct ApiState {
    pub service_name: String,
    pub started: Instant,
    pub cache: Arc<OptionChainCacheService>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub watchlists: Arc<WatchlistManager>,
}

impl ApiState {
    pub fn new(
        service_name: impl Into<String>,
        cache: Arc<OptionChainCacheService>,
        subscriptions: Arc<SubscriptionManager>,
        watchlists: Arc<WatchlistManager>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            started: Instant::now(),
            cache,
            subscriptions,
            watchlists,
        }
    }
}

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(ErrorResponse::new(message)))
}

fn cache_error(e: CacheError) -> ApiError {
    match e {
        CacheError::NotFound { .. } | CacheError::UnknownUnderlying(_) => {
            api_error(StatusCode::NOT_FOUND, e.to_string())
        }
        CacheError::Upstream(_) => api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
        _ => {
            error!(error = %e, "Chain query failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

fn watchlist_error(e: WatchlistError) -> ApiError {
    let status = match &e {
        WatchlistError::Duplicate { .. } => StatusCode::CONFLICT,
        WatchlistError::NoPrice(_) => StatusCode::SERVICE_UNAVAILABLE,
        WatchlistError::UnknownInstrument { .. } | WatchlistError::Instrument(_) => {
            StatusCode::NOT_FOUND
        }
        WatchlistError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        WatchlistError::Store(_) => {
            error!(error = %e, "Watchlist store failure");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    api_error(status, e.to_string())
}

pub async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let stats = state.subscriptions.stats();
    let connections_up = stats
        .per_connection
        .iter()
        .filter(|c| c.state == ConnectionState::Connected)
        .count();
    let cached_chains = state.cache.chain_count();
    let healthy = cached_chains > 0 && connections_up > 0;

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        active_subscriptions: stats.total,
        cached_chains,
        connections_up,
        connections_total: stats.per_connection.len(),
    })
}

/// Cached chain skeleton, 404 when none is cached
pub async fn get_chain(
    State(state): State<Arc<ApiState>>,
    Path((underlying, expiry)): Path<(String, NaiveDate)>,
) -> Result<Json<OptionChainSkeleton>, ApiError> {
    state
        .cache
        .get(&underlying.to_uppercase(), expiry)
        .map(Json)
        .map_err(cache_error)
}

pub async fn subscription_stats(State(state): State<Arc<ApiState>>) -> Json<SubscriptionStats> {
    Json(state.subscriptions.stats())
}

pub async fn add_to_watchlist(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<AddWatchlistRequest>,
) -> Result<Json<AddWatchlistResponse>, ApiError> {
    let outcome = state
        .watchlists
        .add_to_watchlist(
            &req.user,
            &req.symbol,
            req.expiry,
            req.instrument_type,
            req.underlying_ltp,
        )
        .await
        .map_err(watchlist_error)?;

    if !outcome.accepted {
        warn!(user = %req.user, symbol = %req.symbol, "Watchlist add rejected, no leg could be subscribed");
    }
    Ok(Json(AddWatchlistResponse::from(outcome)))
}

pub async fn remove_from_watchlist(
    State(state): State<Arc<ApiState>>,
    Path((user, symbol, expiry)): Path<(String, String, NaiveDate)>,
) -> Result<Json<RemoveWatchlistResponse>, ApiError> {
    state
        .watchlists
        .remove_from_watchlist(&user, &symbol, expiry)
        .await
        .map(|outcome| Json(RemoveWatchlistResponse::from(outcome)))
        .map_err(watchlist_error)
}

pub async fn get_watchlist(
    State(state): State<Arc<ApiState>>,
    Path(user): Path<String>,
) -> Result<Json<WatchlistResponse>, ApiError> {
    let entries = state.watchlists.entries(&user).await.map_err(watchlist_error)?;
    Ok(Json(WatchlistResponse {
        success: true,
        user,
        entries,
    }))
}
