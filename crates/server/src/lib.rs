//! # Server Crate
//!
//! Runs the feed: assembles every component from configuration, routes
//! ticks, drives the periodic tasks and serves the JSON query surface.
//!
//! ## Key Components
//!
//! - **App**: [`FeedServices`] wiring and the [`FeedApp`] lifecycle
//!   (populate, baseline, workers, reconciliation, end of day, HTTP)
//! - **Baseline**: [`Baseline`] keeps ALWAYS_ON spot and ATM ladder legs
//!   subscribed and rolls them as the ATM strike moves
//! - **Ticks**: [`TickRouter`] sends underlying ticks to the cache and the
//!   ATM engine, and leg ticks to the cache
//! - **API**: axum routes under `/api/v1` plus `/health`
//! - **Shutdown**: [`ShutdownController`] owns the root cancellation token
//!
//! ## Routes
//!
//! | Method | Path | Response |
//! |--------|------|----------|
//! | GET | `/health` | service status |
//! | GET | `/api/v1/chains/:underlying/:expiry` | chain skeleton, 404 when not cached |
//! | GET | `/api/v1/subscriptions/stats` | ledger totals per tier and connection |
//! | POST | `/api/v1/watchlist` | `{accepted, legs_subscribed, legs_requested}` |
//! | GET | `/api/v1/watchlist/:user` | the user's entries |
//! | DELETE | `/api/v1/watchlist/:user/:symbol/:expiry` | `{removed}` |

pub mod api;
pub mod app;
pub mod baseline;
pub mod error;
pub mod http;
pub mod listener;
pub mod shutdown;
pub mod tasks;
pub mod ticks;

#[cfg(test)]
pub(crate) mod test_support;

pub use api::{create_router, ApiState};
pub use app::{FeedApp, FeedParts, FeedServices};
pub use baseline::{price_instrument, Baseline, BaselineReport};
pub use error::{Result, ServerError};
pub use http::HttpServer;
pub use listener::ServerConfig;
pub use shutdown::ShutdownController;
pub use tasks::spawn_reconcile_loop;
pub use ticks::TickRouter;
