//! Observability infrastructure for chainfeed
//!
//! This crate provides:
//! - Structured logging via tracing
//! - Prometheus metrics and the feed metric set
//!
//! # Quick Start
//!
//! ```ignore
//! use observability::{init_logging, LogFormat};
//!
//! init_logging("chainfeed", LogFormat::Pretty)?;
//! observability::metrics::init_metrics(9090)?;
//! ```

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{init_metrics, FeedMetrics};
