//! Prometheus metrics
//!
//! Exporter bootstrap plus [`FeedMetrics`], the named metric set recorded by
//! the subscription ledger, the connection workers and the chain cache.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Start the Prometheus exporter on `0.0.0.0:{port}/metrics`.
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Metric names
pub mod names {
    pub const ACTIVE_SUBSCRIPTIONS: &str = "chainfeed_active_subscriptions";
    pub const SUBSCRIPTION_EVICTIONS: &str = "chainfeed_subscription_evictions_total";
    pub const CAPACITY_REJECTIONS: &str = "chainfeed_capacity_rejections_total";
    pub const CONNECTION_LOAD: &str = "chainfeed_connection_instruments";
    pub const RECONNECT_ATTEMPTS: &str = "chainfeed_reconnect_attempts_total";
    pub const RECONNECT_FAILURES: &str = "chainfeed_reconnect_failures_total";
    pub const CONNECTION_COOLDOWNS: &str = "chainfeed_connection_cooldowns_total";
    pub const TICKS_RECEIVED: &str = "chainfeed_ticks_received_total";
    pub const SOURCE_TRANSITIONS: &str = "chainfeed_price_source_transitions_total";
    pub const REST_LATENCY: &str = "chainfeed_rest_request_duration_seconds";
    pub const REST_FAILURES: &str = "chainfeed_rest_failures_total";
    pub const EOD_SWEEPS: &str = "chainfeed_eod_sweeps_total";
}

/// Metric recording for the feed core.
///
/// Cheap to clone; every method resolves its handle through the global
/// recorder, so it is a no-op until [`init_metrics`] installs one.
#[derive(Debug, Clone, Default)]
pub struct FeedMetrics;

impl FeedMetrics {
    pub fn new() -> Self {
        Self
    }

    pub fn set_active_subscriptions(&self, tier: &'static str, count: usize) {
        gauge!(names::ACTIVE_SUBSCRIPTIONS, "tier" => tier).set(count as f64);
    }

    pub fn record_eviction(&self) {
        counter!(names::SUBSCRIPTION_EVICTIONS).increment(1);
    }

    pub fn record_capacity_rejection(&self, tier: &'static str) {
        counter!(names::CAPACITY_REJECTIONS, "tier" => tier).increment(1);
    }

    pub fn set_connection_load(&self, connection: usize, count: usize) {
        gauge!(names::CONNECTION_LOAD, "connection" => connection.to_string()).set(count as f64);
    }

    pub fn record_reconnect_attempt(&self, connection: usize) {
        counter!(names::RECONNECT_ATTEMPTS, "connection" => connection.to_string()).increment(1);
    }

    pub fn record_reconnect_failure(&self, connection: usize) {
        counter!(names::RECONNECT_FAILURES, "connection" => connection.to_string()).increment(1);
    }

    pub fn record_cooldown(&self, connection: usize) {
        counter!(names::CONNECTION_COOLDOWNS, "connection" => connection.to_string()).increment(1);
    }

    pub fn record_tick(&self, connection: usize) {
        counter!(names::TICKS_RECEIVED, "connection" => connection.to_string()).increment(1);
    }

    pub fn record_source_transition(&self, underlying: &str, to: &'static str) {
        counter!(
            names::SOURCE_TRANSITIONS,
            "underlying" => underlying.to_string(),
            "to" => to
        )
        .increment(1);
    }

    pub fn record_rest_call(&self, endpoint: &'static str, duration: Duration, ok: bool) {
        histogram!(names::REST_LATENCY, "endpoint" => endpoint).record(duration.as_secs_f64());
        if !ok {
            counter!(names::REST_FAILURES, "endpoint" => endpoint).increment(1);
        }
    }

    pub fn record_eod_sweep(&self) {
        counter!(names::EOD_SWEEPS).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = FeedMetrics::new();
        metrics.set_active_subscriptions("always_on", 3);
        metrics.record_eviction();
        metrics.record_reconnect_attempt(0);
        metrics.record_rest_call("quote", Duration::from_millis(12), false);
    }
}
