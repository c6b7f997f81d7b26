pub fn default_enabled() -> bool {
    true
}

pub fn default_service_name() -> String {
    "chainfeed".to_string()
}

pub fn default_instrument_master_path() -> String {
    "data/instruments.csv".to_string()
}

pub fn default_index_strikes_each_side() -> u32 {
    10
}

pub fn default_stock_strikes_each_side() -> u32 {
    5
}

pub fn default_min_strike_step() -> f64 {
    0.05
}

pub fn default_ladder_ttl_seconds() -> u64 {
    300
}

pub fn default_global_capacity() -> usize {
    5000
}

pub fn default_tracked_expiries() -> u32 {
    1
}

pub fn default_connection_count() -> usize {
    5
}

pub fn default_capacity_per_connection() -> usize {
    1000
}

pub fn default_max_tokens_per_message() -> usize {
    100
}

pub fn default_rebalance_threshold() -> usize {
    50
}

pub fn default_initial_backoff_ms() -> u64 {
    1_000
}

pub fn default_max_backoff_ms() -> u64 {
    60_000
}

pub fn default_failure_threshold() -> u32 {
    5
}

pub fn default_cooldown_seconds() -> u64 {
    300
}

pub fn default_feed_url() -> String {
    "wss://api-feed.dhan.co".to_string()
}

pub fn default_connect_timeout_ms() -> u64 {
    10_000
}

pub fn default_broker_base_url() -> String {
    "https://api.dhan.co/v2".to_string()
}

pub fn default_request_timeout_ms() -> u64 {
    5_000
}

pub fn default_quote_rate_limit() -> super::RateLimitConfig {
    super::RateLimitConfig {
        max_requests: 1,
        window_ms: 1_000,
    }
}

pub fn default_option_chain_rate_limit() -> super::RateLimitConfig {
    super::RateLimitConfig {
        max_requests: 1,
        window_ms: 3_000,
    }
}

pub fn default_expiry_list_rate_limit() -> super::RateLimitConfig {
    super::RateLimitConfig {
        max_requests: 1,
        window_ms: 3_000,
    }
}

pub fn default_quote_ttl_ms() -> u64 {
    1_000
}

pub fn default_chain_ttl_seconds() -> u64 {
    60
}

pub fn default_expiry_ttl_seconds() -> u64 {
    3_600
}

pub fn default_utc_offset_minutes() -> i32 {
    330
}

pub fn default_weekdays() -> Vec<String> {
    ["mon", "tue", "wed", "thu", "fri"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

pub fn default_session_windows() -> Vec<super::SegmentSessionConfig> {
    use super::SegmentSessionConfig;

    let window = |segment: &str, open: &str, close: &str| SegmentSessionConfig {
        segment: segment.to_string(),
        open: open.to_string(),
        close: close.to_string(),
        weekdays: default_weekdays(),
    };

    vec![
        window("IDX_I", "09:15", "15:30"),
        window("NSE_EQ", "09:15", "15:30"),
        window("NSE_FNO", "09:15", "15:30"),
        window("BSE_EQ", "09:15", "15:30"),
        window("BSE_FNO", "09:15", "15:30"),
        window("MCX_COMM", "09:00", "23:30"),
    ]
}

pub fn default_reconcile_interval_seconds() -> u64 {
    60
}

pub fn default_atm_premium_pct() -> f64 {
    0.01
}

pub fn default_decay_width() -> f64 {
    4.0
}

pub fn default_eod_time() -> String {
    "15:35".to_string()
}

pub fn default_watchlist_store() -> super::WatchlistStoreKind {
    super::WatchlistStoreKind::Memory
}

pub fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

pub fn default_api_port() -> u16 {
    8080
}

pub fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn default_metrics_port() -> u16 {
    9090
}
