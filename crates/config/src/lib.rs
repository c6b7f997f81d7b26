use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod defaults;
pub mod parser;
pub mod substitution;
pub mod validator;

pub use defaults::*;
pub use parser::*;
pub use substitution::*;
pub use validator::*;

/// Root of the YAML configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub instruments: InstrumentsConfig,
    #[serde(default)]
    pub atm: AtmConfig,
    #[serde(default)]
    pub subscriptions: SubscriptionsConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub broker_api: BrokerApiConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub end_of_day: EndOfDayConfig,
    #[serde(default)]
    pub watchlist: WatchlistConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstrumentsConfig {
    /// CSV instrument master
    #[serde(default = "default_instrument_master_path")]
    pub master_path: String,
    /// CSV table of previous-session closing prices (security_id, close)
    #[serde(default)]
    pub closing_prices_path: Option<String>,
    /// Underlyings whose chains are cached and optionally kept always-on
    #[serde(default)]
    pub tracked: Vec<TrackedUnderlying>,
}

impl Default for InstrumentsConfig {
    fn default() -> Self {
        Self {
            master_path: default_instrument_master_path(),
            closing_prices_path: None,
            tracked: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackedUnderlying {
    pub symbol: String,
    /// Number of nearest expiries to cache
    #[serde(default = "default_tracked_expiries")]
    pub expiries: u32,
    /// Subscribe the spot and the nearest-expiry ATM chain at startup
    #[serde(default)]
    pub always_on: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AtmConfig {
    #[serde(default = "default_index_strikes_each_side")]
    pub index_strikes_each_side: u32,
    #[serde(default = "default_stock_strikes_each_side")]
    pub stock_strikes_each_side: u32,
    /// Fallback strike step when none can be derived
    #[serde(default = "default_min_strike_step")]
    pub min_strike_step: f64,
    #[serde(default = "default_ladder_ttl_seconds")]
    pub ladder_ttl_seconds: u64,
}

impl Default for AtmConfig {
    fn default() -> Self {
        Self {
            index_strikes_each_side: default_index_strikes_each_side(),
            stock_strikes_each_side: default_stock_strikes_each_side(),
            min_strike_step: default_min_strike_step(),
            ladder_ttl_seconds: default_ladder_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionsConfig {
    /// Hard ceiling on concurrently streamed instruments
    #[serde(default = "default_global_capacity")]
    pub global_capacity: usize,
}

impl Default for SubscriptionsConfig {
    fn default() -> Self {
        Self {
            global_capacity: default_global_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionsConfig {
    #[serde(default = "default_connection_count")]
    pub count: usize,
    #[serde(default = "default_capacity_per_connection")]
    pub capacity_per_connection: usize,
    #[serde(default = "default_max_tokens_per_message")]
    pub max_tokens_per_message: usize,
    /// Max allowed difference between the busiest and idlest connection
    #[serde(default = "default_rebalance_threshold")]
    pub rebalance_threshold: usize,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            count: default_connection_count(),
            capacity_per_connection: default_capacity_per_connection(),
            max_tokens_per_message: default_max_tokens_per_message(),
            rebalance_threshold: default_rebalance_threshold(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Consecutive failures before entering cooldown
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    #[serde(default = "default_feed_url")]
    pub url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_token: String,
    /// Bound on a single connect attempt
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl FeedConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: default_feed_url(),
            client_id: String::new(),
            access_token: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerApiConfig {
    #[serde(default = "default_broker_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub rate_limits: RateLimitsConfig,
    #[serde(default)]
    pub cache: RestCacheConfig,
    /// Pause applied to an endpoint class after it fails
    #[serde(default)]
    pub failure_backoff: RestBackoffConfig,
}

impl BrokerApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for BrokerApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_broker_base_url(),
            client_id: String::new(),
            access_token: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            rate_limits: RateLimitsConfig::default(),
            cache: RestCacheConfig::default(),
            failure_backoff: RestBackoffConfig::default(),
        }
    }
}

/// Sliding-window limit for one endpoint class
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_quote_rate_limit")]
    pub quote: RateLimitConfig,
    #[serde(default = "default_option_chain_rate_limit")]
    pub option_chain: RateLimitConfig,
    #[serde(default = "default_expiry_list_rate_limit")]
    pub expiry_list: RateLimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            quote: default_quote_rate_limit(),
            option_chain: default_option_chain_rate_limit(),
            expiry_list: default_expiry_list_rate_limit(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestCacheConfig {
    #[serde(default = "default_quote_ttl_ms")]
    pub quote_ttl_ms: u64,
    #[serde(default = "default_chain_ttl_seconds")]
    pub chain_ttl_seconds: u64,
    #[serde(default = "default_expiry_ttl_seconds")]
    pub expiry_ttl_seconds: u64,
}

impl Default for RestCacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_ms: default_quote_ttl_ms(),
            chain_ttl_seconds: default_chain_ttl_seconds(),
            expiry_ttl_seconds: default_expiry_ttl_seconds(),
        }
    }
}

/// Exponential pause per endpoint class; doubles on each consecutive failure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestBackoffConfig {
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl RestBackoffConfig {
    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RestBackoffConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionsConfig {
    /// Offset of exchange local time from UTC
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// Exchange holidays, YYYY-MM-DD
    #[serde(default)]
    pub holidays: Vec<String>,
    #[serde(default = "default_session_windows")]
    pub windows: Vec<SegmentSessionConfig>,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: default_utc_offset_minutes(),
            holidays: Vec::new(),
            windows: default_session_windows(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SegmentSessionConfig {
    pub segment: String,
    /// Local open time, HH:MM
    pub open: String,
    /// Local close time, HH:MM
    pub close: String,
    #[serde(default = "default_weekdays")]
    pub weekdays: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_reconcile_interval_seconds")]
    pub reconcile_interval_seconds: u64,
    /// Underlying used to pick the startup price source; defaults to the first tracked one
    #[serde(default)]
    pub representative_underlying: Option<String>,
    #[serde(default)]
    pub decay: DecayConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_seconds: default_reconcile_interval_seconds(),
            representative_underlying: None,
            decay: DecayConfig::default(),
        }
    }
}

/// Parameters of the distance-from-ATM premium estimate
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DecayConfig {
    /// ATM time value as a fraction of spot
    #[serde(default = "default_atm_premium_pct")]
    pub atm_premium_pct: f64,
    /// Width of the decay curve, in strike steps
    #[serde(default = "default_decay_width")]
    pub decay_width: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            atm_premium_pct: default_atm_premium_pct(),
            decay_width: default_decay_width(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndOfDayConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Local time of the user-driven sweep, HH:MM
    #[serde(default = "default_eod_time")]
    pub time: String,
}

impl Default for EndOfDayConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            time: default_eod_time(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchlistStoreKind {
    Memory,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchlistConfig {
    #[serde(default = "default_watchlist_store")]
    pub store: WatchlistStoreKind,
    /// Snapshot path for the file store
    #[serde(default)]
    pub path: Option<String>,
}

impl Default for WatchlistConfig {
    fn default() -> Self {
        Self {
            store: default_watchlist_store(),
            path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// pretty, json or compact
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// Parse an `HH:MM` string.
pub fn parse_hhmm(value: &str) -> Option<chrono::NaiveTime> {
    chrono::NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Parse a lowercase three-letter weekday name.
pub fn parse_weekday(value: &str) -> Option<chrono::Weekday> {
    match value.trim().to_ascii_lowercase().as_str() {
        "mon" => Some(chrono::Weekday::Mon),
        "tue" => Some(chrono::Weekday::Tue),
        "wed" => Some(chrono::Weekday::Wed),
        "thu" => Some(chrono::Weekday::Thu),
        "fri" => Some(chrono::Weekday::Fri),
        "sat" => Some(chrono::Weekday::Sat),
        "sun" => Some(chrono::Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config: MasterConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.service.name, "chainfeed");
        assert_eq!(config.subscriptions.global_capacity, 5000);
        assert_eq!(config.connections.count, 5);
        assert_eq!(config.connections.reconnect.failure_threshold, 5);
        assert_eq!(config.sessions.windows.len(), 6);
        assert_eq!(config.watchlist.store, WatchlistStoreKind::Memory);
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let yaml = r#"
connections:
  count: 2
  reconnect:
    max_backoff_ms: 8000
instruments:
  tracked:
    - symbol: NIFTY
      always_on: true
"#;
        let config: MasterConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.connections.count, 2);
        assert_eq!(config.connections.capacity_per_connection, 1000);
        assert_eq!(config.connections.reconnect.max_backoff_ms, 8000);
        assert_eq!(config.connections.reconnect.initial_backoff_ms, 1000);
        assert_eq!(config.instruments.tracked[0].expiries, 1);
        assert!(config.instruments.tracked[0].always_on);
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(
            parse_hhmm("09:15"),
            chrono::NaiveTime::from_hms_opt(9, 15, 0)
        );
        assert!(parse_hhmm("9.15").is_none());
        assert_eq!(parse_weekday("Fri"), Some(chrono::Weekday::Fri));
        assert!(parse_weekday("friday").is_none());
    }
}
