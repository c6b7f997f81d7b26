use crate::*;
use common::ExchangeSegment;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidationError {
    #[error("Service name is required")]
    MissingServiceName,

    #[error("Instrument master path is required")]
    MissingInstrumentMaster,

    #[error("Tracked underlying #{index}: {message}")]
    InvalidTrackedUnderlying { index: usize, message: String },

    #[error("{field} must be a positive integer")]
    InvalidPositiveInteger { field: String },

    #[error("{field} must be a positive float")]
    InvalidPositiveFloat { field: String },

    #[error("Reconnect: {message}")]
    InvalidReconnect { message: String },

    #[error("Invalid URL for {field}: {url}")]
    InvalidUrl { field: String, url: String },

    #[error("Invalid time format '{time}': {message}")]
    InvalidTimeFormat { time: String, message: String },

    #[error("Session window for '{segment}': {message}")]
    InvalidSessionWindow { segment: String, message: String },

    #[error("Invalid holiday date '{0}'. Expected YYYY-MM-DD")]
    InvalidHoliday(String),

    #[error("Watchlist: {message}")]
    InvalidWatchlist { message: String },

    #[error("Invalid log format: {0}. Must be one of: pretty, json, compact")]
    InvalidLogFormat(String),
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct DefaultApplied {
    pub field: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
    pub defaults_applied: Vec<DefaultApplied>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            defaults_applied: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, field: &str, message: &str) {
        self.warnings.push(ValidationWarning {
            field: field.to_string(),
            message: message.to_string(),
        });
    }

    pub fn add_default(&mut self, field: &str, value: &str) {
        self.defaults_applied.push(DefaultApplied {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_config(config: &MasterConfig) -> ValidationReport {
    let mut report = ValidationReport::new();

    if config.service.name.trim().is_empty() {
        report.add_error(ValidationError::MissingServiceName);
    }

    validate_instruments(&config.instruments, &mut report);
    validate_atm(&config.atm, &mut report);
    validate_capacity(&config.subscriptions, &config.connections, &mut report);
    validate_reconnect(&config.connections.reconnect, &mut report);
    validate_feed(&config.feed, &mut report);
    validate_broker_api(&config.broker_api, &mut report);
    validate_sessions(&config.sessions, &mut report);
    validate_cache(&config.cache, &config.instruments, &mut report);
    validate_end_of_day(&config.end_of_day, &mut report);
    validate_watchlist(&config.watchlist, &mut report);

    if is_unknown_log_format(&config.logging.format) {
        report.add_error(ValidationError::InvalidLogFormat(
            config.logging.format.clone(),
        ));
    }

    report
}

fn is_unknown_log_format(format: &str) -> bool {
    !matches!(
        format.to_lowercase().as_str(),
        "pretty" | "json" | "compact"
    )
}

fn validate_instruments(instruments: &InstrumentsConfig, report: &mut ValidationReport) {
    if instruments.master_path.trim().is_empty() {
        report.add_error(ValidationError::MissingInstrumentMaster);
    }

    if instruments.tracked.is_empty() {
        report.add_warning(
            "instruments.tracked",
            "No tracked underlyings; the option chain cache will be empty and startup will fail",
        );
    }

    let mut seen = HashSet::new();
    for (index, tracked) in instruments.tracked.iter().enumerate() {
        if tracked.symbol.trim().is_empty() {
            report.add_error(ValidationError::InvalidTrackedUnderlying {
                index,
                message: "symbol is required".to_string(),
            });
        }
        if tracked.expiries == 0 {
            report.add_error(ValidationError::InvalidTrackedUnderlying {
                index,
                message: "expiries must be at least 1".to_string(),
            });
        }
        if !seen.insert(tracked.symbol.to_uppercase()) {
            report.add_error(ValidationError::InvalidTrackedUnderlying {
                index,
                message: format!("duplicate symbol '{}'", tracked.symbol),
            });
        }
    }

    if instruments.closing_prices_path.is_none() {
        report.add_warning(
            "instruments.closing_prices_path",
            "No closing price table; chains outside market hours will only carry estimates",
        );
    }
}

fn validate_atm(atm: &AtmConfig, report: &mut ValidationReport) {
    if atm.index_strikes_each_side == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "atm.index_strikes_each_side".to_string(),
        });
    }
    if atm.stock_strikes_each_side == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "atm.stock_strikes_each_side".to_string(),
        });
    }
    if !(atm.min_strike_step.is_finite() && atm.min_strike_step > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "atm.min_strike_step".to_string(),
        });
    }
    if atm.stock_strikes_each_side > atm.index_strikes_each_side {
        report.add_warning(
            "atm.stock_strikes_each_side",
            "Stock chains are wider than index chains",
        );
    }
    if atm.ladder_ttl_seconds == 0 {
        report.add_default("atm.ladder_ttl_seconds", "0 (TTL refresh disabled)");
    }
}

fn validate_capacity(
    subscriptions: &SubscriptionsConfig,
    connections: &ConnectionsConfig,
    report: &mut ValidationReport,
) {
    let positive = [
        ("subscriptions.global_capacity", subscriptions.global_capacity),
        ("connections.count", connections.count),
        (
            "connections.capacity_per_connection",
            connections.capacity_per_connection,
        ),
        (
            "connections.max_tokens_per_message",
            connections.max_tokens_per_message,
        ),
    ];
    for (field, value) in positive {
        if value == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    let pool_capacity = connections.count * connections.capacity_per_connection;
    if pool_capacity > 0 && pool_capacity < subscriptions.global_capacity {
        report.add_warning(
            "subscriptions.global_capacity",
            &format!(
                "Global capacity {} exceeds pool capacity {}; the pool limit applies first",
                subscriptions.global_capacity, pool_capacity
            ),
        );
    }

    if connections.rebalance_threshold == 0 {
        report.add_default(
            "connections.rebalance_threshold",
            "0 (rebalance towards exact equality)",
        );
    }
}

fn validate_reconnect(reconnect: &ReconnectConfig, report: &mut ValidationReport) {
    if reconnect.initial_backoff_ms == 0 {
        report.add_error(ValidationError::InvalidReconnect {
            message: "initial_backoff_ms must be positive".to_string(),
        });
    }
    if reconnect.max_backoff_ms < reconnect.initial_backoff_ms {
        report.add_error(ValidationError::InvalidReconnect {
            message: format!(
                "max_backoff_ms ({}) is smaller than initial_backoff_ms ({})",
                reconnect.max_backoff_ms, reconnect.initial_backoff_ms
            ),
        });
    }
    if reconnect.failure_threshold == 0 {
        report.add_error(ValidationError::InvalidReconnect {
            message: "failure_threshold must be at least 1".to_string(),
        });
    }
    if reconnect.cooldown_seconds == 0 {
        report.add_warning(
            "connections.reconnect.cooldown_seconds",
            "Zero cooldown lets a failing connection retry immediately",
        );
    }
}

fn validate_url(field: &str, value: &str, schemes: &[&str], report: &mut ValidationReport) {
    match url::Url::parse(value) {
        Ok(parsed) if schemes.contains(&parsed.scheme()) => {}
        _ => report.add_error(ValidationError::InvalidUrl {
            field: field.to_string(),
            url: value.to_string(),
        }),
    }
}

fn validate_feed(feed: &FeedConfig, report: &mut ValidationReport) {
    validate_url("feed.url", &feed.url, &["ws", "wss"], report);

    if has_unresolved_env_vars(&feed.client_id) || has_unresolved_env_vars(&feed.access_token) {
        report.add_warning(
            "feed",
            "Credentials contain unresolved environment variables",
        );
    }
    if feed.connect_timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "feed.connect_timeout_ms".to_string(),
        });
    }
}

fn validate_broker_api(api: &BrokerApiConfig, report: &mut ValidationReport) {
    validate_url("broker_api.base_url", &api.base_url, &["http", "https"], report);

    if api.request_timeout_ms == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "broker_api.request_timeout_ms".to_string(),
        });
    }

    let limits = [
        ("broker_api.rate_limits.quote", api.rate_limits.quote),
        ("broker_api.rate_limits.option_chain", api.rate_limits.option_chain),
        ("broker_api.rate_limits.expiry_list", api.rate_limits.expiry_list),
    ];
    for (field, limit) in limits {
        if limit.max_requests == 0 || limit.window_ms == 0 {
            report.add_error(ValidationError::InvalidPositiveInteger {
                field: field.to_string(),
            });
        }
    }

    if api.failure_backoff.max_backoff_ms < api.failure_backoff.initial_backoff_ms {
        report.add_error(ValidationError::InvalidReconnect {
            message: format!(
                "broker_api.failure_backoff.max_backoff_ms ({}) is smaller than initial_backoff_ms ({})",
                api.failure_backoff.max_backoff_ms, api.failure_backoff.initial_backoff_ms
            ),
        });
    }

    if api.cache.quote_ttl_ms > api.cache.chain_ttl_seconds * 1000 {
        report.add_warning(
            "broker_api.cache.quote_ttl_ms",
            "Quotes are cached longer than option chains",
        );
    }
}

fn validate_sessions(sessions: &SessionsConfig, report: &mut ValidationReport) {
    if sessions.utc_offset_minutes.abs() > 14 * 60 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "sessions.utc_offset_minutes (|offset| <= 840)".to_string(),
        });
    }

    for holiday in &sessions.holidays {
        if chrono::NaiveDate::parse_from_str(holiday, "%Y-%m-%d").is_err() {
            report.add_error(ValidationError::InvalidHoliday(holiday.clone()));
        }
    }

    let mut seen = HashSet::new();
    for window in &sessions.windows {
        if window.segment.parse::<ExchangeSegment>().is_err() {
            report.add_error(ValidationError::InvalidSessionWindow {
                segment: window.segment.clone(),
                message: "unknown exchange segment".to_string(),
            });
        }
        if !seen.insert(window.segment.to_uppercase()) {
            report.add_error(ValidationError::InvalidSessionWindow {
                segment: window.segment.clone(),
                message: "defined more than once".to_string(),
            });
        }

        let open = parse_hhmm(&window.open);
        let close = parse_hhmm(&window.close);
        match (open, close) {
            (Some(open), Some(close)) if open >= close => {
                report.add_error(ValidationError::InvalidSessionWindow {
                    segment: window.segment.clone(),
                    message: format!("open {} is not before close {}", window.open, window.close),
                });
            }
            (Some(_), Some(_)) => {}
            _ => report.add_error(ValidationError::InvalidTimeFormat {
                time: format!("{}-{}", window.open, window.close),
                message: "expected HH:MM".to_string(),
            }),
        }

        for day in &window.weekdays {
            if parse_weekday(day).is_none() {
                report.add_error(ValidationError::InvalidSessionWindow {
                    segment: window.segment.clone(),
                    message: format!("unknown weekday '{}'", day),
                });
            }
        }
    }
}

fn validate_cache(cache: &CacheConfig, instruments: &InstrumentsConfig, report: &mut ValidationReport) {
    if cache.reconcile_interval_seconds == 0 {
        report.add_error(ValidationError::InvalidPositiveInteger {
            field: "cache.reconcile_interval_seconds".to_string(),
        });
    }

    match &cache.representative_underlying {
        Some(symbol) => {
            if !instruments
                .tracked
                .iter()
                .any(|t| t.symbol.eq_ignore_ascii_case(symbol))
            {
                report.add_warning(
                    "cache.representative_underlying",
                    &format!("'{}' is not a tracked underlying", symbol),
                );
            }
        }
        None => {
            if let Some(first) = instruments.tracked.first() {
                report.add_default("cache.representative_underlying", &first.symbol);
            }
        }
    }

    if !(cache.decay.atm_premium_pct.is_finite() && cache.decay.atm_premium_pct > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "cache.decay.atm_premium_pct".to_string(),
        });
    }
    if !(cache.decay.decay_width.is_finite() && cache.decay.decay_width > 0.0) {
        report.add_error(ValidationError::InvalidPositiveFloat {
            field: "cache.decay.decay_width".to_string(),
        });
    }
}

fn validate_end_of_day(eod: &EndOfDayConfig, report: &mut ValidationReport) {
    if parse_hhmm(&eod.time).is_none() {
        report.add_error(ValidationError::InvalidTimeFormat {
            time: eod.time.clone(),
            message: "expected HH:MM".to_string(),
        });
    }
    if !eod.enabled {
        report.add_warning(
            "end_of_day.enabled",
            "End-of-day sweep disabled; user-driven subscriptions persist across sessions",
        );
    }
}

fn validate_watchlist(watchlist: &WatchlistConfig, report: &mut ValidationReport) {
    if watchlist.store == WatchlistStoreKind::File
        && watchlist.path.as_deref().map_or(true, |p| p.trim().is_empty())
    {
        report.add_error(ValidationError::InvalidWatchlist {
            message: "file store requires watchlist.path".to_string(),
        });
    }
}
