//! Market calendar - per-segment trading session windows

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Offset, Utc, Weekday};
use common::ExchangeSegment;
use config::{parse_hhmm, parse_weekday, SessionsConfig};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Answers whether a segment's trading session is open at an instant.
pub trait MarketCalendar: Send + Sync {
    fn is_session_open(&self, segment: ExchangeSegment, now: DateTime<Utc>) -> bool;

    /// Whether `date` (exchange local) is a trading day for `segment`.
    fn is_trading_day(&self, segment: ExchangeSegment, date: NaiveDate) -> bool;
}

#[derive(Debug, Clone)]
struct SessionWindow {
    open: NaiveTime,
    close: NaiveTime,
    weekdays: HashSet<Weekday>,
}

/// Calendar built from configured session windows.
#[derive(Debug, Clone)]
pub struct SessionCalendar {
    offset: FixedOffset,
    holidays: HashSet<NaiveDate>,
    windows: HashMap<ExchangeSegment, SessionWindow>,
}

impl SessionCalendar {
    /// Build from config. Entries that fail to parse are skipped; the
    /// config validator reports them.
    pub fn from_config(config: &SessionsConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());

        let holidays = config
            .holidays
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").ok())
            .collect();

        let mut windows = HashMap::new();
        for window in &config.windows {
            let (Ok(segment), Some(open), Some(close)) = (
                window.segment.parse::<ExchangeSegment>(),
                parse_hhmm(&window.open),
                parse_hhmm(&window.close),
            ) else {
                tracing::warn!(segment = %window.segment, "Skipping unparseable session window");
                continue;
            };
            let weekdays = window
                .weekdays
                .iter()
                .filter_map(|d| parse_weekday(d))
                .collect();
            windows.insert(
                segment,
                SessionWindow {
                    open,
                    close,
                    weekdays,
                },
            );
        }

        Self {
            offset,
            holidays,
            windows,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Exchange-local date of an instant.
    pub fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }
}

impl MarketCalendar for SessionCalendar {
    fn is_session_open(&self, segment: ExchangeSegment, now: DateTime<Utc>) -> bool {
        let local = now.with_timezone(&self.offset);
        if !self.is_trading_day(segment, local.date_naive()) {
            return false;
        }
        let Some(window) = self.windows.get(&segment) else {
            return false;
        };
        let time = local.time();
        time >= window.open && time < window.close
    }

    fn is_trading_day(&self, segment: ExchangeSegment, date: NaiveDate) -> bool {
        if self.holidays.contains(&date) {
            return false;
        }
        self.windows
            .get(&segment)
            .map(|w| w.weekdays.contains(&date.weekday()))
            .unwrap_or(false)
    }
}

/// Calendar whose open/closed state is set by hand, per segment.
#[derive(Debug, Default)]
pub struct ManualCalendar {
    open: RwLock<HashSet<ExchangeSegment>>,
}

impl ManualCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_open(&self, segment: ExchangeSegment, open: bool) {
        let mut segments = self.open.write();
        if open {
            segments.insert(segment);
        } else {
            segments.remove(&segment);
        }
    }
}

impl MarketCalendar for ManualCalendar {
    fn is_session_open(&self, segment: ExchangeSegment, _now: DateTime<Utc>) -> bool {
        self.open.read().contains(&segment)
    }

    fn is_trading_day(&self, _segment: ExchangeSegment, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn calendar() -> SessionCalendar {
        let mut config = SessionsConfig::default();
        config.holidays = vec!["2024-03-25".to_string()];
        SessionCalendar::from_config(&config)
    }

    #[test]
    fn test_nse_window_in_ist() {
        let cal = calendar();
        // Thu 2024-03-28 10:00 IST = 04:30 UTC
        let open = Utc.with_ymd_and_hms(2024, 3, 28, 4, 30, 0).unwrap();
        assert!(cal.is_session_open(ExchangeSegment::NseFno, open));

        // 16:00 IST
        let after = Utc.with_ymd_and_hms(2024, 3, 28, 10, 30, 0).unwrap();
        assert!(!cal.is_session_open(ExchangeSegment::NseFno, after));
        // MCX trades into the evening
        assert!(cal.is_session_open(ExchangeSegment::McxCommodity, after));
    }

    #[test]
    fn test_weekend_and_holiday_closed() {
        let cal = calendar();
        let saturday = Utc.with_ymd_and_hms(2024, 3, 23, 5, 0, 0).unwrap();
        assert!(!cal.is_session_open(ExchangeSegment::NseEquity, saturday));

        let holiday = Utc.with_ymd_and_hms(2024, 3, 25, 5, 0, 0).unwrap();
        assert!(!cal.is_session_open(ExchangeSegment::NseEquity, holiday));
        assert!(!cal.is_trading_day(
            ExchangeSegment::NseEquity,
            NaiveDate::from_ymd_opt(2024, 3, 25).unwrap()
        ));
    }

    #[test]
    fn test_manual_calendar_toggles() {
        let cal = ManualCalendar::new();
        let now = Utc::now();
        assert!(!cal.is_session_open(ExchangeSegment::Index, now));
        cal.set_open(ExchangeSegment::Index, true);
        assert!(cal.is_session_open(ExchangeSegment::Index, now));
    }
}
