//! End-of-day reset of user-driven state.
//!
//! Once per trading day, at the configured exchange-local time, every
//! USER_DRIVEN subscription is swept and every watchlist cleared. The
//! ALWAYS_ON baseline is untouched.

use crate::error::WatchlistResult;
use crate::manager::WatchlistManager;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use common::{ExchangeSegment, SharedClock};
use config::{parse_hhmm, EndOfDayConfig};
use observability::FeedMetrics;
use serde::Serialize;
use std::sync::Arc;
use subscription::SubscriptionManager;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use upstream::MarketCalendar;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EodReport {
    pub subscriptions_removed: usize,
    pub entries_cleared: usize,
}

pub struct EndOfDay {
    subscriptions: Arc<SubscriptionManager>,
    watchlists: Arc<WatchlistManager>,
    metrics: FeedMetrics,
}

impl EndOfDay {
    pub fn new(subscriptions: Arc<SubscriptionManager>, watchlists: Arc<WatchlistManager>) -> Self {
        Self {
            subscriptions,
            watchlists,
            metrics: FeedMetrics::new(),
        }
    }

    /// Sweep USER_DRIVEN subscriptions, then clear every watchlist.
    pub async fn run(&self) -> WatchlistResult<EodReport> {
        let subscriptions_removed = self.subscriptions.unsubscribe_all_user_driven();
        let entries_cleared = self.watchlists.clear_all().await?;
        self.metrics.record_eod_sweep();
        info!(subscriptions_removed, entries_cleared, "End-of-day reset complete");
        Ok(EodReport {
            subscriptions_removed,
            entries_cleared,
        })
    }

    /// Run [`Self::run`] at every scheduled time that falls on a trading
    /// day of any segment, until cancelled.
    pub fn spawn_scheduler(
        self: Arc<Self>,
        schedule: EodSchedule,
        calendar: Arc<dyn MarketCalendar>,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(time = %schedule.time, "End-of-day scheduler started");
            let mut last_run: Option<NaiveDate> = None;
            loop {
                let now = clock.now();
                let next = schedule.next_after(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(%next, ?wait, "Next end-of-day check");

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }

                let date = schedule.local_date(next);
                if last_run == Some(date) {
                    continue;
                }
                last_run = Some(date);

                let trading = ExchangeSegment::ALL
                    .iter()
                    .any(|s| calendar.is_trading_day(*s, date));
                if !trading {
                    debug!(%date, "Not a trading day, skipping end-of-day reset");
                    continue;
                }
                if let Err(e) = self.run().await {
                    error!(error = %e, "End-of-day reset failed");
                }
            }
            info!("End-of-day scheduler stopped");
        })
    }
}

/// Daily fire time in exchange-local time.
#[derive(Debug, Clone, Copy)]
pub struct EodSchedule {
    pub time: NaiveTime,
    pub offset: FixedOffset,
}

impl EodSchedule {
    /// `None` when the configured time does not parse.
    pub fn from_config(config: &EndOfDayConfig, offset: FixedOffset) -> Option<Self> {
        parse_hhmm(&config.time).map(|time| Self { time, offset })
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local_date(now);
        let at = |date: NaiveDate| {
            self.offset
                .from_local_datetime(&date.and_time(self.time))
                .single()
                .map(|dt| dt.with_timezone(&Utc))
        };
        match at(today) {
            Some(fire) if fire > now => fire,
            _ => at(today + Duration::days(1)).unwrap_or(now + Duration::days(1)),
        }
    }
}
