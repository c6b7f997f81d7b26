//! Periodic background tasks

use market_data::OptionChainCacheService;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Reconcile the cache's price sources every `interval` until cancelled.
/// The first pass runs one interval after start; populate has just run.
pub fn spawn_reconcile_loop(
    cache: Arc<OptionChainCacheService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(?interval, "Cache reconciliation started");
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let transitions = cache.reconcile().await;
                    debug!(transitions = transitions.len(), "Reconciliation pass complete");
                }
            }
        }
        info!("Cache reconciliation stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::feed_services;
    use common::ExchangeSegment;
    use instrument::testing::nifty_expiry;
    use market_data::PriceSource;

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_loop_switches_source_when_session_opens() {
        let services = feed_services(&["NIFTY"], &[]).await;
        assert_eq!(
            services.cache.session("NIFTY").unwrap().source,
            PriceSource::Closing
        );

        let cancel = CancellationToken::new();
        let handle = spawn_reconcile_loop(
            services.cache.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        );
        services.calendar.set_open(ExchangeSegment::NseFno, true);
        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(services.cache.session("NIFTY").unwrap().source, PriceSource::Live);
        let chain = services.cache.get("NIFTY", nifty_expiry()).unwrap();
        assert_eq!(chain.source, PriceSource::Live);

        cancel.cancel();
        handle.await.unwrap();
    }
}
