//! Watchlist Manager - per-user (symbol, expiry) lists.
//!
//! Adding an option-bearing symbol fans out into a USER_DRIVEN subscription
//! for every leg of its ATM ladder; removing fans back in. The legs are not
//! stored: removal regenerates the ladder from the entry's anchor price,
//! which yields the same legs for as long as the instrument master is
//! unchanged.

use crate::error::{WatchlistError, WatchlistResult};
use crate::store::WatchlistStore;
use crate::types::{AddOutcome, LegFailure, RemoveOutcome, WatchlistEntry, WatchlistKey};
use chrono::NaiveDate;
use common::{InstrumentType, SecurityId, SharedClock};
use instrument::AtmEngine;
use std::collections::HashSet;
use std::sync::Arc;
use subscription::{
    SubscribeOutcome, SubscribeRequest, SubscriptionManager, SubscriptionMeta, Tier,
    UnsubscribeReason,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One token a watchlist entry streams, with the meta its subscription
/// is recorded under.
struct Leg {
    security_id: SecurityId,
    meta: SubscriptionMeta,
}

pub struct WatchlistManager {
    atm: Arc<AtmEngine>,
    subscriptions: Arc<SubscriptionManager>,
    store: Arc<dyn WatchlistStore>,
    clock: SharedClock,
    /// Serialises add/remove so duplicate checks and leg accounting see a
    /// consistent store
    op_lock: Mutex<()>,
}

impl WatchlistManager {
    pub fn new(
        atm: Arc<AtmEngine>,
        subscriptions: Arc<SubscriptionManager>,
        store: Arc<dyn WatchlistStore>,
        clock: SharedClock,
    ) -> Self {
        Self {
            atm,
            subscriptions,
            store,
            clock,
            op_lock: Mutex::new(()),
        }
    }

    /// Add `symbol`/`expiry` to `user`'s watchlist and subscribe its legs.
    ///
    /// Option-bearing types subscribe every leg of the ATM ladder centred on
    /// `underlying_ltp` (or the engine's last price for the symbol). Other
    /// types subscribe the instrument's own token. The entry is stored only
    /// after every subscribe attempt finished, and only if at least one leg
    /// is streaming.
    #[tracing::instrument(skip(self), fields(user = %user, symbol = %symbol))]
    pub async fn add_to_watchlist(
        &self,
        user: &str,
        symbol: &str,
        expiry: NaiveDate,
        instrument_type: InstrumentType,
        underlying_ltp: Option<f64>,
    ) -> WatchlistResult<AddOutcome> {
        if user.trim().is_empty() || symbol.trim().is_empty() {
            return Err(WatchlistError::InvalidRequest(
                "user and symbol are required".to_string(),
            ));
        }
        let key = WatchlistKey::new(user, symbol, expiry);
        let _guard = self.op_lock.lock().await;

        if self.store.get(&key).await?.is_some() {
            return Err(WatchlistError::Duplicate {
                user: key.user,
                symbol: key.symbol,
                expiry,
            });
        }

        let anchor_ltp = if instrument_type.is_option_bearing() {
            let ltp = underlying_ltp
                .filter(|p| p.is_finite() && *p > 0.0)
                .or_else(|| self.atm.cached(&key.symbol).map(|l| l.ltp))
                .ok_or_else(|| WatchlistError::NoPrice(key.symbol.clone()))?;
            Some(ltp)
        } else {
            None
        };
        let legs = self.resolve_legs(&key, instrument_type, anchor_ltp)?;

        let legs_requested = legs.len();
        let requests = legs
            .into_iter()
            .map(|leg| SubscribeRequest {
                security_id: leg.security_id,
                tier: Tier::UserDriven,
                meta: leg.meta,
            })
            .collect();
        // One batch: a leg never evicts another leg of the same entry
        let mut legs_subscribed = 0;
        let mut failures = Vec::new();
        for (security_id, result) in self.subscriptions.subscribe_many(requests) {
            match result {
                Ok(SubscribeOutcome::Subscribed { evicted, .. }) => {
                    legs_subscribed += 1;
                    if let Some(evicted) = evicted {
                        debug!(%evicted, incoming = %security_id, "Watchlist add evicted a subscription");
                    }
                }
                Ok(SubscribeOutcome::AlreadyActive) => legs_subscribed += 1,
                Err(e) => failures.push(LegFailure {
                    security_id,
                    reason: e.to_string(),
                }),
            }
        }

        let accepted = legs_subscribed > 0;
        if accepted {
            let sequence = self.store.max_sequence().await?.map_or(0, |s| s + 1);
            self.store
                .insert(WatchlistEntry {
                    user: key.user.clone(),
                    symbol: key.symbol.clone(),
                    expiry,
                    instrument_type,
                    sequence,
                    anchor_ltp,
                    legs_requested,
                    legs_subscribed,
                    added_at: self.clock.now(),
                })
                .await?;
        }

        let outcome = AddOutcome {
            accepted,
            legs_subscribed,
            legs_requested,
            failures,
        };
        if outcome.is_complete() {
            info!(%expiry, legs = legs_requested, "Watchlist entry added");
        } else {
            warn!(
                %expiry,
                accepted,
                legs_subscribed,
                legs_requested,
                "Watchlist entry added with missing legs"
            );
        }
        Ok(outcome)
    }

    /// Remove an entry and unsubscribe the legs no other entry still needs.
    /// A missing entry is a no-op.
    #[tracing::instrument(skip(self), fields(user = %user, symbol = %symbol))]
    pub async fn remove_from_watchlist(
        &self,
        user: &str,
        symbol: &str,
        expiry: NaiveDate,
    ) -> WatchlistResult<RemoveOutcome> {
        let key = WatchlistKey::new(user, symbol, expiry);
        let _guard = self.op_lock.lock().await;
        self.remove_locked(&key).await
    }

    async fn remove_locked(&self, key: &WatchlistKey) -> WatchlistResult<RemoveOutcome> {
        let Some(entry) = self.store.remove(key).await? else {
            debug!(user = %key.user, symbol = %key.symbol, "Watchlist entry not present");
            return Ok(RemoveOutcome::default());
        };

        let still_needed = self.legs_of_entries(&self.store.list_all().await?);
        let legs = self.entry_legs(&entry);
        let legs_unsubscribed = legs
            .into_iter()
            .filter(|id| !still_needed.contains(id))
            .filter(|id| self.release(*id))
            .count();

        info!(
            user = %entry.user,
            symbol = %entry.symbol,
            expiry = %entry.expiry,
            legs_unsubscribed,
            "Watchlist entry removed"
        );
        Ok(RemoveOutcome {
            removed: true,
            legs_unsubscribed,
        })
    }

    /// Remove every entry of one user; returns how many were removed.
    pub async fn clear_for_user(&self, user: &str) -> WatchlistResult<usize> {
        let _guard = self.op_lock.lock().await;
        let mut removed = 0;
        for entry in self.store.list_user(user).await? {
            if self.remove_locked(&entry.key()).await?.removed {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every entry of every user, releasing their legs.
    pub async fn clear_all(&self) -> WatchlistResult<usize> {
        let _guard = self.op_lock.lock().await;
        let entries = self.store.list_all().await?;
        let released = self
            .legs_of_entries(&entries)
            .into_iter()
            .filter(|id| self.release(*id))
            .count();
        let cleared = self.store.clear().await?;
        info!(cleared, legs_unsubscribed = released, "All watchlists cleared");
        Ok(cleared)
    }

    pub async fn entries(&self, user: &str) -> WatchlistResult<Vec<WatchlistEntry>> {
        self.store.list_user(user).await
    }

    pub async fn all_entries(&self) -> WatchlistResult<Vec<WatchlistEntry>> {
        self.store.list_all().await
    }

    /// Unsubscribe a token if it is streaming for users. ALWAYS_ON rows
    /// belong to the baseline and are left alone.
    fn release(&self, token: SecurityId) -> bool {
        match self.subscriptions.get(token) {
            Some(row) if row.tier == Tier::UserDriven => {
                self.subscriptions.unsubscribe(token, UnsubscribeReason::Explicit)
            }
            _ => false,
        }
    }

    fn legs_of_entries(&self, entries: &[WatchlistEntry]) -> HashSet<SecurityId> {
        entries.iter().flat_map(|e| self.entry_legs(e)).collect()
    }

    /// Regenerate the legs of a stored entry. Entries whose chain can no
    /// longer be built contribute nothing.
    fn entry_legs(&self, entry: &WatchlistEntry) -> Vec<SecurityId> {
        match self.resolve_legs(&entry.key(), entry.instrument_type, entry.anchor_ltp) {
            Ok(legs) => legs.into_iter().map(|l| l.security_id).collect(),
            Err(e) => {
                warn!(user = %entry.user, symbol = %entry.symbol, error = %e, "Cannot regenerate watchlist legs");
                Vec::new()
            }
        }
    }

    fn resolve_legs(
        &self,
        key: &WatchlistKey,
        instrument_type: InstrumentType,
        anchor_ltp: Option<f64>,
    ) -> WatchlistResult<Vec<Leg>> {
        let registry = self.atm.registry();

        if let Some(ltp) = anchor_ltp {
            let ladder = self.atm.generate_chain(&key.symbol, key.expiry, ltp)?;
            return Ok(ladder
                .legs()
                .filter_map(|(security_id, strike, right)| {
                    let record = registry.by_security_id(security_id)?;
                    Some(Leg {
                        security_id,
                        meta: SubscriptionMeta::option(
                            record.segment,
                            ladder.underlying.clone(),
                            key.expiry,
                            strike,
                            right,
                        ),
                    })
                })
                .collect());
        }

        let record = registry
            .lookup_expiry(&key.symbol, key.expiry)
            .into_iter()
            .find(|r| r.instrument_type == instrument_type && !r.is_option())
            .ok_or_else(|| WatchlistError::UnknownInstrument {
                symbol: key.symbol.clone(),
                expiry: key.expiry,
                instrument_type: instrument_type.to_string(),
            })?;
        let mut meta = SubscriptionMeta::instrument(record.segment, record.underlying.clone());
        meta.expiry = record.expiry;
        Ok(vec![Leg {
            security_id: record.security_id,
            meta,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryWatchlistStore;
    use assert_matches::assert_matches;
    use chrono::{TimeZone, Utc};
    use common::{ExchangeSegment, ManualClock};
    use instrument::testing::{
        nifty_expiry, sample_registry, BANKNIFTY_SPOT_ID, NIFTY_FUTURE_ID,
    };
    use instrument::AtmEngineConfig;
    use subscription::{ManagerConfig, ReconnectPolicy};

    fn clock() -> SharedClock {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 20, 4, 0, 0).unwrap()))
    }

    fn subscriptions(capacity: usize) -> Arc<SubscriptionManager> {
        Arc::new(SubscriptionManager::new(
            ManagerConfig {
                global_capacity: capacity,
                connections: 2,
                capacity_per_connection: capacity,
                rebalance_threshold: 50,
                reconnect: ReconnectPolicy::default(),
            },
            clock(),
        ))
    }

    fn manager(subs: &Arc<SubscriptionManager>) -> WatchlistManager {
        let atm = Arc::new(AtmEngine::new(
            sample_registry(),
            AtmEngineConfig {
                index_strikes_each_side: 2,
                stock_strikes_each_side: 1,
                min_strike_step: 0.05,
                ladder_ttl: chrono::Duration::zero(),
            },
            clock(),
        ));
        WatchlistManager::new(
            atm,
            subs.clone(),
            Arc::new(InMemoryWatchlistStore::new()),
            clock(),
        )
    }

    #[tokio::test]
    async fn test_add_subscribes_every_leg_user_driven() {
        let subs = subscriptions(100);
        let wl = manager(&subs);

        let outcome = wl
            .add_to_watchlist("alice", "nifty", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        // 2 strikes each side of 22200, both legs
        assert_eq!(outcome.legs_requested, 10);
        assert_eq!(outcome.legs_subscribed, 10);
        assert!(outcome.accepted);
        assert!(!outcome.is_partial());
        assert_eq!(subs.stats().per_tier.user_driven, 10);

        let entries = wl.entries("alice").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].symbol, "NIFTY");
        assert_eq!(entries[0].anchor_ltp, Some(22_150.0));

        assert_matches!(
            wl.add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_400.0))
                .await,
            Err(WatchlistError::Duplicate { .. })
        );
    }

    #[tokio::test]
    async fn test_partial_add_is_reported() {
        let subs = subscriptions(4);
        for id in 0..4 {
            subs.subscribe(
                SecurityId(90_000 + id),
                Tier::AlwaysOn,
                SubscriptionMeta::instrument(ExchangeSegment::NseEquity, "X"),
            )
            .unwrap();
        }
        let wl = manager(&subs);

        let outcome = wl
            .add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        assert_eq!(outcome.legs_subscribed, 0);
        assert_eq!(outcome.failures.len(), 10);
        assert!(!outcome.accepted);
        assert!(wl.entries("alice").await.unwrap().is_empty());

        subs.unsubscribe(SecurityId(90_000), UnsubscribeReason::Explicit);
        subs.unsubscribe(SecurityId(90_001), UnsubscribeReason::Explicit);
        let outcome = wl
            .add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        // Two rows free: the first two legs stream, the rest would have to
        // evict legs of this same entry
        assert_eq!(outcome.legs_requested, 10);
        assert_eq!(outcome.legs_subscribed, 2);
        assert_eq!(outcome.failures.len(), 8);
        assert!(outcome.accepted);
        assert!(outcome.is_partial());
        assert!(!outcome.is_complete());
        assert_eq!(subs.stats().per_tier.user_driven, 2);
        assert_eq!(wl.entries("alice").await.unwrap()[0].legs_subscribed, 2);
    }

    #[tokio::test]
    async fn test_add_may_evict_other_entries_but_reports_what_streams() {
        let subs = subscriptions(12);
        let wl = manager(&subs);
        wl.add_to_watchlist("bob", "RELIANCE", instrument::testing::reliance_expiry(), InstrumentType::Equity, Some(2_905.0))
            .await
            .unwrap();
        assert_eq!(subs.active_count(), 6);

        let outcome = wl
            .add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        // Four of bob's older legs make way; all ten NIFTY legs stream
        assert!(outcome.is_complete());
        assert_eq!(subs.active_count(), 12);
        let streaming = wl
            .resolve_legs(
                &WatchlistKey::new("alice", "NIFTY", nifty_expiry()),
                InstrumentType::Index,
                Some(22_150.0),
            )
            .unwrap();
        assert!(streaming.iter().all(|leg| subs.is_active(leg.security_id)));
    }

    #[tokio::test]
    async fn test_remove_keeps_legs_shared_with_other_entries() {
        let subs = subscriptions(100);
        let wl = manager(&subs);
        wl.add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        // One strike higher: shares 8 of 10 legs
        wl.add_to_watchlist("bob", "NIFTY", nifty_expiry(), InstrumentType::Optidx, Some(22_250.0))
            .await
            .unwrap();
        assert_eq!(subs.active_count(), 12);

        let removed = wl
            .remove_from_watchlist("alice", "NIFTY", nifty_expiry())
            .await
            .unwrap();
        assert_eq!(
            removed,
            RemoveOutcome {
                removed: true,
                legs_unsubscribed: 2,
            }
        );
        assert_eq!(subs.active_count(), 10);

        let again = wl
            .remove_from_watchlist("alice", "NIFTY", nifty_expiry())
            .await
            .unwrap();
        assert!(!again.removed);
        assert_eq!(subs.active_count(), 10);
    }

    #[tokio::test]
    async fn test_remove_leaves_always_on_legs() {
        let subs = subscriptions(100);
        let wl = manager(&subs);
        wl.add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        let atm_call = wl
            .atm
            .registry()
            .option_token("NIFTY", nifty_expiry(), 22_200.0, common::OptionRight::Call)
            .unwrap();
        // Bootstrap promotes the ATM call to the baseline
        subs.subscribe(
            atm_call,
            Tier::AlwaysOn,
            SubscriptionMeta::instrument(ExchangeSegment::NseFno, "NIFTY"),
        )
        .unwrap();

        let removed = wl
            .remove_from_watchlist("alice", "NIFTY", nifty_expiry())
            .await
            .unwrap();
        assert_eq!(removed.legs_unsubscribed, 9);
        assert!(subs.is_active(atm_call));
    }

    #[tokio::test]
    async fn test_non_option_type_subscribes_own_token() {
        let subs = subscriptions(100);
        let wl = manager(&subs);
        let outcome = wl
            .add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Futidx, None)
            .await
            .unwrap();
        assert_eq!(outcome.legs_requested, 1);
        assert!(subs.is_active(NIFTY_FUTURE_ID));
        assert!(!subs.is_active(BANKNIFTY_SPOT_ID));

        assert_matches!(
            wl.add_to_watchlist("alice", "BANKNIFTY", nifty_expiry(), InstrumentType::Index, None)
                .await,
            Err(WatchlistError::NoPrice(_))
        );
    }

    #[tokio::test]
    async fn test_clear_for_user_and_clear_all() {
        let subs = subscriptions(100);
        let wl = manager(&subs);
        wl.add_to_watchlist("alice", "NIFTY", nifty_expiry(), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        wl.add_to_watchlist("alice", "NIFTY", nifty_expiry() + chrono::Duration::days(28), InstrumentType::Index, Some(22_150.0))
            .await
            .unwrap();
        wl.add_to_watchlist("bob", "RELIANCE", instrument::testing::reliance_expiry(), InstrumentType::Equity, Some(2_905.0))
            .await
            .unwrap();

        assert_eq!(wl.clear_for_user("alice").await.unwrap(), 2);
        assert!(wl.entries("alice").await.unwrap().is_empty());
        // RELIANCE: one strike each side of 2900
        assert_eq!(subs.active_count(), 6);

        assert_eq!(wl.clear_all().await.unwrap(), 1);
        assert_eq!(subs.active_count(), 0);
    }
}
