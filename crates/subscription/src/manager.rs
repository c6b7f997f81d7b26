//! Subscription Manager - authoritative ledger of streamed tokens
//!
//! Every mutation (subscribe, unsubscribe, eviction, end-of-day sweep,
//! rebalance) happens under one mutex that also owns the connection pool, so
//! per-connection counts change atomically with row assignment. Upstream
//! commands are queued to the connection workers while the lock is held,
//! which keeps them in ledger order.

use crate::error::{FeedError, FeedResult};
use crate::pool::ConnectionPool;
use crate::reconnect::{ConnectionState, ReconnectAction, ReconnectPolicy};
use crate::types::{
    ConnectionStats, FeedCommand, Move, SubscribeOutcome, SubscribeRequest, Subscription,
    SubscriptionMeta, SubscriptionStats, Tier, TierCounts, UnsubscribeReason,
};
use common::{FeedInstrument, SecurityId, SharedClock};
use config::{ConnectionsConfig, SubscriptionsConfig};
use observability::FeedMetrics;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sizing and policy for a [`SubscriptionManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub global_capacity: usize,
    pub connections: usize,
    pub capacity_per_connection: usize,
    pub rebalance_threshold: usize,
    pub reconnect: ReconnectPolicy,
}

impl ManagerConfig {
    pub fn from_config(subscriptions: &SubscriptionsConfig, connections: &ConnectionsConfig) -> Self {
        Self {
            global_capacity: subscriptions.global_capacity,
            connections: connections.count,
            capacity_per_connection: connections.capacity_per_connection,
            rebalance_threshold: connections.rebalance_threshold,
            reconnect: ReconnectPolicy::from(&connections.reconnect),
        }
    }
}

struct Ledger {
    rows: HashMap<SecurityId, Subscription>,
    /// USER_DRIVEN tokens by insertion sequence, oldest first
    user_driven: BTreeMap<u64, SecurityId>,
    next_sequence: u64,
    pool: ConnectionPool,
    workers: HashMap<usize, mpsc::UnboundedSender<FeedCommand>>,
}

impl Ledger {
    fn send(&self, connection_id: usize, command: FeedCommand) {
        let Some(tx) = self.workers.get(&connection_id) else {
            return;
        };
        if tx.send(command).is_err() {
            debug!(connection_id, "Connection worker gone, command dropped");
        }
    }

    fn tier_counts(&self) -> TierCounts {
        let user_driven = self.user_driven.len();
        TierCounts {
            always_on: self.rows.len() - user_driven,
            user_driven,
        }
    }

    /// Remove a row, free its slot and queue the upstream unsubscribe.
    fn remove(&mut self, token: SecurityId) -> Option<Subscription> {
        let row = self.rows.remove(&token)?;
        if row.tier == Tier::UserDriven {
            self.user_driven.remove(&row.sequence);
        }
        self.pool.remove_instrument(token, row.connection_id);
        self.send(
            row.connection_id,
            FeedCommand::Unsubscribe(vec![row.feed_instrument()]),
        );
        Some(row)
    }
}

pub struct SubscriptionManager {
    ledger: Mutex<Ledger>,
    config: ManagerConfig,
    clock: SharedClock,
    metrics: FeedMetrics,
}

impl SubscriptionManager {
    pub fn new(config: ManagerConfig, clock: SharedClock) -> Self {
        let pool = ConnectionPool::new(
            config.connections,
            config.capacity_per_connection,
            config.reconnect,
        );
        Self {
            ledger: Mutex::new(Ledger {
                rows: HashMap::new(),
                user_driven: BTreeMap::new(),
                next_sequence: 0,
                pool,
                workers: HashMap::new(),
            }),
            config,
            clock,
            metrics: FeedMetrics::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.config.global_capacity
    }

    pub fn connection_count(&self) -> usize {
        self.config.connections
    }

    /// Register the command channel of a connection's worker.
    pub fn attach_worker(&self, connection_id: usize) -> FeedResult<mpsc::UnboundedReceiver<FeedCommand>> {
        let mut ledger = self.ledger.lock();
        ledger.pool.slot(connection_id)?;
        let (tx, rx) = mpsc::unbounded_channel();
        ledger.workers.insert(connection_id, tx);
        Ok(rx)
    }

    /// Subscribe a token.
    ///
    /// When the ledger is at global capacity, or every connection is full, a
    /// USER_DRIVEN request evicts the oldest USER_DRIVEN token; ALWAYS_ON
    /// tokens are never evicted. An ALWAYS_ON request for a token already
    /// active as USER_DRIVEN promotes it.
    pub fn subscribe(
        &self,
        token: SecurityId,
        tier: Tier,
        meta: SubscriptionMeta,
    ) -> FeedResult<SubscribeOutcome> {
        let mut ledger = self.ledger.lock();
        self.subscribe_locked(&mut ledger, token, tier, meta, &HashSet::new())
    }

    /// Subscribe a batch; one failure does not abort the rest.
    ///
    /// Tokens the batch has already secured are never evicted to make room
    /// for a later member, so every `Ok` result is still active on return.
    pub fn subscribe_many(
        &self,
        requests: Vec<SubscribeRequest>,
    ) -> Vec<(SecurityId, FeedResult<SubscribeOutcome>)> {
        let mut ledger = self.ledger.lock();
        let mut secured = HashSet::new();
        requests
            .into_iter()
            .map(|r| {
                let result =
                    self.subscribe_locked(&mut ledger, r.security_id, r.tier, r.meta, &secured);
                if result.is_ok() {
                    secured.insert(r.security_id);
                }
                (r.security_id, result)
            })
            .collect()
    }

    fn subscribe_locked(
        &self,
        ledger: &mut Ledger,
        token: SecurityId,
        tier: Tier,
        meta: SubscriptionMeta,
        protected: &HashSet<SecurityId>,
    ) -> FeedResult<SubscribeOutcome> {
        if let Some(row) = ledger.rows.get_mut(&token) {
            if row.tier == Tier::UserDriven && tier == Tier::AlwaysOn {
                row.tier = Tier::AlwaysOn;
                let sequence = row.sequence;
                ledger.user_driven.remove(&sequence);
                info!(%token, "Promoted subscription to always-on");
                self.publish_tier_gauges(ledger);
            }
            return Ok(SubscribeOutcome::AlreadyActive);
        }

        let mut evicted = None;
        let at_capacity = ledger.rows.len() >= self.config.global_capacity;
        if at_capacity || !ledger.pool.has_room() {
            let oldest = match tier {
                Tier::UserDriven => ledger
                    .user_driven
                    .values()
                    .find(|t| !protected.contains(*t))
                    .copied(),
                Tier::AlwaysOn => None,
            };
            let Some(victim) = oldest else {
                self.metrics.record_capacity_rejection(tier.as_str());
                warn!(
                    %token,
                    %tier,
                    active = ledger.rows.len(),
                    pool_full = !at_capacity,
                    "Subscription rejected: capacity exceeded"
                );
                return Err(FeedError::CapacityExceeded {
                    token,
                    active: ledger.rows.len(),
                    capacity: self.config.global_capacity,
                });
            };
            if let Some(row) = ledger.remove(victim) {
                info!(
                    evicted = %victim,
                    sequence = row.sequence,
                    underlying = %row.meta.underlying,
                    incoming = %token,
                    "Evicted oldest user-driven subscription"
                );
                self.metrics.record_eviction();
                evicted = Some(victim);
            }
        }

        let connection_id = match ledger.pool.add_instrument(token) {
            Ok(id) => id,
            Err(FeedError::CapacityExhausted) => {
                self.metrics.record_capacity_rejection(tier.as_str());
                warn!(%token, "Subscription rejected: every connection is full");
                return Err(FeedError::CapacityExceeded {
                    token,
                    active: ledger.rows.len(),
                    capacity: self.config.global_capacity,
                });
            }
            Err(e) => return Err(e),
        };

        let sequence = ledger.next_sequence;
        ledger.next_sequence += 1;
        let row = Subscription {
            security_id: token,
            meta,
            tier,
            subscribed_at: self.clock.now(),
            sequence,
            connection_id,
        };
        let instrument = row.feed_instrument();
        ledger.rows.insert(token, row);
        if tier == Tier::UserDriven {
            ledger.user_driven.insert(sequence, token);
        }
        ledger.send(connection_id, FeedCommand::Subscribe(vec![instrument]));

        debug!(%token, %tier, connection_id, "Subscribed");
        self.publish_tier_gauges(ledger);
        self.metrics
            .set_connection_load(connection_id, ledger.pool.slots()[connection_id].count());

        Ok(SubscribeOutcome::Subscribed {
            connection_id,
            evicted,
        })
    }

    /// Unsubscribe a token. Idempotent; returns whether a row was removed.
    pub fn unsubscribe(&self, token: SecurityId, reason: UnsubscribeReason) -> bool {
        let mut ledger = self.ledger.lock();
        let removed = ledger.remove(token);
        if let Some(row) = &removed {
            debug!(%token, reason = reason.as_str(), "Unsubscribed");
            self.publish_tier_gauges(&ledger);
            self.metrics.set_connection_load(
                row.connection_id,
                ledger.pool.slots()[row.connection_id].count(),
            );
        }
        removed.is_some()
    }

    pub fn unsubscribe_many(&self, tokens: &[SecurityId], reason: UnsubscribeReason) -> usize {
        tokens
            .iter()
            .filter(|t| self.unsubscribe(**t, reason))
            .count()
    }

    /// Remove every USER_DRIVEN row; ALWAYS_ON rows are untouched.
    pub fn unsubscribe_all_user_driven(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let tokens: Vec<SecurityId> = ledger.user_driven.values().copied().collect();

        let mut per_connection: BTreeMap<usize, Vec<FeedInstrument>> = BTreeMap::new();
        for token in &tokens {
            if let Some(row) = ledger.rows.remove(token) {
                ledger.pool.remove_instrument(*token, row.connection_id);
                per_connection
                    .entry(row.connection_id)
                    .or_default()
                    .push(row.feed_instrument());
            }
        }
        ledger.user_driven.clear();

        for (connection_id, instruments) in per_connection {
            ledger.send(connection_id, FeedCommand::Unsubscribe(instruments));
        }

        info!(
            removed = tokens.len(),
            remaining = ledger.rows.len(),
            reason = UnsubscribeReason::EndOfDay.as_str(),
            "Swept user-driven subscriptions"
        );
        self.publish_tier_gauges(&ledger);
        self.publish_connection_gauges(&ledger);
        tokens.len()
    }

    pub fn is_active(&self, token: SecurityId) -> bool {
        self.ledger.lock().rows.contains_key(&token)
    }

    pub fn get(&self, token: SecurityId) -> Option<Subscription> {
        self.ledger.lock().rows.get(&token).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.ledger.lock().rows.len()
    }

    pub fn stats(&self) -> SubscriptionStats {
        let ledger = self.ledger.lock();
        SubscriptionStats {
            total: ledger.rows.len(),
            capacity: self.config.global_capacity,
            per_tier: ledger.tier_counts(),
            per_connection: ledger
                .pool
                .slots()
                .iter()
                .map(|s| ConnectionStats {
                    id: s.id,
                    count: s.count(),
                    capacity: s.capacity,
                    utilization: s.utilization(),
                    state: s.state(),
                    consecutive_failures: s.consecutive_failures(),
                })
                .collect(),
        }
    }

    // ==================== Connection lifecycle ====================

    pub fn next_action(&self, connection_id: usize) -> FeedResult<ReconnectAction> {
        let now = self.clock.now();
        self.ledger.lock().pool.next_action(connection_id, now)
    }

    /// Mark an attempt as started. False while backing off or cooling down.
    pub fn connection_attempt(&self, connection_id: usize) -> FeedResult<bool> {
        let now = self.clock.now();
        let started = self.ledger.lock().pool.begin_attempt(connection_id, now)?;
        if started {
            self.metrics.record_reconnect_attempt(connection_id);
        }
        Ok(started)
    }

    /// Mark a connection live; returns the instruments to (re)subscribe on it.
    pub fn connection_established(&self, connection_id: usize) -> FeedResult<Vec<FeedInstrument>> {
        let mut ledger = self.ledger.lock();
        ledger.pool.on_connected(connection_id)?;
        let instruments = ledger
            .pool
            .slot(connection_id)?
            .tokens()
            .filter_map(|t| ledger.rows.get(&t).map(Subscription::feed_instrument))
            .collect::<Vec<_>>();
        info!(connection_id, instruments = instruments.len(), "Connection established");
        Ok(instruments)
    }

    /// Record a failed attempt. A connection entering cooldown hands its
    /// instruments to connected slots with room.
    pub fn connection_failed(&self, connection_id: usize) -> FeedResult<ConnectionState> {
        let now = self.clock.now();
        let mut ledger = self.ledger.lock();
        let state = ledger.pool.on_failed(connection_id, now)?;
        self.metrics.record_reconnect_failure(connection_id);
        if state == ConnectionState::Cooldown {
            self.metrics.record_cooldown(connection_id);
            let moves = ledger.pool.drain(connection_id);
            self.apply_moves(&mut ledger, &moves);
            warn!(
                connection_id,
                moved = moves.len(),
                "Connection entered cooldown after repeated failures"
            );
        }
        Ok(state)
    }

    pub fn connection_lost(&self, connection_id: usize) -> FeedResult<()> {
        let now = self.clock.now();
        self.ledger.lock().pool.on_lost(connection_id, now)?;
        warn!(connection_id, "Connection lost");
        Ok(())
    }

    /// Even out load across connected slots beyond the configured threshold,
    /// moving the upstream subscriptions along with the ledger rows.
    pub fn rebalance(&self) -> Vec<Move> {
        let mut ledger = self.ledger.lock();
        let moves = ledger.pool.rebalance(self.config.rebalance_threshold);
        if !moves.is_empty() {
            self.apply_moves(&mut ledger, &moves);
            info!(moved = moves.len(), "Rebalanced connections");
        }
        moves
    }

    /// Point moved rows at their new connection and move the upstream
    /// subscriptions with them.
    fn apply_moves(&self, ledger: &mut Ledger, moves: &[Move]) {
        if moves.is_empty() {
            return;
        }
        let mut unsubscribes: BTreeMap<usize, Vec<FeedInstrument>> = BTreeMap::new();
        let mut subscribes: BTreeMap<usize, Vec<FeedInstrument>> = BTreeMap::new();
        for m in moves {
            if let Some(row) = ledger.rows.get_mut(&m.security_id) {
                row.connection_id = m.to;
                let instrument = row.feed_instrument();
                unsubscribes.entry(m.from).or_default().push(instrument);
                subscribes.entry(m.to).or_default().push(instrument);
            }
        }
        for (id, instruments) in unsubscribes {
            ledger.send(id, FeedCommand::Unsubscribe(instruments));
        }
        for (id, instruments) in subscribes {
            ledger.send(id, FeedCommand::Subscribe(instruments));
        }
        self.publish_connection_gauges(ledger);
    }

    fn publish_tier_gauges(&self, ledger: &Ledger) {
        let counts = ledger.tier_counts();
        self.metrics
            .set_active_subscriptions(Tier::AlwaysOn.as_str(), counts.always_on);
        self.metrics
            .set_active_subscriptions(Tier::UserDriven.as_str(), counts.user_driven);
    }

    fn publish_connection_gauges(&self, ledger: &Ledger) {
        for slot in ledger.pool.slots() {
            self.metrics.set_connection_load(slot.id, slot.count());
        }
    }
}
