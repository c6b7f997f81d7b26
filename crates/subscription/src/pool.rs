//! Connection pool - fixed set of capacity-bounded upstream connections.
//!
//! A slot's load is the size of its token set, so the count can never drift
//! from the instruments actually assigned to it.

use crate::error::{FeedError, FeedResult};
use crate::reconnect::{ConnectionState, ReconnectAction, ReconnectMachine, ReconnectPolicy};
use crate::types::Move;
use chrono::{DateTime, Utc};
use common::SecurityId;
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct ConnectionSlot {
    pub id: usize,
    pub capacity: usize,
    tokens: BTreeSet<SecurityId>,
    reconnect: ReconnectMachine,
}

impl ConnectionSlot {
    fn new(id: usize, capacity: usize, policy: ReconnectPolicy) -> Self {
        Self {
            id,
            capacity,
            tokens: BTreeSet::new(),
            reconnect: ReconnectMachine::new(policy),
        }
    }

    pub fn count(&self) -> usize {
        self.tokens.len()
    }

    pub fn has_room(&self) -> bool {
        self.tokens.len() < self.capacity
    }

    pub fn tokens(&self) -> impl Iterator<Item = SecurityId> + '_ {
        self.tokens.iter().copied()
    }

    pub fn state(&self) -> ConnectionState {
        self.reconnect.state()
    }

    pub fn is_connected(&self) -> bool {
        self.reconnect.is_connected()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.reconnect.consecutive_failures()
    }

    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.count() as f64 / self.capacity as f64
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionPool {
    slots: Vec<ConnectionSlot>,
}

impl ConnectionPool {
    pub fn new(count: usize, capacity_per_connection: usize, policy: ReconnectPolicy) -> Self {
        Self {
            slots: (0..count)
                .map(|id| ConnectionSlot::new(id, capacity_per_connection, policy))
                .collect(),
        }
    }

    pub fn slots(&self) -> &[ConnectionSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn total_capacity(&self) -> usize {
        self.slots.iter().map(|s| s.capacity).sum()
    }

    /// Some slot can take another token.
    pub fn has_room(&self) -> bool {
        self.slots.iter().any(ConnectionSlot::has_room)
    }

    pub fn slot(&self, id: usize) -> FeedResult<&ConnectionSlot> {
        self.slots.get(id).ok_or(FeedError::UnknownConnection(id))
    }

    fn slot_mut(&mut self, id: usize) -> FeedResult<&mut ConnectionSlot> {
        self.slots.get_mut(id).ok_or(FeedError::UnknownConnection(id))
    }

    /// Least-loaded slot with room among those matching `eligible`; ties go
    /// to the lowest id.
    fn least_loaded(&self, eligible: impl Fn(&ConnectionSlot) -> bool) -> Option<usize> {
        self.slots
            .iter()
            .filter(|s| s.has_room() && eligible(s))
            .min_by_key(|s| (s.count(), s.id))
            .map(|s| s.id)
    }

    /// Assign a token to a connection.
    ///
    /// Prefers connected slots. When none has room, the token is queued on a
    /// slot that is not cooling down (sent once it connects), and failing
    /// that on any slot with room.
    pub fn add_instrument(&mut self, token: SecurityId) -> FeedResult<usize> {
        let id = self
            .least_loaded(|s| s.is_connected())
            .or_else(|| self.least_loaded(|s| s.state() != ConnectionState::Cooldown))
            .or_else(|| self.least_loaded(|_| true))
            .ok_or(FeedError::CapacityExhausted)?;

        self.slots[id].tokens.insert(token);
        Ok(id)
    }

    /// Release a token from its connection. Returns false if it was not there.
    pub fn remove_instrument(&mut self, token: SecurityId, connection_id: usize) -> bool {
        self.slots
            .get_mut(connection_id)
            .map(|s| s.tokens.remove(&token))
            .unwrap_or(false)
    }

    /// Move tokens from the busiest to the idlest connected slot while their
    /// loads differ by more than `threshold`. Does not force equality.
    pub fn rebalance(&mut self, threshold: usize) -> Vec<Move> {
        let mut moves = Vec::new();
        loop {
            let connected: Vec<&ConnectionSlot> =
                self.slots.iter().filter(|s| s.is_connected()).collect();
            let (Some(busiest), Some(idlest)) = (
                connected.iter().max_by_key(|s| (s.count(), std::cmp::Reverse(s.id))),
                connected
                    .iter()
                    .filter(|s| s.has_room())
                    .min_by_key(|s| (s.count(), s.id)),
            ) else {
                break;
            };
            if busiest.id == idlest.id || busiest.count() <= idlest.count() + threshold {
                break;
            }
            let (from, to) = (busiest.id, idlest.id);
            let Some(token) = self.slots[from].tokens.iter().next_back().copied() else {
                break;
            };

            self.slots[from].tokens.remove(&token);
            self.slots[to].tokens.insert(token);
            moves.push(Move {
                security_id: token,
                from,
                to,
            });
        }
        moves
    }

    /// Move every token off slot `from` onto connected slots with room,
    /// least-loaded first. Tokens that fit nowhere stay put.
    pub fn drain(&mut self, from: usize) -> Vec<Move> {
        let mut moves = Vec::new();
        let Some(source) = self.slots.get(from) else {
            return moves;
        };
        let tokens: Vec<SecurityId> = source.tokens().collect();
        for token in tokens {
            let Some(to) = self.least_loaded(|s| s.id != from && s.is_connected()) else {
                break;
            };
            self.slots[from].tokens.remove(&token);
            self.slots[to].tokens.insert(token);
            moves.push(Move {
                security_id: token,
                from,
                to,
            });
        }
        moves
    }

    // ==================== Reconnect passthroughs ====================

    pub fn next_action(&mut self, id: usize, now: DateTime<Utc>) -> FeedResult<ReconnectAction> {
        Ok(self.slot_mut(id)?.reconnect.next_action(now))
    }

    pub fn begin_attempt(&mut self, id: usize, now: DateTime<Utc>) -> FeedResult<bool> {
        Ok(self.slot_mut(id)?.reconnect.begin_attempt(now))
    }

    pub fn on_connected(&mut self, id: usize) -> FeedResult<()> {
        self.slot_mut(id)?.reconnect.on_success();
        Ok(())
    }

    pub fn on_failed(&mut self, id: usize, now: DateTime<Utc>) -> FeedResult<ConnectionState> {
        Ok(self.slot_mut(id)?.reconnect.on_failure(now))
    }

    pub fn on_lost(&mut self, id: usize, now: DateTime<Utc>) -> FeedResult<()> {
        self.slot_mut(id)?.reconnect.on_lost(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn connected_pool(count: usize, capacity: usize) -> ConnectionPool {
        let mut pool = ConnectionPool::new(count, capacity, ReconnectPolicy::default());
        let now = Utc::now();
        for id in 0..count {
            assert!(pool.begin_attempt(id, now).unwrap());
            pool.on_connected(id).unwrap();
        }
        pool
    }

    #[test]
    fn test_least_loaded_with_lowest_id_tiebreak() {
        let mut pool = connected_pool(3, 10);
        let ids: Vec<usize> = (0..6)
            .map(|i| pool.add_instrument(SecurityId(i)).unwrap())
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 0, 1, 2]);

        assert!(pool.remove_instrument(SecurityId(1), 1));
        assert_eq!(pool.add_instrument(SecurityId(100)).unwrap(), 1);
    }

    #[test]
    fn test_exhausted_when_all_full() {
        let mut pool = connected_pool(2, 1);
        pool.add_instrument(SecurityId(1)).unwrap();
        pool.add_instrument(SecurityId(2)).unwrap();
        assert_matches!(
            pool.add_instrument(SecurityId(3)),
            Err(FeedError::CapacityExhausted)
        );
    }

    #[test]
    fn test_queues_on_disconnected_slots() {
        let mut pool = ConnectionPool::new(2, 5, ReconnectPolicy::default());
        assert_eq!(pool.add_instrument(SecurityId(1)).unwrap(), 0);
        assert_eq!(pool.add_instrument(SecurityId(2)).unwrap(), 1);
    }

    #[test]
    fn test_prefers_connected_slot() {
        let mut pool = ConnectionPool::new(2, 5, ReconnectPolicy::default());
        let now = Utc::now();
        pool.begin_attempt(1, now).unwrap();
        pool.on_connected(1).unwrap();
        for i in 0..3 {
            assert_eq!(pool.add_instrument(SecurityId(i)).unwrap(), 1);
        }
    }

    #[test]
    fn test_rebalance_moves_only_past_threshold() {
        let mut pool = ConnectionPool::new(2, 100, ReconnectPolicy::default());
        let now = Utc::now();
        pool.begin_attempt(0, now).unwrap();
        pool.on_connected(0).unwrap();
        for i in 0..20 {
            pool.add_instrument(SecurityId(i)).unwrap();
        }
        pool.begin_attempt(1, now).unwrap();
        pool.on_connected(1).unwrap();

        let moves = pool.rebalance(4);
        assert!(moves.iter().all(|m| m.from == 0 && m.to == 1));
        let (a, b) = (pool.slots()[0].count(), pool.slots()[1].count());
        assert_eq!(a + b, 20);
        assert!(a.abs_diff(b) <= 4);
        assert!(a.abs_diff(b) >= 3, "should not force equality");

        assert!(pool.rebalance(4).is_empty());
    }

    #[test]
    fn test_drain_moves_to_connected_slots_with_room() {
        let mut pool = ConnectionPool::new(3, 3, ReconnectPolicy::default());
        for i in 0..4 {
            pool.add_instrument(SecurityId(i)).unwrap();
        }
        // 0 holds {0, 3}; 1 holds {1}; 2 holds {2}
        let now = Utc::now();
        for id in [1, 2] {
            pool.begin_attempt(id, now).unwrap();
            pool.on_connected(id).unwrap();
        }

        let moves = pool.drain(0);
        assert_eq!(moves.len(), 2);
        assert!(moves.iter().all(|m| m.from == 0 && m.to != 0));
        assert_eq!(pool.slots()[0].count(), 0);
        assert_eq!(pool.slots()[1].count() + pool.slots()[2].count(), 4);
    }

    #[test]
    fn test_drain_keeps_tokens_that_fit_nowhere() {
        let mut pool = ConnectionPool::new(2, 1, ReconnectPolicy::default());
        pool.add_instrument(SecurityId(1)).unwrap();
        pool.add_instrument(SecurityId(2)).unwrap();
        let now = Utc::now();
        pool.begin_attempt(1, now).unwrap();
        pool.on_connected(1).unwrap();

        assert!(pool.drain(0).is_empty());
        assert_eq!(pool.slots()[0].count(), 1);
        assert!(!pool.has_room());
    }
}
