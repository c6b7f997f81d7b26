//! Subscription ledger types.

use chrono::{DateTime, NaiveDate, Utc};
use common::{ExchangeSegment, FeedInstrument, OptionRight, SecurityId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::reconnect::ConnectionState;

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tier {
    /// Baseline kept live all session; never evicted, never swept
    AlwaysOn,
    /// Per-user opt-in; evictable, cleared at end of day
    UserDriven,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::AlwaysOn => "always_on",
            Tier::UserDriven => "user_driven",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a token is, recorded alongside its subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionMeta {
    pub segment: ExchangeSegment,
    pub underlying: String,
    pub expiry: Option<NaiveDate>,
    pub strike: Option<f64>,
    pub option_right: Option<OptionRight>,
}

impl SubscriptionMeta {
    /// Meta for a non-option instrument (spot, future).
    pub fn instrument(segment: ExchangeSegment, underlying: impl Into<String>) -> Self {
        Self {
            segment,
            underlying: underlying.into(),
            expiry: None,
            strike: None,
            option_right: None,
        }
    }

    pub fn option(
        segment: ExchangeSegment,
        underlying: impl Into<String>,
        expiry: NaiveDate,
        strike: f64,
        right: OptionRight,
    ) -> Self {
        Self {
            segment,
            underlying: underlying.into(),
            expiry: Some(expiry),
            strike: Some(strike),
            option_right: Some(right),
        }
    }
}

/// One active ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub security_id: SecurityId,
    pub meta: SubscriptionMeta,
    pub tier: Tier,
    pub subscribed_at: DateTime<Utc>,
    /// Insertion sequence; eviction order for USER_DRIVEN rows
    pub sequence: u64,
    pub connection_id: usize,
}

impl Subscription {
    pub fn feed_instrument(&self) -> FeedInstrument {
        FeedInstrument::new(self.meta.segment, self.security_id)
    }
}

/// A subscribe call in a batch.
#[derive(Debug, Clone)]
pub struct SubscribeRequest {
    pub security_id: SecurityId,
    pub tier: Tier,
    pub meta: SubscriptionMeta,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Subscribed {
        connection_id: usize,
        evicted: Option<SecurityId>,
    },
    AlreadyActive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsubscribeReason {
    Explicit,
    Evicted,
    EndOfDay,
}

impl UnsubscribeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnsubscribeReason::Explicit => "explicit",
            UnsubscribeReason::Evicted => "evicted",
            UnsubscribeReason::EndOfDay => "end_of_day",
        }
    }
}

/// Instruction for a connection worker.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedCommand {
    Subscribe(Vec<FeedInstrument>),
    Unsubscribe(Vec<FeedInstrument>),
}

/// A token moved by a rebalance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Move {
    pub security_id: SecurityId,
    pub from: usize,
    pub to: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierCounts {
    pub always_on: usize,
    pub user_driven: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub id: usize,
    pub count: usize,
    pub capacity: usize,
    pub utilization: f64,
    pub state: ConnectionState,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionStats {
    pub total: usize,
    pub capacity: usize,
    pub per_tier: TierCounts,
    pub per_connection: Vec<ConnectionStats>,
}
