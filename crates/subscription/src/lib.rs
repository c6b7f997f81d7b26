//! # Subscription Crate
//!
//! Decides which instruments are streamed and over which connection.
//!
//! ## Key Components
//!
//! - **Manager**: [`SubscriptionManager`] is the authoritative ledger of
//!   streamed tokens, tagged [`Tier::AlwaysOn`] or [`Tier::UserDriven`],
//!   with a hard global capacity and oldest-first eviction of user-driven
//!   tokens.
//! - **Pool**: [`ConnectionPool`] holds the fixed set of capacity-bounded
//!   upstream connections and assigns tokens to the least-loaded one.
//! - **Reconnect**: [`ReconnectMachine`] is the per-connection backoff and
//!   cooldown state machine, driven by an injected clock.
//! - **Worker**: [`ConnectionWorker`] runs one upstream connection, and
//!   forwards its ticks to a [`TickSink`].

pub mod error;
pub mod manager;
pub mod pool;
pub mod reconnect;
pub mod types;
pub mod worker;

pub use error::{FeedError, FeedResult};
pub use manager::{ManagerConfig, SubscriptionManager};
pub use pool::{ConnectionPool, ConnectionSlot};
pub use reconnect::{ConnectionState, ReconnectAction, ReconnectMachine, ReconnectPolicy};
pub use types::{
    ConnectionStats, FeedCommand, Move, SubscribeOutcome, SubscribeRequest, Subscription,
    SubscriptionMeta, SubscriptionStats, Tier, TierCounts, UnsubscribeReason,
};
pub use worker::{ConnectionWorker, TickSink, WorkerConfig};
