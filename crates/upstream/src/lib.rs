//! # Upstream Crate
//!
//! Everything that talks to the broker, behind traits so the core can be
//! driven by in-memory doubles in tests.
//!
//! ## Key Components
//!
//! - **Feed**: [`FeedTransport`] / [`FeedSession`] stream decoded ticks and
//!   carry subscribe/unsubscribe requests. [`WsFeedTransport`] is the
//!   WebSocket implementation; [`wire`] chunks and encodes request batches.
//! - **REST**: [`BrokerRestClient`] fetches quotes, option chains and
//!   expiry lists. [`HttpBrokerClient`] speaks HTTP; [`RateLimitedClient`]
//!   adds per-endpoint sliding windows, a timeout, failure backoff and TTL
//!   caching.
//! - **Calendar**: [`MarketCalendar`] answers whether a segment's session
//!   is open. [`SessionCalendar`] is built from configured windows.

pub mod backoff;
pub mod calendar;
pub mod error;
pub mod feed;
pub mod http;
pub mod limited;
pub mod rate_limit;
pub mod rest;
pub mod ttl_cache;
pub mod types;
pub mod wire;
pub mod ws;

pub use backoff::EndpointBackoff;
pub use calendar::{ManualCalendar, MarketCalendar, SessionCalendar};
pub use error::{UpstreamError, UpstreamResult};
pub use feed::{FeedSession, FeedTransport, MockFeedTransport, SentRequest};
pub use http::HttpBrokerClient;
pub use limited::RateLimitedClient;
pub use rate_limit::{EndpointLimiters, RateLimiter};
pub use rest::{BrokerRestClient, MockBrokerClient};
pub use ttl_cache::TtlCache;
pub use types::{ChainRow, EndpointClass, LegQuote, OptionChainQuote, Quote};
pub use wire::{chunk_batches, FeedRequest};
pub use ws::WsFeedTransport;
