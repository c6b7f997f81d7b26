//! Client-side rate limiting for the broker REST API.

use crate::types::EndpointClass;
use config::{RateLimitConfig, RateLimitsConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Sliding-window rate limiter.
///
/// Tracks the timestamps of the last `max_requests` calls and makes callers
/// wait until the oldest one leaves the window.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests as usize)),
        }
    }

    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    /// Time to wait before the next request may go out.
    #[must_use]
    pub fn wait_time(&self) -> Duration {
        let mut timestamps = self.timestamps.lock();
        let now = Instant::now();

        while let Some(&oldest) = timestamps.front() {
            if now.duration_since(oldest) >= self.window {
                timestamps.pop_front();
            } else {
                break;
            }
        }

        if timestamps.len() >= self.max_requests as usize {
            if let Some(&oldest) = timestamps.front() {
                return self.window.saturating_sub(now.duration_since(oldest));
            }
        }

        Duration::ZERO
    }

    /// Record a request if one is allowed right now.
    pub fn try_acquire(&self) -> bool {
        if !self.wait_time().is_zero() {
            return false;
        }
        self.timestamps.lock().push_back(Instant::now());
        true
    }

    /// Wait until a request is allowed, then record it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.wait_time();
            if wait.is_zero() {
                let mut timestamps = self.timestamps.lock();
                // Another caller may have taken the slot between the check and the lock
                if timestamps.len() < self.max_requests as usize {
                    timestamps.push_back(Instant::now());
                    return;
                }
                continue;
            }
            tokio::time::sleep(wait).await;
        }
    }
}

/// One limiter per endpoint class; upstream ceilings differ per endpoint.
#[derive(Debug)]
pub struct EndpointLimiters {
    quote: RateLimiter,
    option_chain: RateLimiter,
    expiry_list: RateLimiter,
}

impl EndpointLimiters {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            quote: RateLimiter::from_config(&config.quote),
            option_chain: RateLimiter::from_config(&config.option_chain),
            expiry_list: RateLimiter::from_config(&config.expiry_list),
        }
    }

    pub fn get(&self, class: EndpointClass) -> &RateLimiter {
        match class {
            EndpointClass::Quote => &self.quote,
            EndpointClass::OptionChain => &self.option_chain,
            EndpointClass::ExpiryList => &self.expiry_list,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_blocks_then_releases() {
        let limiter = RateLimiter::new(2, Duration::from_secs(1));
        assert!(limiter.try_acquire());
        assert!(limiter.try_acquire());
        assert!(!limiter.try_acquire());
        assert!(limiter.wait_time() > Duration::ZERO);

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_out_the_window() {
        let limiter = RateLimiter::new(1, Duration::from_secs(3));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_pends_while_window_is_full() {
        let limiter = RateLimiter::new(1, Duration::from_secs(3));
        assert!(limiter.try_acquire());

        let mut waiting = tokio_test::task::spawn(limiter.acquire());
        tokio_test::assert_pending!(waiting.poll());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(waiting.is_woken());
        tokio_test::assert_ready!(waiting.poll());
        assert!(!limiter.try_acquire());
    }

    #[test]
    fn test_classes_are_independent() {
        let limiters = EndpointLimiters::from_config(&RateLimitsConfig::default());
        assert!(limiters.get(EndpointClass::OptionChain).try_acquire());
        assert!(!limiters.get(EndpointClass::OptionChain).try_acquire());
        assert!(limiters.get(EndpointClass::Quote).try_acquire());
    }
}
