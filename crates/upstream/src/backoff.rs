//! Failure backoff for the broker REST API.

use crate::types::EndpointClass;
use config::RestBackoffConfig;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct ClassState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

/// Per-endpoint-class exponential backoff.
///
/// A failed call blocks its class for `initial * 2^(n-1)`, capped at `max`,
/// where `n` counts consecutive failures. A success resets the class.
#[derive(Debug)]
pub struct EndpointBackoff {
    initial: Duration,
    max: Duration,
    quote: Mutex<ClassState>,
    option_chain: Mutex<ClassState>,
    expiry_list: Mutex<ClassState>,
}

impl EndpointBackoff {
    #[must_use]
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            quote: Mutex::default(),
            option_chain: Mutex::default(),
            expiry_list: Mutex::default(),
        }
    }

    #[must_use]
    pub fn from_config(config: &RestBackoffConfig) -> Self {
        Self::new(config.initial(), config.max())
    }

    fn state(&self, class: EndpointClass) -> &Mutex<ClassState> {
        match class {
            EndpointClass::Quote => &self.quote,
            EndpointClass::OptionChain => &self.option_chain,
            EndpointClass::ExpiryList => &self.expiry_list,
        }
    }

    /// Time left before `class` may be called again, if it is backing off.
    pub fn remaining(&self, class: EndpointClass) -> Option<Duration> {
        let until = self.state(class).lock().blocked_until?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Record a failure and return the pause now in force.
    pub fn record_failure(&self, class: EndpointClass) -> Duration {
        let mut state = self.state(class).lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let exponent = (state.consecutive_failures - 1).min(16);
        let delay = self.initial.saturating_mul(1u32 << exponent).min(self.max);
        state.blocked_until = Some(Instant::now() + delay);
        delay
    }

    pub fn record_success(&self, class: EndpointClass) {
        *self.state(class).lock() = ClassState::default();
    }

    pub fn consecutive_failures(&self, class: EndpointClass) -> u32 {
        self.state(class).lock().consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delay_doubles_up_to_cap() {
        let backoff = EndpointBackoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(backoff.record_failure(EndpointClass::OptionChain), Duration::from_secs(1));
        assert_eq!(backoff.record_failure(EndpointClass::OptionChain), Duration::from_secs(2));
        assert_eq!(backoff.record_failure(EndpointClass::OptionChain), Duration::from_secs(4));
        assert_eq!(backoff.record_failure(EndpointClass::OptionChain), Duration::from_secs(5));
        assert_eq!(backoff.consecutive_failures(EndpointClass::OptionChain), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_lapses_and_success_resets() {
        let backoff = EndpointBackoff::new(Duration::from_secs(2), Duration::from_secs(60));
        backoff.record_failure(EndpointClass::Quote);
        assert!(backoff.remaining(EndpointClass::Quote).is_some());
        assert!(backoff.remaining(EndpointClass::ExpiryList).is_none());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(backoff.remaining(EndpointClass::Quote).is_none());

        backoff.record_success(EndpointClass::Quote);
        assert_eq!(backoff.consecutive_failures(EndpointClass::Quote), 0);
        assert_eq!(backoff.record_failure(EndpointClass::Quote), Duration::from_secs(2));
    }
}
