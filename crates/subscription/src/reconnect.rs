//! Per-connection reconnect state machine.
//!
//! ```text
//! DISCONNECTED ──► CONNECTING ──► CONNECTED
//!      ▲               │  ▲           │ (drop)
//!      │     failure   │  │ retry     ▼
//!      │   < threshold └─►BACKOFF_WAIT◄┘
//!      │               │
//!      │   failure     ▼
//!      └── (elapsed) COOLDOWN
//!           == threshold
//! ```
//!
//! The machine never sleeps; callers ask [`ReconnectMachine::next_action`]
//! with the current time and wait as told.

use chrono::{DateTime, Duration, Utc};
use config::ReconnectConfig;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    BackoffWait,
    Cooldown,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::BackoffWait => "backoff_wait",
            ConnectionState::Cooldown => "cooldown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAction {
    ConnectNow,
    WaitUntil(DateTime<Utc>),
    /// Connected or an attempt is in flight
    Idle,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        let initial = Duration::milliseconds(config.initial_backoff_ms.max(1) as i64);
        Self {
            initial_backoff: initial,
            max_backoff: Duration::milliseconds(config.max_backoff_ms as i64).max(initial),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: Duration::seconds(config.cooldown_seconds as i64),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    consecutive_failures: u32,
    /// Wait applied on the next failure
    next_backoff: Duration,
    /// Wait applied on the last failure
    last_backoff: Option<Duration>,
    retry_at: Option<DateTime<Utc>>,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Disconnected,
            consecutive_failures: 0,
            next_backoff: policy.initial_backoff,
            last_backoff: None,
            retry_at: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn retry_at(&self) -> Option<DateTime<Utc>> {
        self.retry_at
    }

    /// Delay applied after the most recent failure.
    pub fn last_backoff(&self) -> Option<Duration> {
        self.last_backoff
    }

    /// What the connection should do at `now`. An elapsed cooldown resets
    /// the machine to DISCONNECTED.
    pub fn next_action(&mut self, now: DateTime<Utc>) -> ReconnectAction {
        match self.state {
            ConnectionState::Disconnected => ReconnectAction::ConnectNow,
            ConnectionState::Connecting | ConnectionState::Connected => ReconnectAction::Idle,
            ConnectionState::BackoffWait => match self.retry_at {
                Some(at) if now < at => ReconnectAction::WaitUntil(at),
                _ => ReconnectAction::ConnectNow,
            },
            ConnectionState::Cooldown => match self.retry_at {
                Some(at) if now < at => ReconnectAction::WaitUntil(at),
                _ => {
                    self.reset();
                    ReconnectAction::ConnectNow
                }
            },
        }
    }

    /// Enter CONNECTING. Refused (returns false) unless an attempt is due.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> bool {
        if self.next_action(now) != ReconnectAction::ConnectNow {
            return false;
        }
        self.state = ConnectionState::Connecting;
        self.retry_at = None;
        true
    }

    pub fn on_success(&mut self) {
        self.state = ConnectionState::Connected;
        self.consecutive_failures = 0;
        self.next_backoff = self.policy.initial_backoff;
        self.last_backoff = None;
        self.retry_at = None;
    }

    /// Record a failed attempt; returns the state entered.
    pub fn on_failure(&mut self, now: DateTime<Utc>) -> ConnectionState {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= self.policy.failure_threshold {
            self.state = ConnectionState::Cooldown;
            self.retry_at = Some(now + self.policy.cooldown);
            self.last_backoff = Some(self.policy.cooldown);
        } else {
            let wait = self.next_backoff;
            self.state = ConnectionState::BackoffWait;
            self.retry_at = Some(now + wait);
            self.last_backoff = Some(wait);
            self.next_backoff = (wait * 2).min(self.policy.max_backoff);
        }
        self.state
    }

    /// An established connection dropped. Retried after the initial delay;
    /// not counted as a failed attempt.
    pub fn on_lost(&mut self, now: DateTime<Utc>) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let wait = self.policy.initial_backoff;
        self.state = ConnectionState::BackoffWait;
        self.retry_at = Some(now + wait);
        self.last_backoff = Some(wait);
        self.next_backoff = (wait * 2).min(self.policy.max_backoff);
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.consecutive_failures = 0;
        self.next_backoff = self.policy.initial_backoff;
        self.last_backoff = None;
        self.retry_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: Duration::seconds(1),
            max_backoff: Duration::seconds(8),
            failure_threshold: 6,
            cooldown: Duration::seconds(300),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 28, 4, 0, 0).unwrap()
    }

    /// Fail at the retry time repeatedly, collecting each applied delay.
    fn fail_repeatedly(machine: &mut ReconnectMachine, times: usize) -> Vec<Duration> {
        let mut now = t0();
        let mut delays = Vec::new();
        for _ in 0..times {
            assert!(machine.begin_attempt(now));
            machine.on_failure(now);
            delays.push(machine.last_backoff().unwrap());
            now = machine.retry_at().unwrap();
        }
        delays
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let mut machine = ReconnectMachine::new(policy());
        let delays = fail_repeatedly(&mut machine, 5);
        let secs: Vec<i64> = delays.iter().map(|d| d.num_seconds()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 8]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(machine.state(), ConnectionState::BackoffWait);
    }

    #[test]
    fn test_success_resets_backoff() {
        let mut machine = ReconnectMachine::new(policy());
        fail_repeatedly(&mut machine, 3);
        let now = machine.retry_at().unwrap();
        assert!(machine.begin_attempt(now));
        machine.on_success();
        assert!(machine.is_connected());
        assert_eq!(machine.consecutive_failures(), 0);

        machine.on_lost(now);
        assert!(machine.begin_attempt(machine.retry_at().unwrap()));
        machine.on_failure(now);
        // Drop waited 1s, so the first failure after it waits 2s
        assert_eq!(machine.last_backoff(), Some(Duration::seconds(2)));

        let now = machine.retry_at().unwrap();
        assert!(machine.begin_attempt(now));
        machine.on_success();
        assert_eq!(machine.last_backoff(), None);

        machine.on_lost(now);
        assert!(machine.begin_attempt(machine.retry_at().unwrap()));
        machine.on_failure(now);
        assert_eq!(machine.last_backoff(), Some(Duration::seconds(2)));
        assert_eq!(machine.consecutive_failures(), 1);
    }

    #[test]
    fn test_no_attempt_during_cooldown() {
        let mut machine = ReconnectMachine::new(policy());
        fail_repeatedly(&mut machine, 6);
        assert_eq!(machine.state(), ConnectionState::Cooldown);

        let entered = machine.retry_at().unwrap() - Duration::seconds(300);
        for offset in [0, 1, 60, 299] {
            let now = entered + Duration::seconds(offset);
            assert_matches!(machine.next_action(now), ReconnectAction::WaitUntil(_));
            assert!(!machine.begin_attempt(now));
        }

        let after = entered + Duration::seconds(300);
        assert_eq!(machine.next_action(after), ReconnectAction::ConnectNow);
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.consecutive_failures(), 0);
    }

    #[test]
    fn test_lost_only_applies_when_connected() {
        let mut machine = ReconnectMachine::new(policy());
        machine.on_lost(t0());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert_eq!(machine.next_action(t0()), ReconnectAction::ConnectNow);
    }
}
