//! Per-actor circuit breaker state machine.
//!
//! The breaker cuts off an actor whose admitted requests keep failing
//! downstream, independently of how fast those requests arrive.
//!
//! - **Closed**: everything is admitted; consecutive failures are counted.
//! - **Open**: everything is rejected until `recovery_timeout` has passed since
//!   the last failure, then the next check moves the breaker to half-open.
//! - **HalfOpen**: up to `half_open_max_calls` probes may be in flight. That many
//!   successes close the breaker; a single failure reopens it.

use crate::clock::duration_millis;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operating mode.
    #[default]
    Closed,
    /// Rejects every request until the recovery timeout elapses.
    Open,
    /// Probe mode allowing a limited number of requests to test recovery.
    HalfOpen,
}

/// Validated configuration shared by every actor's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    recovery_timeout: Duration,
    half_open_max_calls: usize,
}

/// Errors produced when validating breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerError {
    /// Failure threshold must be > 0.
    InvalidFailureThreshold {
        /// Value provided by caller.
        provided: usize,
    },
    /// Recovery timeout must be > 0.
    InvalidRecoveryTimeout(Duration),
    /// Half-open probe limit must be > 0.
    InvalidHalfOpenLimit {
        /// Value provided by caller.
        provided: usize,
    },
}

impl std::fmt::Display for CircuitBreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitBreakerError::InvalidFailureThreshold { provided } => {
                write!(f, "failure_threshold must be > 0 (got {})", provided)
            }
            CircuitBreakerError::InvalidRecoveryTimeout(timeout) => {
                write!(f, "recovery_timeout must be > 0 (got {:?})", timeout)
            }
            CircuitBreakerError::InvalidHalfOpenLimit { provided } => {
                write!(f, "half_open_max_calls must be > 0 (got {})", provided)
            }
        }
    }
}

impl std::error::Error for CircuitBreakerError {}

impl Default for CircuitBreakerConfig {
    /// 5 failures, 60 second recovery timeout, 5 half-open probes.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 5,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a config with validation.
    pub fn new(
        failure_threshold: usize,
        recovery_timeout: Duration,
        half_open_max_calls: usize,
    ) -> Result<Self, CircuitBreakerError> {
        let cfg = Self { failure_threshold, recovery_timeout, half_open_max_calls };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Start from the defaults and override selectively.
    ///
    /// # Examples
    /// ```
    /// use gatehouse::CircuitBreakerConfig;
    /// use std::time::Duration;
    /// let cfg = CircuitBreakerConfig::builder()
    ///     .failure_threshold(3)
    ///     .recovery_timeout(Duration::from_secs(30))
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(cfg.half_open_max_calls(), 5);
    /// ```
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder { cfg: Self::default() }
    }

    fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::InvalidFailureThreshold { provided: 0 });
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::InvalidHalfOpenLimit { provided: 0 });
        }
        if self.recovery_timeout == Duration::ZERO {
            return Err(CircuitBreakerError::InvalidRecoveryTimeout(self.recovery_timeout));
        }
        Ok(())
    }

    /// Consecutive failures before opening from Closed.
    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    /// Time since the last failure before Open gives way to HalfOpen.
    pub fn recovery_timeout(&self) -> Duration {
        self.recovery_timeout
    }

    /// Probes allowed in flight, and successes needed to close, while HalfOpen.
    pub fn half_open_max_calls(&self) -> usize {
        self.half_open_max_calls
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    cfg: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.cfg.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.recovery_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, calls: usize) -> Self {
        self.cfg.half_open_max_calls = calls;
        self
    }

    pub fn build(self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}

/// A state change produced by an admission check or an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Opened { failure_count: usize },
    HalfOpened,
    Closed,
}

/// Point-in-time view of one actor's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: CircuitState,
    /// Failures counted since the breaker last closed or saw a success.
    pub failure_count: usize,
    /// Millisecond timestamp of the most recent failure.
    pub last_failure_millis: Option<u64>,
    /// Successful probes since entering HalfOpen.
    pub half_open_call_count: usize,
    /// Admitted probes awaiting an outcome.
    pub half_open_in_flight: usize,
}

/// Marks a request admitted into one of the breaker's half-open slots.
///
/// A ticket only frees a slot in the half-open episode that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProbeTicket(u64);

/// Mutable breaker state for one actor. Always accessed under that actor's lock.
#[derive(Debug, Default)]
pub(crate) struct BreakerState {
    snap: BreakerSnapshot,
    /// Bumped on every entry into HalfOpen; identifies whose probe slots are whose.
    half_open_epoch: u64,
}

impl BreakerState {
    pub(crate) fn snapshot(&self) -> BreakerSnapshot {
        self.snap
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.snap.state
    }

    /// Ticket for a request just admitted, `None` unless it took a half-open slot.
    pub(crate) fn probe_ticket(&self, allowed: bool) -> Option<ProbeTicket> {
        (allowed && self.snap.state == CircuitState::HalfOpen)
            .then_some(ProbeTicket(self.half_open_epoch))
    }

    /// Admission check. Returns whether the request may proceed and any
    /// transition that happened while deciding.
    pub(crate) fn try_acquire(
        &mut self,
        cfg: &CircuitBreakerConfig,
        now: u64,
    ) -> (bool, Option<Transition>) {
        let mut transition = None;
        if self.snap.state == CircuitState::Open {
            let timeout = duration_millis(cfg.recovery_timeout);
            let elapsed = self.snap.last_failure_millis.map(|last| now.saturating_sub(last));
            match elapsed {
                Some(elapsed) if elapsed <= timeout => return (false, None),
                _ => {
                    self.enter(CircuitState::HalfOpen);
                    transition = Some(Transition::HalfOpened);
                }
            }
        }

        match self.snap.state {
            CircuitState::Closed => (true, transition),
            CircuitState::HalfOpen => {
                if self.snap.half_open_in_flight >= cfg.half_open_max_calls {
                    return (false, transition);
                }
                self.snap.half_open_in_flight += 1;
                (true, transition)
            }
            CircuitState::Open => (false, transition),
        }
    }

    /// Return a probe slot taken by `try_acquire` that will never report an outcome.
    ///
    /// Tickets from an earlier half-open episode are ignored: the slot they held
    /// was discarded when the breaker left that episode.
    pub(crate) fn release_probe(&mut self, ticket: ProbeTicket) {
        if self.snap.state == CircuitState::HalfOpen && ticket.0 == self.half_open_epoch {
            self.snap.half_open_in_flight = self.snap.half_open_in_flight.saturating_sub(1);
        }
    }

    pub(crate) fn record_success(&mut self, cfg: &CircuitBreakerConfig) -> Option<Transition> {
        match self.snap.state {
            CircuitState::Closed => {
                self.snap.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                self.snap.half_open_in_flight = self.snap.half_open_in_flight.saturating_sub(1);
                self.snap.half_open_call_count += 1;
                if self.snap.half_open_call_count >= cfg.half_open_max_calls {
                    self.enter(CircuitState::Closed);
                    Some(Transition::Closed)
                } else {
                    None
                }
            }
            // Late report for a request admitted before the breaker opened.
            CircuitState::Open => None,
        }
    }

    pub(crate) fn record_failure(
        &mut self,
        cfg: &CircuitBreakerConfig,
        now: u64,
    ) -> Option<Transition> {
        self.snap.failure_count = self.snap.failure_count.saturating_add(1);
        self.snap.last_failure_millis = Some(now);
        match self.snap.state {
            CircuitState::Closed if self.snap.failure_count >= cfg.failure_threshold => {
                self.enter(CircuitState::Open);
                Some(Transition::Opened { failure_count: self.snap.failure_count })
            }
            CircuitState::HalfOpen => {
                self.enter(CircuitState::Open);
                Some(Transition::Opened { failure_count: self.snap.failure_count })
            }
            _ => None,
        }
    }

    fn enter(&mut self, state: CircuitState) {
        self.snap.state = state;
        self.snap.half_open_call_count = 0;
        self.snap.half_open_in_flight = 0;
        match state {
            CircuitState::Closed => self.snap.failure_count = 0,
            CircuitState::HalfOpen => self.half_open_epoch = self.half_open_epoch.wrapping_add(1),
            CircuitState::Open => {}
        }
    }
}
