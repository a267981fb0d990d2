//! Registry of per-actor circuit breakers.
//!
//! Breakers are created lazily the first time an actor is checked or reports an
//! outcome, and live until the actor is reset. Transitions are logged and handed
//! back to the caller as [`CircuitBreakerEvent`]s.

use crate::actor::{lock, ActorId, ActorMap};
use crate::circuit_breaker::{
    BreakerSnapshot, BreakerState, CircuitBreakerConfig, CircuitState, ProbeTicket, Transition,
};
use crate::telemetry::CircuitBreakerEvent;
use serde::Serialize;
use tracing::{error, info};

/// Result of a breaker admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerAdmission {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Set when the request took a half-open probe slot. The slot must be
    /// returned with [`CircuitBreakerRegistry::release_probe`] if the request
    /// never reports an outcome. Requests admitted while Closed carry `None`.
    pub probe: Option<ProbeTicket>,
    /// Transition triggered by the check.
    pub event: Option<CircuitBreakerEvent>,
}

/// Histogram of breaker states across actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BreakerStateCounts {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

impl BreakerStateCounts {
    fn add(&mut self, state: CircuitState) {
        match state {
            CircuitState::Closed => self.closed += 1,
            CircuitState::Open => self.open += 1,
            CircuitState::HalfOpen => self.half_open += 1,
        }
    }

    /// Breakers counted.
    pub fn total(&self) -> usize {
        self.closed + self.open + self.half_open
    }
}

/// Per-actor breakers sharing one configuration.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: ActorMap<BreakerState>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, breakers: ActorMap::default() }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admission check for `actor` at `now_millis`, moving an expired Open
    /// breaker to HalfOpen before deciding.
    pub fn check(&self, actor: &ActorId, now_millis: u64) -> BreakerAdmission {
        let entry = self.breakers.get_or_create(actor);
        let mut breaker = lock(&entry);
        let (allowed, transition) = breaker.try_acquire(&self.config, now_millis);
        let probe = breaker.probe_ticket(allowed);
        drop(breaker);
        BreakerAdmission { allowed, probe, event: transition.map(|t| self.announce(actor, t)) }
    }

    /// Shorthand for [`check`](Self::check) when only the verdict matters.
    pub fn is_allowed(&self, actor: &ActorId, now_millis: u64) -> bool {
        self.check(actor, now_millis).allowed
    }

    /// Give back a half-open probe slot whose request was rejected later on.
    /// A ticket from an earlier half-open episode frees nothing.
    pub fn release_probe(&self, actor: &ActorId, ticket: ProbeTicket) {
        if let Some(entry) = self.breakers.get(actor) {
            lock(&entry).release_probe(ticket);
        }
    }

    /// Record a successful downstream call.
    pub fn record_success(&self, actor: &ActorId) -> Option<CircuitBreakerEvent> {
        let entry = self.breakers.get_or_create(actor);
        let transition = lock(&entry).record_success(&self.config);
        transition.map(|t| self.announce(actor, t))
    }

    /// Record a failed downstream call at `now_millis`.
    pub fn record_failure(&self, actor: &ActorId, now_millis: u64) -> Option<CircuitBreakerEvent> {
        let entry = self.breakers.get_or_create(actor);
        let transition = lock(&entry).record_failure(&self.config, now_millis);
        transition.map(|t| self.announce(actor, t))
    }

    /// Drop the actor's breaker; the next request starts Closed.
    pub fn reset(&self, actor: &ActorId) -> bool {
        self.breakers.remove(actor)
    }

    /// Current state; unknown actors are Closed.
    pub fn state(&self, actor: &ActorId) -> CircuitState {
        self.snapshot(actor).state
    }

    /// Full breaker view; unknown actors get a fresh Closed snapshot.
    pub fn snapshot(&self, actor: &ActorId) -> BreakerSnapshot {
        self.breakers.get(actor).map(|entry| lock(&entry).snapshot()).unwrap_or_default()
    }

    /// Histogram over every tracked actor. Locks each breaker briefly, one at a time.
    pub fn state_counts(&self) -> BreakerStateCounts {
        let mut counts = BreakerStateCounts::default();
        for (_, entry) in self.breakers.entries() {
            counts.add(lock(&entry).state());
        }
        counts
    }

    fn announce(&self, actor: &ActorId, transition: Transition) -> CircuitBreakerEvent {
        match transition {
            Transition::Opened { failure_count } => {
                error!(
                    target: "gatehouse::circuit_breaker",
                    actor = %actor,
                    failures = failure_count,
                    threshold = self.config.failure_threshold(),
                    "circuit breaker → open"
                );
                CircuitBreakerEvent::Opened { failure_count }
            }
            Transition::HalfOpened => {
                info!(target: "gatehouse::circuit_breaker", actor = %actor, "circuit breaker → half-open");
                CircuitBreakerEvent::HalfOpen
            }
            Transition::Closed => {
                info!(target: "gatehouse::circuit_breaker", actor = %actor, "circuit breaker → closed");
                CircuitBreakerEvent::Closed
            }
        }
    }
}
