//! The admission controller: one call per inbound request, before any handler runs.
//!
//! Evaluation order is cheapest first. The actor's circuit breaker is consulted
//! before the rate limiter, so an actor whose breaker is open never touches its
//! rate-limit window. Admitted requests must report their outcome exactly once
//! through [`AdmissionController::report_outcome`]; rejected requests must not.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, error, info, warn};

use crate::actor::ActorId;
use crate::circuit_breaker::{BreakerSnapshot, CircuitBreakerConfig, CircuitState, ProbeTicket};
use crate::circuit_breaker_registry::CircuitBreakerRegistry;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{AdmissionConfig, ConfigError};
use crate::maintenance::SweepSnapshot;
use crate::policy::{EscalationPolicy, PolicyError, RateLimitPolicy};
use crate::policy_registry::PolicyRegistry;
use crate::rate_limit::{EndpointUsage, LimitOutcome, SlidingWindowLimiter};
use crate::telemetry::{AdmissionEvent, EventEmitter, NullSink, SinkEmitter, TelemetrySink};

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    /// The actor's circuit breaker is open (or out of half-open probes).
    CircuitOpen,
    /// This request exceeded the endpoint quota and started a block.
    RateLimited {
        /// Length of the block.
        retry_after: Duration,
    },
    /// The actor is serving a block started by an earlier request.
    Blocked {
        /// Time left on the block.
        retry_after: Duration,
    },
}

impl Denial {
    /// How long to wait before retrying; `None` for an open circuit.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Denial::CircuitOpen => None,
            Denial::RateLimited { retry_after } | Denial::Blocked { retry_after } => {
                Some(*retry_after)
            }
        }
    }

    /// True for both rate-limit variants.
    pub fn is_rate_limited(&self) -> bool {
        !matches!(self, Denial::CircuitOpen)
    }
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Denial::CircuitOpen => write!(f, "circuit open: service temporarily unavailable"),
            Denial::RateLimited { retry_after } => {
                write!(f, "rate limit exceeded, retry after {}s", ceil_secs(*retry_after))
            }
            Denial::Blocked { retry_after } => write!(
                f,
                "rate limit exceeded (currently blocked), retry after {}s",
                ceil_secs(*retry_after)
            ),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

/// Outcome of [`AdmissionController::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionDecision {
    allowed: bool,
    denial: Option<Denial>,
    probe: Option<ProbeTicket>,
}

impl AdmissionDecision {
    pub(crate) fn allow(probe: Option<ProbeTicket>) -> Self {
        Self { allowed: true, denial: None, probe }
    }

    pub(crate) fn deny(denial: Denial) -> Self {
        Self { allowed: false, denial: Some(denial), probe: None }
    }

    /// Whether the request may proceed.
    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// Structured reason, present only for denials.
    pub fn denial(&self) -> Option<Denial> {
        self.denial
    }

    /// Human-readable reason, present only for denials.
    pub fn reason(&self) -> Option<String> {
        self.denial.map(|d| d.to_string())
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.denial.and_then(|d| d.retry_after())
    }

    /// Retry hint rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after().map(ceil_secs)
    }

    /// Half-open slot held by this admission, if the breaker was recovering.
    pub fn probe(&self) -> Option<ProbeTicket> {
        self.probe
    }
}

pub(crate) struct Inner {
    pub(crate) policies: Arc<PolicyRegistry>,
    pub(crate) limiter: SlidingWindowLimiter,
    pub(crate) breakers: CircuitBreakerRegistry,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) telemetry: Arc<dyn EventEmitter>,
    pub(crate) last_sweep: ArcSwap<SweepSnapshot>,
}

/// Per-actor admission control: a circuit breaker in front of a sliding-window
/// rate limiter.
///
/// Clones share the same state.
///
/// # Examples
/// ```
/// use gatehouse::{AdmissionController, RateLimitPolicy};
///
/// let controller = AdmissionController::builder()
///     .policy("order", RateLimitPolicy::new(1, 300, 60).unwrap())
///     .build();
///
/// assert!(controller.check("u1", "order").allowed());
/// controller.report_outcome("u1", true);
///
/// let second = controller.check("u1", "order");
/// assert!(!second.allowed());
/// assert_eq!(second.retry_after_secs(), Some(60));
/// ```
#[derive(Clone)]
pub struct AdmissionController {
    pub(crate) inner: Arc<Inner>,
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("default_policy", &self.inner.policies.default_policy())
            .field("breaker", self.inner.breakers.config())
            .field("tracked_actors", &self.inner.limiter.tracked_actors())
            .finish()
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AdmissionController {
    pub fn builder() -> AdmissionControllerBuilder {
        AdmissionControllerBuilder::default()
    }

    /// Build a controller from host configuration, registering every endpoint it lists.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut builder = Self::builder()
            .default_policy(config.default_policy)
            .breaker(config.breaker_config()?);
        for (endpoint, policy) in &config.endpoints {
            builder = builder.policy(endpoint.clone(), *policy);
        }
        if let Some(escalation) = config.escalation {
            builder = builder.escalation(escalation);
        }
        Ok(builder.build())
    }

    /// Decide whether `actor` may call `endpoint` now.
    pub fn check(&self, actor: impl Into<ActorId>, endpoint: &str) -> AdmissionDecision {
        self.check_at(&actor.into(), endpoint, self.now_millis())
    }

    /// [`check`](Self::check) at an explicit instant (milliseconds on the controller's clock).
    pub fn check_at(&self, actor: &ActorId, endpoint: &str, now_millis: u64) -> AdmissionDecision {
        let breaker = self.inner.breakers.check(actor, now_millis);
        if let Some(event) = breaker.event {
            self.emit(AdmissionEvent::CircuitBreaker { actor: actor.clone(), event });
        }
        if !breaker.allowed {
            return self.deny(actor, endpoint, Denial::CircuitOpen);
        }

        match self.inner.limiter.check_and_record(actor, endpoint, now_millis) {
            LimitOutcome::Allowed { remaining } => {
                debug!(
                    target: "gatehouse::admission",
                    actor = %actor,
                    endpoint,
                    remaining,
                    probe = breaker.probe.is_some(),
                    "admitted"
                );
                self.emit(AdmissionEvent::Admitted {
                    actor: actor.clone(),
                    endpoint: endpoint.to_owned(),
                });
                AdmissionDecision::allow(breaker.probe)
            }
            LimitOutcome::Blocked { retry_after } => {
                if let Some(ticket) = breaker.probe {
                    self.inner.breakers.release_probe(actor, ticket);
                }
                self.deny(actor, endpoint, Denial::Blocked { retry_after })
            }
            LimitOutcome::Exceeded { retry_after, violations, escalated } => {
                if let Some(ticket) = breaker.probe {
                    self.inner.breakers.release_probe(actor, ticket);
                }
                if escalated {
                    error!(
                        target: "gatehouse::admission",
                        actor = %actor,
                        endpoint,
                        violations,
                        block_secs = retry_after.as_secs(),
                        "repeated rate limit violations; block escalated"
                    );
                } else {
                    warn!(
                        target: "gatehouse::admission",
                        actor = %actor,
                        endpoint,
                        violations,
                        block_secs = retry_after.as_secs(),
                        "rate limit exceeded; actor blocked"
                    );
                }
                self.deny(actor, endpoint, Denial::RateLimited { retry_after })
            }
        }
    }

    /// Report how an admitted request went downstream.
    pub fn report_outcome(&self, actor: impl Into<ActorId>, succeeded: bool) {
        self.report_outcome_at(&actor.into(), succeeded, self.now_millis());
    }

    /// [`report_outcome`](Self::report_outcome) at an explicit instant.
    pub fn report_outcome_at(&self, actor: &ActorId, succeeded: bool, now_millis: u64) {
        let transition = if succeeded {
            self.inner.breakers.record_success(actor)
        } else {
            self.inner.breakers.record_failure(actor, now_millis)
        };
        self.emit(AdmissionEvent::Outcome { actor: actor.clone(), succeeded });
        if let Some(event) = transition {
            self.emit(AdmissionEvent::CircuitBreaker { actor: actor.clone(), event });
        }
    }

    /// Give up on an admitted request without an outcome (e.g. the handler was
    /// cancelled). Returns the half-open slot `decision` took, if it took one;
    /// requests admitted while the breaker was Closed release nothing.
    pub fn release(&self, actor: impl Into<ActorId>, decision: &AdmissionDecision) {
        if let Some(ticket) = decision.probe {
            self.inner.breakers.release_probe(&actor.into(), ticket);
        }
    }

    /// Register a quota for `endpoint`, replacing any earlier one.
    pub fn register_policy(
        &self,
        endpoint: impl Into<String>,
        max_requests: u32,
        window_secs: u64,
        block_duration_secs: u64,
    ) -> Result<(), PolicyError> {
        let policy = RateLimitPolicy::new(max_requests, window_secs, block_duration_secs)?;
        self.inner.policies.register(endpoint, policy);
        Ok(())
    }

    /// Clear the actor's rate-limit window (violations included) and breaker.
    pub fn reset(&self, actor: impl Into<ActorId>) {
        let actor = actor.into();
        let had_window = self.inner.limiter.reset(&actor);
        let had_breaker = self.inner.breakers.reset(&actor);
        info!(
            target: "gatehouse::admission",
            actor = %actor,
            had_window,
            had_breaker,
            "actor reset"
        );
    }

    /// Per-endpoint usage for the actor right now.
    pub fn usage(&self, actor: impl Into<ActorId>) -> Vec<EndpointUsage> {
        self.inner.limiter.usage(&actor.into(), self.now_millis())
    }

    /// Violations recorded for the actor since creation or the last reset.
    pub fn violation_count(&self, actor: impl Into<ActorId>) -> u64 {
        self.inner.limiter.violation_count(&actor.into())
    }

    pub fn breaker_state(&self, actor: impl Into<ActorId>) -> CircuitState {
        self.inner.breakers.state(&actor.into())
    }

    pub fn breaker_snapshot(&self, actor: impl Into<ActorId>) -> BreakerSnapshot {
        self.inner.breakers.snapshot(&actor.into())
    }

    /// Policy applied to `endpoint`.
    pub fn policy(&self, endpoint: &str) -> RateLimitPolicy {
        self.inner.policies.resolve(endpoint)
    }

    /// Current instant on the controller's clock.
    pub fn now_millis(&self) -> u64 {
        self.inner.clock.now_millis()
    }

    fn deny(&self, actor: &ActorId, endpoint: &str, denial: Denial) -> AdmissionDecision {
        warn!(
            target: "gatehouse::admission",
            actor = %actor,
            endpoint,
            reason = %denial,
            "request denied"
        );
        self.emit(AdmissionEvent::Denied {
            actor: actor.clone(),
            endpoint: endpoint.to_owned(),
            denial,
        });
        AdmissionDecision::deny(denial)
    }

    pub(crate) fn emit(&self, event: AdmissionEvent) {
        self.inner.telemetry.emit(event);
    }
}

/// Builder for [`AdmissionController`].
#[derive(Debug)]
pub struct AdmissionControllerBuilder {
    default_policy: RateLimitPolicy,
    policies: Vec<(String, RateLimitPolicy)>,
    escalation: Option<EscalationPolicy>,
    breaker: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    telemetry: Arc<dyn EventEmitter>,
}

impl Default for AdmissionControllerBuilder {
    fn default() -> Self {
        Self {
            default_policy: RateLimitPolicy::default(),
            policies: Vec::new(),
            escalation: None,
            breaker: CircuitBreakerConfig::default(),
            clock: Arc::new(MonotonicClock::default()),
            telemetry: Arc::new(SinkEmitter(NullSink)),
        }
    }
}

impl AdmissionControllerBuilder {
    /// Policy for endpoints without a registration.
    pub fn default_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Register a policy for one endpoint.
    pub fn policy(mut self, endpoint: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.policies.push((endpoint.into(), policy));
        self
    }

    /// Register several endpoint policies, e.g. from [`crate::presets`].
    pub fn policies<I, K>(mut self, policies: I) -> Self
    where
        I: IntoIterator<Item = (K, RateLimitPolicy)>,
        K: Into<String>,
    {
        self.policies.extend(policies.into_iter().map(|(k, p)| (k.into(), p)));
        self
    }

    /// Block repeat offenders for longer; off unless set.
    pub fn escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Send admission events to `sink`.
    pub fn telemetry<S: TelemetrySink>(mut self, sink: S) -> Self {
        self.telemetry = Arc::new(SinkEmitter(sink));
        self
    }

    pub fn build(self) -> AdmissionController {
        let policies = Arc::new(PolicyRegistry::new(self.default_policy));
        for (endpoint, policy) in self.policies {
            policies.register(endpoint, policy);
        }
        let mut limiter = SlidingWindowLimiter::new(policies.clone());
        if let Some(escalation) = self.escalation {
            limiter = limiter.with_escalation(escalation);
        }
        AdmissionController {
            inner: Arc::new(Inner {
                limiter,
                policies,
                breakers: CircuitBreakerRegistry::new(self.breaker),
                clock: self.clock,
                telemetry: self.telemetry,
                last_sweep: ArcSwap::from_pointee(SweepSnapshot::default()),
            }),
        }
    }
}
