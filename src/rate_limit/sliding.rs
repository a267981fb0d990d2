use std::sync::Arc;
use std::time::Duration;

use crate::actor::{lock, ActorId, ActorMap};
use crate::policy::EscalationPolicy;
use crate::policy_registry::PolicyRegistry;
use crate::rate_limit::window::{ActorWindow, BlockStart, WindowSweep};
use crate::rate_limit::{EndpointUsage, LimitOutcome};

/// Per-actor sliding-window limiter.
///
/// Each actor owns one window holding a timestamp log per endpoint and a single
/// block that applies to every endpoint. With an [`EscalationPolicy`], repeat
/// offenders get the escalated block instead. The limiter emits no telemetry;
/// the admission controller reports on its decisions.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    policies: Arc<PolicyRegistry>,
    escalation: Option<EscalationPolicy>,
    windows: ActorMap<ActorWindow>,
}

/// Aggregate result of a limiter sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSweep {
    /// Actors with a window.
    pub tracked_actors: usize,
    /// Actors with an in-window request or an active block.
    pub active_actors: usize,
    /// Actors currently blocked.
    pub blocked_actors: usize,
    /// Timestamps dropped by this sweep.
    pub evicted_timestamps: usize,
    /// Expired blocks cleared by this sweep.
    pub cleared_blocks: usize,
    /// Sum of violation counts across actors.
    pub total_violations: u64,
}

impl SlidingWindowLimiter {
    pub fn new(policies: Arc<PolicyRegistry>) -> Self {
        Self { policies, escalation: None, windows: ActorMap::default() }
    }

    /// Escalate repeat offenders' blocks.
    pub fn with_escalation(mut self, escalation: EscalationPolicy) -> Self {
        self.escalation = Some(escalation);
        self
    }

    /// Decide whether `actor` may make one more `endpoint` request at `now_millis`,
    /// recording it when allowed.
    ///
    /// A blocked actor is rejected without being recorded, so retrying never
    /// extends the block. The request that finds `max_requests` entries already
    /// in the window is the one that trips the limiter.
    pub fn check_and_record(&self, actor: &ActorId, endpoint: &str, now_millis: u64) -> LimitOutcome {
        let policy = self.policies.resolve(endpoint);
        let entry = self.windows.get_or_create(actor);
        let mut window = lock(&entry);

        if let Some(remaining) = window.block_remaining(now_millis) {
            return LimitOutcome::Blocked { retry_after: Duration::from_millis(remaining) };
        }

        window.evict(endpoint, &policy, now_millis);

        let in_window = window.in_window(endpoint);
        if in_window >= policy.max_requests() as usize {
            let BlockStart { violations, millis, escalated } =
                window.block(now_millis, policy.block_millis(), self.escalation.as_ref());
            return LimitOutcome::Exceeded {
                retry_after: Duration::from_millis(millis),
                violations,
                escalated,
            };
        }

        window.record(endpoint, now_millis);
        let used = u32::try_from(in_window + 1).unwrap_or(u32::MAX);
        LimitOutcome::Allowed { remaining: policy.max_requests().saturating_sub(used) }
    }

    /// Forget everything about `actor`, including its violation count.
    pub fn reset(&self, actor: &ActorId) -> bool {
        self.windows.remove(actor)
    }

    /// Per-endpoint usage for `actor`; empty for unknown actors.
    pub fn usage(&self, actor: &ActorId, now_millis: u64) -> Vec<EndpointUsage> {
        match self.windows.get(actor) {
            Some(entry) => lock(&entry).usage(now_millis, |e| self.policies.resolve(e)),
            None => Vec::new(),
        }
    }

    /// Violations recorded for `actor` since creation or the last reset.
    pub fn violation_count(&self, actor: &ActorId) -> u64 {
        self.windows.get(actor).map_or(0, |entry| lock(&entry).violation_count())
    }

    /// Milliseconds left on the actor's block, if one is active at `now_millis`.
    pub fn blocked_for(&self, actor: &ActorId, now_millis: u64) -> Option<Duration> {
        let entry = self.windows.get(actor)?;
        let window = lock(&entry);
        match window.blocked_until() {
            Some(until) if now_millis < until => Some(Duration::from_millis(until - now_millis)),
            _ => None,
        }
    }

    /// Evict expired timestamps and blocks for every actor.
    ///
    /// Entry handles are cloned out of the map first, so new actors can register
    /// while the sweep works through existing ones.
    pub fn sweep(&self, now_millis: u64) -> LimiterSweep {
        let entries = self.windows.entries();
        let mut report = LimiterSweep { tracked_actors: entries.len(), ..Default::default() };
        for (_, entry) in entries {
            let mut window = lock(&entry);
            let WindowSweep { evicted, block_cleared, active, blocked } =
                window.sweep(now_millis, |e| self.policies.resolve(e), self.escalation.as_ref());
            report.evicted_timestamps += evicted;
            report.cleared_blocks += usize::from(block_cleared);
            report.active_actors += usize::from(active);
            report.blocked_actors += usize::from(blocked);
            report.total_violations += window.violation_count();
        }
        report
    }

    /// Actors with a window.
    pub fn tracked_actors(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::RateLimitPolicy;

    const S: u64 = 1_000;

    fn limiter(max: u32, window: u64, block: u64) -> SlidingWindowLimiter {
        let registry = PolicyRegistry::default();
        registry.register("menu", RateLimitPolicy::new(max, window, block).unwrap());
        SlidingWindowLimiter::new(Arc::new(registry))
    }

    #[test]
    fn nth_request_trips_the_limiter() {
        let limiter = limiter(3, 10, 5);
        let u1 = ActorId::from("u1");

        assert_eq!(limiter.check_and_record(&u1, "menu", 0), LimitOutcome::Allowed { remaining: 2 });
        assert_eq!(limiter.check_and_record(&u1, "menu", S), LimitOutcome::Allowed { remaining: 1 });
        assert_eq!(
            limiter.check_and_record(&u1, "menu", 2 * S),
            LimitOutcome::Allowed { remaining: 0 }
        );
        assert_eq!(
            limiter.check_and_record(&u1, "menu", 3 * S),
            LimitOutcome::Exceeded {
                retry_after: Duration::from_secs(5),
                violations: 1,
                escalated: false
            }
        );
    }

    #[test]
    fn blocked_retries_do_not_extend_the_block() {
        let limiter = limiter(1, 10, 5);
        let u1 = ActorId::from("u1");
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(!limiter.check_and_record(&u1, "menu", S).is_allowed());

        for t in [S + 1, 2 * S, 4 * S, 6 * S - 1] {
            let outcome = limiter.check_and_record(&u1, "menu", t);
            assert_eq!(
                outcome,
                LimitOutcome::Blocked { retry_after: Duration::from_millis(6 * S - t) }
            );
        }
        assert_eq!(limiter.violation_count(&u1), 1);
        assert_eq!(limiter.blocked_for(&u1, 6 * S), None);
    }

    #[test]
    fn block_applies_to_every_endpoint() {
        let limiter = limiter(1, 10, 5);
        let u1 = ActorId::from("u1");
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(!limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(matches!(
            limiter.check_and_record(&u1, "cart", S),
            LimitOutcome::Blocked { .. }
        ));
    }

    #[test]
    fn endpoints_have_separate_logs() {
        let limiter = limiter(2, 10, 5);
        let u1 = ActorId::from("u1");
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
        // "cart" resolves to the default policy and has its own log.
        assert_eq!(limiter.check_and_record(&u1, "cart", 0), LimitOutcome::Allowed { remaining: 9 });
    }

    #[test]
    fn slot_reopens_when_oldest_timestamp_leaves_window() {
        let limiter = limiter(3, 10, 5);
        let u1 = ActorId::from("u1");
        for t in [0, S, 2 * S] {
            assert!(limiter.check_and_record(&u1, "menu", t).is_allowed());
        }
        assert!(!limiter.check_and_record(&u1, "menu", 3 * S).is_allowed());
        // Block ends at 8s; timestamp 0 leaves the window at 10s.
        assert_eq!(limiter.check_and_record(&u1, "menu", 10 * S), LimitOutcome::Allowed { remaining: 0 });
    }

    #[test]
    fn reset_clears_window_and_violations() {
        let limiter = limiter(1, 10, 5);
        let u1 = ActorId::from("u1");
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(!limiter.check_and_record(&u1, "menu", 0).is_allowed());
        assert!(limiter.reset(&u1));
        assert_eq!(limiter.violation_count(&u1), 0);
        assert!(limiter.check_and_record(&u1, "menu", 0).is_allowed());
    }

    #[test]
    fn sweep_aggregates_across_actors() {
        let limiter = limiter(1, 10, 5);
        let (a, b) = (ActorId::from("a"), ActorId::from("b"));
        assert!(limiter.check_and_record(&a, "menu", 0).is_allowed());
        assert!(!limiter.check_and_record(&a, "menu", 0).is_allowed());
        assert!(limiter.check_and_record(&b, "menu", 0).is_allowed());

        let report = limiter.sweep(S);
        assert_eq!(report.tracked_actors, 2);
        assert_eq!(report.active_actors, 2);
        assert_eq!(report.blocked_actors, 1);
        assert_eq!(report.total_violations, 1);

        let report = limiter.sweep(10 * S);
        assert_eq!(report.active_actors, 0);
        assert_eq!(report.blocked_actors, 0);
        assert_eq!(report.evicted_timestamps, 2);
        assert_eq!(report.cleared_blocks, 1);
        assert_eq!(report.tracked_actors, 2, "windows persist after a sweep");
    }

    #[test]
    fn repeat_offender_gets_the_escalated_block() {
        let limiter = limiter(1, 1, 1).with_escalation(EscalationPolicy::new(3, 300, 3_600).unwrap());
        let u1 = ActorId::from("u1");

        // Each round: one admitted request, one violation, wait out block and window.
        for round in 0..2u64 {
            let t = round * 10 * S;
            assert!(limiter.check_and_record(&u1, "menu", t).is_allowed());
            assert_eq!(
                limiter.check_and_record(&u1, "menu", t),
                LimitOutcome::Exceeded {
                    retry_after: Duration::from_secs(1),
                    violations: round + 1,
                    escalated: false
                }
            );
        }

        assert!(limiter.check_and_record(&u1, "menu", 20 * S).is_allowed());
        assert_eq!(
            limiter.check_and_record(&u1, "menu", 20 * S),
            LimitOutcome::Exceeded {
                retry_after: Duration::from_secs(3_600),
                violations: 3,
                escalated: true
            }
        );
        assert_eq!(limiter.blocked_for(&u1, 30 * S), Some(Duration::from_secs(3_590)));
    }

    #[test]
    fn without_escalation_blocks_stay_at_the_policy_length() {
        let limiter = limiter(1, 1, 1);
        let u1 = ActorId::from("u1");
        for round in 0..6u64 {
            let t = round * 10 * S;
            assert!(limiter.check_and_record(&u1, "menu", t).is_allowed());
            assert_eq!(limiter.check_and_record(&u1, "menu", t).retry_after(), Some(Duration::from_secs(1)));
        }
        assert_eq!(limiter.violation_count(&u1), 6);
    }
}
