//! Periodic maintenance and aggregate stats.
//!
//! [`AdmissionController::sweep`] walks every actor window, evicts timestamps
//! that left their window, clears expired blocks and publishes the aggregate
//! counters. [`AdmissionController::stats`] reads the last published snapshot
//! without touching any per-actor lock, so observability endpoints never
//! contend with the request path.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::admission::AdmissionController;
use crate::circuit_breaker_registry::BreakerStateCounts;
use crate::config::AdmissionConfig;
use crate::policy::RateLimitPolicy;
use crate::telemetry::AdmissionEvent;

/// Counters published by the most recent sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SweepSnapshot {
    pub(crate) swept_at_millis: Option<u64>,
    pub(crate) tracked_actors: usize,
    pub(crate) active_actors: usize,
    pub(crate) blocked_actors: usize,
    pub(crate) total_violations: u64,
    pub(crate) breaker_state_counts: BreakerStateCounts,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SweepReport {
    /// Instant of the sweep on the controller's clock.
    pub swept_at_millis: u64,
    /// Actors with a rate-limit window.
    pub tracked_actors: usize,
    /// Actors with an in-window request or an active block.
    pub active_actors: usize,
    /// Actors currently blocked.
    pub blocked_actors: usize,
    /// Timestamps evicted.
    pub evicted_timestamps: usize,
    /// Expired blocks cleared.
    pub cleared_blocks: usize,
    /// Violations recorded across all actors.
    pub total_violations: u64,
    /// Breaker-state histogram.
    pub breaker_state_counts: BreakerStateCounts,
}

/// Read-only snapshot for observability endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    /// Instant of the sweep the counters come from; `None` before the first sweep.
    pub swept_at_millis: Option<u64>,
    pub active_actors: usize,
    pub blocked_actors: usize,
    pub tracked_actors: usize,
    pub total_violations: u64,
    pub breaker_state_counts: BreakerStateCounts,
    /// Registered endpoint policies.
    pub per_endpoint_config: BTreeMap<String, RateLimitPolicy>,
    /// Policy for unregistered endpoints.
    pub default_policy: RateLimitPolicy,
}

impl AdmissionController {
    /// Run one maintenance pass now and publish its counters.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(self.now_millis())
    }

    /// [`sweep`](Self::sweep) at an explicit instant.
    pub fn sweep_at(&self, now_millis: u64) -> SweepReport {
        let started = Instant::now();
        let limiter = self.inner.limiter.sweep(now_millis);
        let breaker_state_counts = self.inner.breakers.state_counts();

        let report = SweepReport {
            swept_at_millis: now_millis,
            tracked_actors: limiter.tracked_actors,
            active_actors: limiter.active_actors,
            blocked_actors: limiter.blocked_actors,
            evicted_timestamps: limiter.evicted_timestamps,
            cleared_blocks: limiter.cleared_blocks,
            total_violations: limiter.total_violations,
            breaker_state_counts,
        };
        self.inner.last_sweep.store(std::sync::Arc::new(SweepSnapshot {
            swept_at_millis: Some(now_millis),
            tracked_actors: report.tracked_actors,
            active_actors: report.active_actors,
            blocked_actors: report.blocked_actors,
            total_violations: report.total_violations,
            breaker_state_counts,
        }));

        let duration = started.elapsed();
        debug!(
            target: "gatehouse::maintenance",
            tracked = report.tracked_actors,
            active = report.active_actors,
            blocked = report.blocked_actors,
            evicted = report.evicted_timestamps,
            cleared_blocks = report.cleared_blocks,
            ?duration,
            "sweep complete"
        );
        self.emit(AdmissionEvent::Swept {
            evicted_timestamps: report.evicted_timestamps,
            cleared_blocks: report.cleared_blocks,
            duration,
        });
        report
    }

    /// Counters from the last sweep plus the current policy table.
    ///
    /// Nothing sweeps on its own: the actor counters stay at zero, with
    /// `swept_at_millis` unset, until [`sweep`](Self::sweep) is called or a
    /// [`MaintenanceTask`] is running for this controller.
    pub fn stats(&self) -> AdmissionStats {
        let last = self.inner.last_sweep.load();
        AdmissionStats {
            swept_at_millis: last.swept_at_millis,
            active_actors: last.active_actors,
            blocked_actors: last.blocked_actors,
            tracked_actors: last.tracked_actors,
            total_violations: last.total_violations,
            breaker_state_counts: last.breaker_state_counts,
            per_endpoint_config: self.inner.policies.snapshot().into_iter().collect(),
            default_policy: self.inner.policies.default_policy(),
        }
    }
}

/// Background task running [`AdmissionController::sweep`] on a fixed period.
pub struct MaintenanceTask;

impl MaintenanceTask {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// The first sweep happens one `every` after spawning. The loop stops when
    /// the handle is shut down or dropped.
    pub fn spawn(controller: AdmissionController, every: Duration) -> MaintenanceHandle {
        let every = every.max(Duration::from_millis(1));
        let (shutdown, mut stop) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        controller.sweep();
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(target: "gatehouse::maintenance", "maintenance task stopped");
        });
        MaintenanceHandle { shutdown, join: Some(join) }
    }

    /// [`spawn`](Self::spawn) with the period from `config.sweep_interval_secs`.
    ///
    /// ```rust
    /// use gatehouse::{AdmissionConfig, AdmissionController, MaintenanceTask};
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let config = AdmissionConfig::chat_bot();
    /// let controller = AdmissionController::from_config(&config).unwrap();
    /// let maintenance = MaintenanceTask::spawn_from_config(controller.clone(), &config);
    /// // ... serve requests ...
    /// maintenance.shutdown().await;
    /// # }
    /// ```
    pub fn spawn_from_config(
        controller: AdmissionController,
        config: &AdmissionConfig,
    ) -> MaintenanceHandle {
        Self::spawn(controller, config.sweep_interval())
    }
}

/// Owner of a running [`MaintenanceTask`]. Dropping it aborts the task.
#[derive(Debug)]
pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn controller(clock: &ManualClock) -> AdmissionController {
        AdmissionController::builder()
            .policy("menu", RateLimitPolicy::new(2, 10, 5).unwrap())
            .clock(clock.clone())
            .build()
    }

    #[test]
    fn stats_before_first_sweep_are_empty() {
        let controller = controller(&ManualClock::new());
        controller.check("u1", "menu");
        let stats = controller.stats();
        assert_eq!(stats.swept_at_millis, None);
        assert_eq!(stats.active_actors, 0);
        assert_eq!(stats.per_endpoint_config.len(), 1);
        assert_eq!(stats.default_policy, RateLimitPolicy::default());
    }

    #[test]
    fn sweep_publishes_counters() {
        let clock = ManualClock::new();
        let controller = controller(&clock);
        for _ in 0..3 {
            controller.check("u1", "menu");
        }
        controller.check("u2", "menu");
        for _ in 0..5 {
            controller.report_outcome("u3", false);
        }

        let report = controller.sweep();
        assert_eq!(report.tracked_actors, 2);
        assert_eq!(report.active_actors, 2);
        assert_eq!(report.blocked_actors, 1);
        assert_eq!(report.total_violations, 1);
        assert_eq!(report.breaker_state_counts, BreakerStateCounts { closed: 2, open: 1, half_open: 0 });

        let stats = controller.stats();
        assert_eq!(stats.swept_at_millis, Some(0));
        assert_eq!(stats.blocked_actors, 1);
        assert_eq!(stats.breaker_state_counts.open, 1);
    }

    #[test]
    fn later_sweep_clears_expired_state() {
        let clock = ManualClock::new();
        let controller = controller(&clock);
        for _ in 0..3 {
            controller.check("u1", "menu");
        }
        clock.advance(Duration::from_secs(10));

        let report = controller.sweep();
        assert_eq!(report.evicted_timestamps, 2);
        assert_eq!(report.cleared_blocks, 1);
        assert_eq!(report.active_actors, 0);
        assert_eq!(controller.stats().total_violations, 1, "violations are never swept");
    }
}
