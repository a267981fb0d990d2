use std::collections::{HashMap, VecDeque};

use crate::policy::{EscalationPolicy, RateLimitPolicy};
use crate::rate_limit::EndpointUsage;

/// Per-actor limiter state: one timestamp log per endpoint plus an actor-wide block.
#[derive(Debug, Default)]
pub(crate) struct ActorWindow {
    logs: HashMap<String, VecDeque<u64>>,
    blocked_until: Option<u64>,
    violation_count: u64,
    /// Violation instants inside the escalation lookback; empty without escalation.
    recent_violations: VecDeque<u64>,
}

/// A block just started by [`ActorWindow::block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockStart {
    pub(crate) violations: u64,
    pub(crate) millis: u64,
    pub(crate) escalated: bool,
}

/// What a sweep did to one window.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowSweep {
    pub(crate) evicted: usize,
    pub(crate) block_cleared: bool,
    pub(crate) active: bool,
    pub(crate) blocked: bool,
}

impl ActorWindow {
    /// Milliseconds left on the current block. Clears an expired block.
    pub(crate) fn block_remaining(&mut self, now: u64) -> Option<u64> {
        match self.blocked_until {
            Some(until) if now < until => Some(until - now),
            Some(_) => {
                self.blocked_until = None;
                None
            }
            None => None,
        }
    }

    /// Drop timestamps of `endpoint` that are no longer inside the window.
    pub(crate) fn evict(&mut self, endpoint: &str, policy: &RateLimitPolicy, now: u64) -> usize {
        match self.logs.get_mut(endpoint) {
            Some(log) => evict_log(log, policy.window_millis(), now),
            None => 0,
        }
    }

    pub(crate) fn in_window(&self, endpoint: &str) -> usize {
        self.logs.get(endpoint).map_or(0, VecDeque::len)
    }

    /// Count a violation at `now` and block for `block_millis`, or for the
    /// escalated duration when the actor has tripped its quota too often.
    pub(crate) fn block(
        &mut self,
        now: u64,
        block_millis: u64,
        escalation: Option<&EscalationPolicy>,
    ) -> BlockStart {
        self.violation_count += 1;
        let mut millis = block_millis;
        let mut escalated = false;
        if let Some(escalation) = escalation {
            self.recent_violations.push_back(now);
            evict_log(&mut self.recent_violations, escalation.lookback_millis(), now);
            if self.recent_violations.len() >= escalation.violation_threshold() as usize {
                millis = millis.max(escalation.block_millis());
                escalated = true;
            }
        }
        self.blocked_until = Some(now.saturating_add(millis));
        BlockStart { violations: self.violation_count, millis, escalated }
    }

    /// Append a request; arrival order is kept monotonic even if the clock stalls.
    pub(crate) fn record(&mut self, endpoint: &str, now: u64) {
        let log = self.logs.entry(endpoint.to_owned()).or_default();
        let stamp = log.back().map_or(now, |&last| last.max(now));
        log.push_back(stamp);
    }

    pub(crate) fn violation_count(&self) -> u64 {
        self.violation_count
    }

    pub(crate) fn blocked_until(&self) -> Option<u64> {
        self.blocked_until
    }

    /// Evict every log, stale violation instants and an expired block.
    pub(crate) fn sweep<F>(
        &mut self,
        now: u64,
        resolve: F,
        escalation: Option<&EscalationPolicy>,
    ) -> WindowSweep
    where
        F: Fn(&str) -> RateLimitPolicy,
    {
        let mut report = WindowSweep::default();
        for (endpoint, log) in self.logs.iter_mut() {
            report.evicted += evict_log(log, resolve(endpoint).window_millis(), now);
        }
        self.logs.retain(|_, log| !log.is_empty());
        if let Some(escalation) = escalation {
            evict_log(&mut self.recent_violations, escalation.lookback_millis(), now);
        }

        let had_block = self.blocked_until.is_some();
        report.blocked = self.block_remaining(now).is_some();
        report.block_cleared = had_block && !report.blocked;
        report.active = report.blocked || !self.logs.is_empty();
        report
    }

    /// Usage per endpoint, sorted by endpoint. Does not mutate the logs.
    pub(crate) fn usage<F>(&self, now: u64, resolve: F) -> Vec<EndpointUsage>
    where
        F: Fn(&str) -> RateLimitPolicy,
    {
        let mut usage: Vec<EndpointUsage> = self
            .logs
            .iter()
            .map(|(endpoint, log)| {
                let policy = resolve(endpoint);
                let window = policy.window_millis();
                let current = log.iter().filter(|&&t| t.saturating_add(window) > now).count();
                let current = u32::try_from(current).unwrap_or(u32::MAX);
                EndpointUsage {
                    endpoint: endpoint.clone(),
                    current_requests: current,
                    max_requests: policy.max_requests(),
                    window_secs: policy.window_secs(),
                    remaining: policy.max_requests().saturating_sub(current),
                }
            })
            .collect();
        usage.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        usage
    }
}

/// Pop expired entries from the front; `t` is expired once `t + window <= now`.
fn evict_log(log: &mut VecDeque<u64>, window: u64, now: u64) -> usize {
    let mut evicted = 0;
    while let Some(&oldest) = log.front() {
        if oldest.saturating_add(window) > now {
            break;
        }
        log.pop_front();
        evicted += 1;
    }
    evicted
}
