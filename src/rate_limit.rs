//! Sliding-window rate limiting.
//!
//! - [`SlidingWindowLimiter`]: per-actor timestamp logs checked against the
//!   policy registered for each endpoint.
//! - [`LimitOutcome`]: result of a single check.
//! - [`EndpointUsage`]: read-only per-endpoint view of an actor's window.
//!
//! The window is sliding rather than bucketed: each check counts the requests
//! in the trailing `(now - window, now]` interval, so there is no burst at a
//! bucket boundary.

use std::time::Duration;

pub mod sliding;
pub(crate) mod window;

pub use sliding::{LimiterSweep, SlidingWindowLimiter};

/// The decision returned by the sliding-window limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitOutcome {
    /// The request was recorded.
    Allowed {
        /// Slots left in the current window after this request.
        remaining: u32,
    },
    /// The actor is serving an earlier block; the request was not recorded.
    Blocked {
        /// Time until the block expires.
        retry_after: Duration,
    },
    /// This request exceeded the quota and started a new block.
    Exceeded {
        /// Length of the block just started.
        retry_after: Duration,
        /// Actor's violation count including this one.
        violations: u64,
        /// The block was lengthened by the escalation policy.
        escalated: bool,
    },
}

impl LimitOutcome {
    /// Helper to check if allowed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, LimitOutcome::Allowed { .. })
    }

    /// How long the caller should wait, for denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LimitOutcome::Allowed { .. } => None,
            LimitOutcome::Blocked { retry_after } | LimitOutcome::Exceeded { retry_after, .. } => {
                Some(*retry_after)
            }
        }
    }
}

/// Usage of one endpoint by one actor at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EndpointUsage {
    /// Endpoint category.
    pub endpoint: String,
    /// Requests inside the trailing window.
    pub current_requests: u32,
    /// Quota for the endpoint.
    pub max_requests: u32,
    /// Window length in seconds.
    pub window_secs: u64,
    /// Slots left before the quota trips.
    pub remaining: u32,
}
