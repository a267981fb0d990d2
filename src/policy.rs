//! Rate-limit policies attached to endpoint categories.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Errors produced when validating a policy.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    /// `max_requests` must be > 0.
    #[error("max_requests must be > 0 (got {provided})")]
    InvalidMaxRequests {
        /// Value provided by caller.
        provided: u32,
    },
    /// `window_secs` must be > 0.
    #[error("window_secs must be > 0 (got {provided})")]
    InvalidWindow {
        /// Value provided by caller.
        provided: u64,
    },
    /// `block_duration_secs` must be > 0.
    #[error("block_duration_secs must be > 0 (got {provided})")]
    InvalidBlockDuration {
        /// Value provided by caller.
        provided: u64,
    },
    /// `violation_threshold` must be > 0.
    #[error("violation_threshold must be > 0 (got {provided})")]
    InvalidViolationThreshold {
        /// Value provided by caller.
        provided: u32,
    },
    /// `lookback_secs` must be > 0.
    #[error("lookback_secs must be > 0 (got {provided})")]
    InvalidLookback {
        /// Value provided by caller.
        provided: u64,
    },
}

/// Quota for one endpoint category: at most `max_requests` within any trailing
/// `window_secs`, after which the actor is blocked for `block_duration_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy")]
pub struct RateLimitPolicy {
    max_requests: u32,
    window_secs: u64,
    block_duration_secs: u64,
}

#[derive(Deserialize)]
struct RawPolicy {
    max_requests: u32,
    window_secs: u64,
    block_duration_secs: u64,
}

impl TryFrom<RawPolicy> for RateLimitPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        Self::new(raw.max_requests, raw.window_secs, raw.block_duration_secs)
    }
}

impl Default for RateLimitPolicy {
    /// 10 requests per 60 seconds, 60 second block.
    fn default() -> Self {
        Self { max_requests: 10, window_secs: 60, block_duration_secs: 60 }
    }
}

impl RateLimitPolicy {
    /// Create a policy, rejecting zero values.
    ///
    /// # Examples
    /// ```
    /// use gatehouse::RateLimitPolicy;
    /// let policy = RateLimitPolicy::new(3, 10, 5).unwrap();
    /// assert_eq!(policy.max_requests(), 3);
    /// assert!(RateLimitPolicy::new(0, 10, 5).is_err());
    /// ```
    pub fn new(
        max_requests: u32,
        window_secs: u64,
        block_duration_secs: u64,
    ) -> Result<Self, PolicyError> {
        if max_requests == 0 {
            return Err(PolicyError::InvalidMaxRequests { provided: max_requests });
        }
        if window_secs == 0 {
            return Err(PolicyError::InvalidWindow { provided: window_secs });
        }
        if block_duration_secs == 0 {
            return Err(PolicyError::InvalidBlockDuration { provided: block_duration_secs });
        }
        Ok(Self { max_requests, window_secs, block_duration_secs })
    }

    /// Unchecked constructor for compile-time presets; every caller passes non-zero values.
    pub(crate) const fn preset(max_requests: u32, window_secs: u64, block_duration_secs: u64) -> Self {
        Self { max_requests, window_secs, block_duration_secs }
    }

    /// Requests allowed per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Window length in whole seconds.
    pub fn window_secs(&self) -> u64 {
        self.window_secs
    }

    /// Block length in whole seconds.
    pub fn block_duration_secs(&self) -> u64 {
        self.block_duration_secs
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    pub(crate) fn window_millis(&self) -> u64 {
        self.window_secs.saturating_mul(1_000)
    }

    pub(crate) fn block_millis(&self) -> u64 {
        self.block_duration_secs.saturating_mul(1_000)
    }
}

/// Escalation for repeat offenders: an actor that trips its quota
/// `violation_threshold` times within `lookback_secs` is blocked for
/// `block_duration_secs` instead of the endpoint's own block.
///
/// The longer of the two blocks always wins.
///
/// # Examples
/// ```
/// use gatehouse::EscalationPolicy;
/// let escalation = EscalationPolicy::default();
/// assert_eq!(escalation.violation_threshold(), 5);
/// assert_eq!(escalation.lookback_secs(), 300);
/// assert_eq!(escalation.block_duration_secs(), 3_600);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawEscalation")]
pub struct EscalationPolicy {
    violation_threshold: u32,
    lookback_secs: u64,
    block_duration_secs: u64,
}

#[derive(Deserialize)]
struct RawEscalation {
    violation_threshold: u32,
    lookback_secs: u64,
    block_duration_secs: u64,
}

impl TryFrom<RawEscalation> for EscalationPolicy {
    type Error = PolicyError;

    fn try_from(raw: RawEscalation) -> Result<Self, Self::Error> {
        Self::new(raw.violation_threshold, raw.lookback_secs, raw.block_duration_secs)
    }
}

impl Default for EscalationPolicy {
    /// Five violations within five minutes, one hour block.
    fn default() -> Self {
        Self { violation_threshold: 5, lookback_secs: 300, block_duration_secs: 3_600 }
    }
}

impl EscalationPolicy {
    pub fn new(
        violation_threshold: u32,
        lookback_secs: u64,
        block_duration_secs: u64,
    ) -> Result<Self, PolicyError> {
        if violation_threshold == 0 {
            return Err(PolicyError::InvalidViolationThreshold { provided: violation_threshold });
        }
        if lookback_secs == 0 {
            return Err(PolicyError::InvalidLookback { provided: lookback_secs });
        }
        if block_duration_secs == 0 {
            return Err(PolicyError::InvalidBlockDuration { provided: block_duration_secs });
        }
        Ok(Self { violation_threshold, lookback_secs, block_duration_secs })
    }

    /// Violations inside the lookback that trigger the escalated block.
    pub fn violation_threshold(&self) -> u32 {
        self.violation_threshold
    }

    pub fn lookback_secs(&self) -> u64 {
        self.lookback_secs
    }

    pub fn block_duration_secs(&self) -> u64 {
        self.block_duration_secs
    }

    pub(crate) fn lookback_millis(&self) -> u64 {
        self.lookback_secs.saturating_mul(1_000)
    }

    pub(crate) fn block_millis(&self) -> u64 {
        self.block_duration_secs.saturating_mul(1_000)
    }
}
