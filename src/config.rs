//! Host-supplied configuration.
//!
//! The host decides where values come from (environment, files); this module
//! only defines the shape, the defaults and the validation. JSON is supported
//! directly:
//!
//! ```rust
//! use gatehouse::{AdmissionConfig, AdmissionController};
//!
//! let config = AdmissionConfig::from_json_str(r#"{
//!     "failure_threshold": 3,
//!     "endpoints": {
//!         "order": { "max_requests": 3, "window_secs": 300, "block_duration_secs": 60 }
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(config.breaker_timeout_secs, 60);
//! let controller = AdmissionController::from_config(&config).unwrap();
//! assert_eq!(controller.policy("order").window_secs(), 300);
//! ```

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError};
use crate::policy::{EscalationPolicy, RateLimitPolicy};
use crate::presets;

/// Errors produced while loading or validating configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// The document could not be parsed (including invalid policies).
    #[error("invalid admission config: {0}")]
    Parse(#[from] serde_json::Error),
    /// Breaker settings were rejected.
    #[error("invalid breaker settings: {0}")]
    Breaker(#[from] CircuitBreakerError),
    /// The sweep interval must be > 0.
    #[error("sweep_interval_secs must be > 0")]
    InvalidSweepInterval,
    /// Endpoint names must be non-empty.
    #[error("endpoint names must not be empty")]
    EmptyEndpoint,
}

/// Construction-time settings for an [`AdmissionController`](crate::AdmissionController).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdmissionConfig {
    /// Policy for endpoints without their own entry.
    pub default_policy: RateLimitPolicy,
    /// Consecutive failures that open an actor's breaker.
    pub failure_threshold: usize,
    /// Seconds since the last failure before an open breaker admits probes.
    pub breaker_timeout_secs: u64,
    /// Half-open probes in flight, and successes needed to close.
    pub half_open_max_calls: usize,
    /// Period of the maintenance sweep.
    pub sweep_interval_secs: u64,
    /// Endpoint → policy.
    pub endpoints: BTreeMap<String, RateLimitPolicy>,
    /// Longer blocks for repeat offenders; off when absent.
    pub escalation: Option<EscalationPolicy>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            default_policy: RateLimitPolicy::default(),
            failure_threshold: 5,
            breaker_timeout_secs: 60,
            half_open_max_calls: 5,
            sweep_interval_secs: 30,
            endpoints: BTreeMap::new(),
            escalation: None,
        }
    }
}

impl AdmissionConfig {
    /// Defaults plus the [`presets::chat_bot`] endpoint table, with the default
    /// [`EscalationPolicy`] switched on.
    pub fn chat_bot() -> Self {
        let mut config = Self { escalation: Some(EscalationPolicy::default()), ..Self::default() };
        for (endpoint, policy) in presets::chat_bot() {
            config.endpoints.insert(endpoint.to_owned(), policy);
        }
        config
    }

    /// Parse and validate a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Add or replace one endpoint policy.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>, policy: RateLimitPolicy) -> Self {
        self.endpoints.insert(endpoint.into(), policy);
        self
    }

    /// Check every field; policies are already validated when constructed.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.breaker_config()?;
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidSweepInterval);
        }
        if self.endpoints.keys().any(|k| k.trim().is_empty()) {
            return Err(ConfigError::EmptyEndpoint);
        }
        Ok(())
    }

    /// Breaker settings as a validated config.
    pub fn breaker_config(&self) -> Result<CircuitBreakerConfig, CircuitBreakerError> {
        CircuitBreakerConfig::new(
            self.failure_threshold,
            Duration::from_secs(self.breaker_timeout_secs),
            self.half_open_max_calls,
        )
    }

    /// Period for [`MaintenanceTask::spawn_from_config`](crate::MaintenanceTask::spawn_from_config).
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
