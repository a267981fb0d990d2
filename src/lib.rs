#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Gatehouse
//!
//! Per-actor admission control for request handlers: a sliding-window rate
//! limiter per endpoint category, behind a circuit breaker per actor.
//!
//! ## Features
//!
//! - **Sliding-window rate limiting** with per-endpoint policies and blocking
//! - **Per-actor circuit breakers** with half-open probe recovery
//! - **Admission controller** combining both, cheapest check first
//! - **Maintenance sweep** and lock-free stats snapshot
//! - **Tower middleware** and pluggable telemetry sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use gatehouse::{presets, AdmissionController};
//!
//! let controller = AdmissionController::builder().policies(presets::chat_bot()).build();
//!
//! let decision = controller.check(42u64, "order");
//! if decision.allowed() {
//!     // run the handler, then report how it went
//!     controller.report_outcome(42u64, true);
//! } else {
//!     println!("{}", decision.reason().unwrap_or_default());
//! }
//! ```
//!
//! Every time-dependent operation has an `_at` variant taking milliseconds on
//! the controller's [`Clock`](clock::Clock), and tests can inject a
//! [`ManualClock`](clock::ManualClock).

pub mod actor;
pub mod admission;
pub mod circuit_breaker;
pub mod circuit_breaker_registry;
pub mod clock;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod middleware;
pub mod policy;
pub mod policy_registry;
pub mod prelude;
pub mod presets;
pub mod rate_limit;
pub mod telemetry;

// Re-exports
pub use actor::ActorId;
pub use admission::{AdmissionController, AdmissionControllerBuilder, AdmissionDecision, Denial};
pub use circuit_breaker::{
    BreakerSnapshot, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerError,
    CircuitState, ProbeTicket,
};
pub use circuit_breaker_registry::{BreakerStateCounts, CircuitBreakerRegistry};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{AdmissionConfig, ConfigError};
pub use error::AdmissionError;
pub use maintenance::{AdmissionStats, MaintenanceHandle, MaintenanceTask, SweepReport};
pub use middleware::{AdmissionLayer, AdmissionRequest, AdmissionService};
pub use policy::{EscalationPolicy, PolicyError, RateLimitPolicy};
pub use policy_registry::PolicyRegistry;
pub use rate_limit::{EndpointUsage, LimitOutcome, LimiterSweep, SlidingWindowLimiter};
