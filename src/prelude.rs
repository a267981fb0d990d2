//! Convenient re-exports for common Gatehouse types.
pub use crate::{
    actor::ActorId,
    admission::{AdmissionController, AdmissionDecision, Denial},
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    config::AdmissionConfig,
    error::AdmissionError,
    maintenance::{MaintenanceHandle, MaintenanceTask},
    middleware::{AdmissionLayer, AdmissionRequest},
    policy::RateLimitPolicy,
    presets,
    telemetry::{AdmissionEvent, LogSink, MemorySink, NullSink, TelemetrySink},
};
