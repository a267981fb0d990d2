//! Telemetry for admission decisions.
//!
//! The controller reports what it does as [`AdmissionEvent`]s. Events flow into
//! [`TelemetrySink`] implementations, which are plain `tower::Service`s so they
//! compose with standard tower combinators.
//!
//! - **Admission**: `Admitted`, `Denied`
//! - **Circuit breaker**: `Opened`, `HalfOpen`, `Closed`
//! - **Outcomes**: `Outcome` for every `report_outcome`
//! - **Maintenance**: `Swept`
//!
//! ```rust
//! use gatehouse::telemetry::{AdmissionEvent, MemorySink};
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = AdmissionEvent::Admitted { actor: "u1".into(), endpoint: "menu".into() };
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::FutureExt;
use tower::{Service, ServiceExt};

use crate::actor::ActorId;
use crate::admission::Denial;

/// Events emitted by the admission controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionEvent {
    /// A request passed both the breaker and the limiter.
    Admitted {
        /// Requesting actor.
        actor: ActorId,
        /// Endpoint category.
        endpoint: String,
    },
    /// A request was rejected.
    Denied {
        /// Requesting actor.
        actor: ActorId,
        /// Endpoint category.
        endpoint: String,
        /// Why.
        denial: Denial,
    },
    /// An actor's breaker changed state.
    CircuitBreaker {
        /// Actor owning the breaker.
        actor: ActorId,
        /// The transition.
        event: CircuitBreakerEvent,
    },
    /// The caller reported how an admitted request went.
    Outcome {
        /// Requesting actor.
        actor: ActorId,
        /// Whether the downstream handler succeeded.
        succeeded: bool,
    },
    /// A maintenance sweep finished.
    Swept {
        /// Timestamps evicted.
        evicted_timestamps: usize,
        /// Expired blocks cleared.
        cleared_blocks: usize,
        /// Wall time spent sweeping.
        duration: Duration,
    },
}

/// Events emitted by per-actor circuit breakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Breaker opened; the actor is cut off until the recovery timeout passes.
    Opened {
        /// Failures counted when the breaker opened.
        failure_count: usize,
    },
    /// Breaker moved to half-open and is admitting probes.
    HalfOpen,
    /// Breaker closed after enough successful probes.
    Closed,
}

impl fmt::Display for AdmissionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdmissionEvent::Admitted { actor, endpoint } => {
                write!(f, "Admitted(actor={}, endpoint={})", actor, endpoint)
            }
            AdmissionEvent::Denied { actor, endpoint, denial } => {
                write!(f, "Denied(actor={}, endpoint={}, reason={})", actor, endpoint, denial)
            }
            AdmissionEvent::CircuitBreaker { actor, event } => {
                write!(f, "CircuitBreaker::{}(actor={})", event, actor)
            }
            AdmissionEvent::Outcome { actor, succeeded } => {
                write!(f, "Outcome(actor={}, succeeded={})", actor, succeeded)
            }
            AdmissionEvent::Swept { evicted_timestamps, cleared_blocks, duration } => write!(
                f,
                "Swept(evicted={}, cleared_blocks={}, duration={:?})",
                evicted_timestamps, cleared_blocks, duration
            ),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
        }
    }
}

/// A telemetry sink that consumes admission events.
///
/// Sinks are called on the request path, so `call` should do its work
/// synchronously and return a future that is already complete.
pub trait TelemetrySink:
    Service<AdmissionEvent, Response = (), Error = Self::SinkError> + Clone + Send + Sync + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// The sink is polled exactly once: a sink that is not ready, or whose future
/// does not complete immediately, loses the event instead of stalling the caller.
pub fn emit_best_effort<S>(sink: &S, event: AdmissionEvent)
where
    S: Service<AdmissionEvent, Response = ()> + Clone,
{
    let _ = sink.clone().oneshot(event).now_or_never();
}

/// Object-safe view of a sink so the controller does not carry a type parameter.
pub(crate) trait EventEmitter: Send + Sync + fmt::Debug {
    fn emit(&self, event: AdmissionEvent);
}

/// Holds a sink behind the object-safe emitter.
pub(crate) struct SinkEmitter<S>(pub(crate) S);

impl<S> fmt::Debug for SinkEmitter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkEmitter").field("sink", &std::any::type_name::<S>()).finish()
    }
}

impl<S: TelemetrySink> EventEmitter for SinkEmitter<S> {
    fn emit(&self, event: AdmissionEvent) {
        emit_best_effort(&self.0, event);
    }
}

type ReadyFuture = Pin<Box<dyn Future<Output = Result<(), Infallible>> + Send>>;

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<AdmissionEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: AdmissionEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
///
/// Denials and breaker transitions log at WARN, everything else at DEBUG.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<AdmissionEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        match &event {
            AdmissionEvent::Denied { .. } | AdmissionEvent::CircuitBreaker { .. } => {
                tracing::warn!(target: "gatehouse::telemetry", event = %event, "admission_event");
            }
            _ => tracing::debug!(target: "gatehouse::telemetry", event = %event, "admission_event"),
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A telemetry sink that stores events in memory.
///
/// Bounded: the oldest event is evicted once capacity is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<AdmissionEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Creates a bounded memory sink (default cap: 10,000).
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    /// Creates a bounded memory sink with explicit capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns a snapshot of all events received so far.
    pub fn events(&self) -> Vec<AdmissionEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).iter().cloned().collect()
    }

    /// Clears all stored events.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Returns the number of events stored.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true if no events are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of evicted events.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<AdmissionEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = ReadyFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: AdmissionEvent) -> Self::Future {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.len() >= self.capacity {
            guard.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        guard.push_back(event);
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}
