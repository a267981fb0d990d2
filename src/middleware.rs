//! Tower middleware that runs every request through an [`AdmissionController`].
//!
//! The decision is taken synchronously inside `call`, so a denied request never
//! reaches the inner service. Admitted requests report their outcome when the
//! inner future completes: `Ok` counts as a success, `Err` as a failure. If the
//! response future is dropped before completing, no outcome is reported and
//! any half-open slot the request held is given back.
//!
//! ```rust
//! use gatehouse::{ActorId, AdmissionController, AdmissionLayer, AdmissionRequest};
//! use tower::{service_fn, Layer, ServiceExt};
//!
//! struct Message { user: u64, text: String }
//!
//! impl AdmissionRequest for Message {
//!     fn actor(&self) -> ActorId { self.user.into() }
//!     fn endpoint(&self) -> &str { "general" }
//! }
//!
//! # futures::executor::block_on(async {
//! let svc = AdmissionLayer::new(AdmissionController::default())
//!     .layer(service_fn(|m: Message| async move { Ok::<_, std::io::Error>(m.text.len()) }));
//! let len = svc.oneshot(Message { user: 7, text: "hi".into() }).await.unwrap();
//! assert_eq!(len, 2);
//! # });
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future;
use tower_layer::Layer;
use tower_service::Service;

use crate::actor::ActorId;
use crate::admission::{AdmissionController, AdmissionDecision};
use crate::error::AdmissionError;

/// Requests that can be attributed to an actor and an endpoint category.
pub trait AdmissionRequest {
    /// Who is making the request.
    fn actor(&self) -> ActorId;
    /// Endpoint category used to pick the rate-limit policy.
    fn endpoint(&self) -> &str;
}

/// Layer applying an [`AdmissionController`] to a service.
#[derive(Clone, Debug)]
pub struct AdmissionLayer {
    controller: AdmissionController,
}

impl AdmissionLayer {
    pub fn new(controller: AdmissionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &AdmissionController {
        &self.controller
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, service: S) -> Self::Service {
        AdmissionService { inner: service, controller: self.controller.clone() }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone, Debug)]
pub struct AdmissionService<S> {
    inner: S,
    controller: AdmissionController,
}

impl<S, Req> Service<Req> for AdmissionService<S>
where
    S: Service<Req>,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    Req: AdmissionRequest,
{
    type Response = S::Response;
    type Error = AdmissionError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(AdmissionError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let actor = req.actor();
        let decision = self.controller.check(actor.clone(), req.endpoint());
        if let Some(denial) = decision.denial() {
            return Box::pin(future::ready(Err(AdmissionError::Denied(denial))));
        }

        let mut guard =
            OutcomeGuard { controller: self.controller.clone(), actor: Some(actor), decision };
        let fut = self.inner.call(req);
        Box::pin(async move {
            let result = fut.await;
            guard.finish(result.is_ok());
            result.map_err(AdmissionError::Inner)
        })
    }
}

/// Reports the outcome once, or releases the request if dropped first.
struct OutcomeGuard {
    controller: AdmissionController,
    actor: Option<ActorId>,
    decision: AdmissionDecision,
}

impl OutcomeGuard {
    fn finish(&mut self, succeeded: bool) {
        if let Some(actor) = self.actor.take() {
            self.controller.report_outcome(actor, succeeded);
        }
    }
}

impl Drop for OutcomeGuard {
    fn drop(&mut self) {
        if let Some(actor) = self.actor.take() {
            self.controller.release(actor, &self.decision);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    use crate::clock::ManualClock;
    use crate::policy::RateLimitPolicy;
    use std::time::Duration;
    use tower::{service_fn, ServiceExt};

    #[derive(Debug)]
    struct Req {
        actor: &'static str,
        fail: bool,
    }

    impl AdmissionRequest for Req {
        fn actor(&self) -> ActorId {
            self.actor.into()
        }
        fn endpoint(&self) -> &str {
            "menu"
        }
    }

    fn controller() -> AdmissionController {
        AdmissionController::builder()
            .policy("menu", RateLimitPolicy::new(2, 60, 60).unwrap())
            .breaker(CircuitBreakerConfig::new(2, Duration::from_secs(30), 1).unwrap())
            .clock(ManualClock::new())
            .build()
    }

    async fn handle(req: Req) -> Result<&'static str, std::io::Error> {
        if req.fail {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "downstream"))
        } else {
            Ok("ok")
        }
    }

    #[tokio::test]
    async fn denied_requests_never_reach_the_inner_service() {
        let controller = controller();
        let svc = AdmissionLayer::new(controller.clone()).layer(service_fn(handle));
        assert_eq!(svc.clone().oneshot(Req { actor: "u1", fail: false }).await.unwrap(), "ok");
        assert_eq!(svc.clone().oneshot(Req { actor: "u1", fail: false }).await.unwrap(), "ok");

        let err = svc.oneshot(Req { actor: "u1", fail: false }).await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn inner_failures_feed_the_breaker() {
        let controller = controller();
        let svc = AdmissionLayer::new(controller.clone()).layer(service_fn(handle));
        for _ in 0..2 {
            let err = svc.clone().oneshot(Req { actor: "u2", fail: true }).await.unwrap_err();
            assert!(!err.is_denied());
        }
        assert_eq!(controller.breaker_state("u2"), CircuitState::Open);

        let err = svc.oneshot(Req { actor: "u2", fail: false }).await.unwrap_err();
        assert!(err.is_circuit_open());
    }

    #[tokio::test]
    async fn dropped_future_releases_the_probe() {
        let clock = ManualClock::new();
        let controller = AdmissionController::builder()
            .breaker(CircuitBreakerConfig::new(1, Duration::from_secs(1), 1).unwrap())
            .clock(clock.clone())
            .build();
        controller.report_outcome("u3", false);
        clock.advance(Duration::from_millis(1_001));

        let mut svc = AdmissionLayer::new(controller.clone())
            .layer(service_fn(|_: Req| future::pending::<Result<(), std::io::Error>>()));
        let ready = ServiceExt::<Req>::ready(&mut svc).await.unwrap();
        let fut = ready.call(Req { actor: "u3", fail: false });
        assert_eq!(controller.breaker_snapshot("u3").half_open_in_flight, 1);
        drop(fut);
        assert_eq!(controller.breaker_snapshot("u3").half_open_in_flight, 0);
        assert_eq!(controller.breaker_state("u3"), CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn dropping_a_closed_era_future_keeps_the_half_open_cap() {
        let clock = ManualClock::new();
        let controller = AdmissionController::builder()
            .breaker(CircuitBreakerConfig::new(1, Duration::from_secs(1), 1).unwrap())
            .clock(clock.clone())
            .build();
        let mut svc = AdmissionLayer::new(controller.clone())
            .layer(service_fn(|_: Req| future::pending::<Result<(), std::io::Error>>()));

        // Admitted while Closed, still pending when the breaker trips.
        let ready = ServiceExt::<Req>::ready(&mut svc).await.unwrap();
        let closed_era = ready.call(Req { actor: "u4", fail: false });
        controller.report_outcome("u4", false);
        clock.advance(Duration::from_millis(1_001));

        let ready = ServiceExt::<Req>::ready(&mut svc).await.unwrap();
        let recovering = ready.call(Req { actor: "u4", fail: false });
        assert_eq!(controller.breaker_snapshot("u4").half_open_in_flight, 1);

        drop(closed_era);
        assert_eq!(controller.breaker_snapshot("u4").half_open_in_flight, 1);
        assert_eq!(controller.check("u4", "menu").denial(), Some(crate::Denial::CircuitOpen));
        drop(recovering);
    }
}
