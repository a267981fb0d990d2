use gatehouse::telemetry::{AdmissionEvent, MemorySink};
use gatehouse::{
    ActorId, AdmissionController, AdmissionError, AdmissionLayer, AdmissionRequest,
    CircuitBreakerConfig, CircuitState, ManualClock, RateLimitPolicy,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::{service_fn, Layer, ServiceBuilder, ServiceExt};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TestError(&'static str);

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TestError {}

struct Update {
    chat_id: i64,
    command: &'static str,
}

impl AdmissionRequest for Update {
    fn actor(&self) -> ActorId {
        self.chat_id.into()
    }

    fn endpoint(&self) -> &str {
        self.command
    }
}

fn update(chat_id: i64, command: &'static str) -> Update {
    Update { chat_id, command }
}

#[tokio::test]
async fn layer_composes_with_service_builder() {
    let controller = AdmissionController::builder()
        .policy("order", RateLimitPolicy::new(2, 300, 60).unwrap())
        .clock(ManualClock::new())
        .build();
    let handled = Arc::new(AtomicUsize::new(0));
    let counter = handled.clone();

    let svc = ServiceBuilder::new().layer(AdmissionLayer::new(controller.clone())).service_fn(
        move |u: Update| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(u.command)
            }
        },
    );

    for _ in 0..2 {
        assert_eq!(svc.clone().oneshot(update(1, "order")).await.unwrap(), "order");
    }
    let err = svc.clone().oneshot(update(1, "order")).await.unwrap_err();
    assert!(err.is_rate_limited());
    assert!(err.to_string().contains("retry after 60s"));

    // Another chat is unaffected.
    assert_eq!(svc.oneshot(update(2, "order")).await.unwrap(), "order");
    assert_eq!(handled.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn breaker_recovers_through_the_layer() {
    let clock = ManualClock::new();
    let sink = MemorySink::new();
    let controller = AdmissionController::builder()
        .breaker(CircuitBreakerConfig::new(2, Duration::from_secs(10), 1).unwrap())
        .clock(clock.clone())
        .telemetry(sink.clone())
        .build();
    let healthy = Arc::new(AtomicUsize::new(0));
    let flag = healthy.clone();

    let svc = AdmissionLayer::new(controller.clone()).layer(service_fn(move |u: Update| {
        let ok = flag.load(Ordering::SeqCst) == 1;
        async move {
            if ok {
                Ok(u.chat_id)
            } else {
                Err(TestError("downstream unavailable"))
            }
        }
    }));

    for _ in 0..2 {
        let err = svc.clone().oneshot(update(7, "menu")).await.unwrap_err();
        assert_eq!(err, AdmissionError::Inner(TestError("downstream unavailable")));
    }
    assert_eq!(controller.breaker_state(7i64), CircuitState::Open);
    assert!(svc.clone().oneshot(update(7, "menu")).await.unwrap_err().is_circuit_open());

    healthy.store(1, Ordering::SeqCst);
    clock.advance(Duration::from_secs(11));
    assert_eq!(svc.clone().oneshot(update(7, "menu")).await.unwrap(), 7);
    assert_eq!(controller.breaker_state(7i64), CircuitState::Closed);

    let transitions: Vec<_> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            AdmissionEvent::CircuitBreaker { event, .. } => Some(event.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(transitions, vec!["Opened(failures=2)", "HalfOpen", "Closed"]);
}
