use gatehouse::{ActorId, AdmissionController, ManualClock, RateLimitPolicy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn concurrent_checks_never_exceed_the_quota() {
    let controller = AdmissionController::builder()
        .policy("cart", RateLimitPolicy::new(15, 60, 60).unwrap())
        .clock(ManualClock::new())
        .build();
    let admitted = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            let admitted = admitted.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    if controller.check("shared", "cart").allowed() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        controller.report_outcome("shared", true);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(admitted.load(Ordering::SeqCst), 15);
    assert_eq!(controller.violation_count("shared"), 1, "retries while blocked are not violations");
}

#[test]
fn distinct_actors_each_get_their_own_quota() {
    let controller = AdmissionController::builder()
        .policy("menu", RateLimitPolicy::new(3, 60, 60).unwrap())
        .clock(ManualClock::new())
        .build();

    let handles: Vec<_> = (0..16u64)
        .map(|n| {
            let controller = controller.clone();
            thread::spawn(move || {
                let actor = ActorId::from(n);
                (0..10).filter(|_| controller.check(&actor, "menu").allowed()).count()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 3);
    }
    assert_eq!(controller.sweep().tracked_actors, 16);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn tasks_share_one_controller() {
    let controller = AdmissionController::builder()
        .policy("order", RateLimitPolicy::new(3, 300, 60).unwrap())
        .clock(ManualClock::new())
        .build();

    let tasks: Vec<_> = (0..32u64)
        .map(|i| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.check(i % 4, "order").allowed() })
        })
        .collect();

    let mut admitted = 0;
    for task in tasks {
        if task.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 12);
    assert_eq!(controller.sweep().blocked_actors, 4);
}
