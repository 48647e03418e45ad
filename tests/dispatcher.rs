use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use annotation_harness::Dispatcher;
use futures::future::join_all;

#[tokio::test]
async fn concurrency_never_exceeds_max_inflight() {
    for (tasks, k) in [(50usize, 1usize), (50, 4), (7, 12), (100, 12)] {
        let dispatcher = Dispatcher::new(k);
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let (running, peak) = (&running, &peak);
        let results = join_all((0..tasks).map(|i| {
            dispatcher.submit(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok::<usize, ()>(i)
            })
        }))
        .await;

        assert_eq!(results.len(), tasks);
        assert!(results.iter().all(|r| r.is_ok()));
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= k, "peak {peak} exceeded bound {k}");
        assert!(peak >= 1);
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(dispatcher.queued(), 0);
    }
}

#[tokio::test]
async fn single_slot_admits_in_submission_order() {
    let dispatcher = Dispatcher::new(1);
    let order = Mutex::new(Vec::new());
    let log = &order;

    join_all((0..10).map(|i| {
        dispatcher.submit(move || async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            log.lock().unwrap().push(i);
            Ok::<(), ()>(())
        })
    }))
    .await;

    assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn failures_reach_only_their_own_caller() {
    let dispatcher = Arc::new(Dispatcher::new(2));

    let results = join_all((0..6).map(|i| {
        dispatcher.submit(move || async move {
            if i == 3 {
                Err(format!("unit {i} failed"))
            } else {
                Ok(i)
            }
        })
    }))
    .await;

    for (i, result) in results.into_iter().enumerate() {
        if i == 3 {
            assert_eq!(result.unwrap_err(), "unit 3 failed");
        } else {
            assert_eq!(result.unwrap(), i);
        }
    }
    assert_eq!(dispatcher.in_flight(), 0);
}
