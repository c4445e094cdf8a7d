use core_metadata::{QueueError, RequestQueue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn never_exceeds_configured_concurrency() {
    const N: usize = 5;
    const M: usize = 50;

    let queue = Arc::new(RequestQueue::new(N, 5));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..M)
        .map(|i| {
            let queue = Arc::clone(&queue);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        i
                    })
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        handle.await.unwrap().unwrap();
        completed += 1;
    }

    assert_eq!(completed, M);
    assert!(peak.load(Ordering::SeqCst) <= N);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_fails_queued_and_waits_for_running() {
    let queue = Arc::new(RequestQueue::new(1, 4));
    let release = Arc::new(Notify::new());
    let finished = Arc::new(AtomicUsize::new(0));

    let running = {
        let queue = Arc::clone(&queue);
        let release = Arc::clone(&release);
        let finished = Arc::clone(&finished);
        tokio::spawn(async move {
            queue
                .submit(async move {
                    release.notified().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    "done"
                })
                .await
        })
    };
    while queue.in_flight() < 1 {
        tokio::task::yield_now().await;
    }

    let waiting: Vec<_> = (0..3)
        .map(|_| {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.submit(async { "never" }).await })
        })
        .collect();
    while queue.queued() < 3 {
        tokio::task::yield_now().await;
    }

    let shutdown = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.shutdown().await })
    };

    // Queued submissions fail right away, before the running task ends.
    for handle in waiting {
        assert_eq!(handle.await.unwrap(), Err(QueueError::Shutdown));
    }
    assert!(!shutdown.is_finished());
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    release.notify_one();
    shutdown.await.unwrap();

    assert_eq!(running.await.unwrap(), Ok("done"));
    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(
        queue.submit(async { "late" }).await,
        Err(QueueError::Shutdown)
    );
}
