//! # Bounded Request Queue
//!
//! Dispatcher placed in front of every outbound provider call.
//!
//! At most `max_concurrent` submissions run at once. Up to `max_queued` more
//! may wait for a slot; submissions beyond that wait for admission. Both
//! waits are first-in-first-out.
//!
//! [`RequestQueue::shutdown`] stops admission, fails every waiting submission
//! with [`QueueError::Shutdown`] and then waits for running tasks to finish.

use crate::error::QueueError;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_CONCURRENT: usize = 5;
pub const DEFAULT_MAX_QUEUED: usize = 5;

pub struct RequestQueue {
    slots: Arc<Semaphore>,
    admission: Arc<Semaphore>,
    tracker: TaskTracker,
    in_flight: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
    max_concurrent: usize,
    max_queued: usize,
}

/// Decrements a gauge when dropped, including on cancellation.
struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(gauge))
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RequestQueue {
    /// Create a queue. A `max_concurrent` of zero is raised to one.
    pub fn new(max_concurrent: usize, max_queued: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            slots: Arc::new(Semaphore::new(max_concurrent)),
            admission: Arc::new(Semaphore::new(max_concurrent + max_queued)),
            tracker: TaskTracker::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
            max_concurrent,
            max_queued,
        }
    }

    /// Run `task` once a slot is free.
    ///
    /// The task runs on the caller's task; dropping the returned future
    /// releases its place in the queue.
    ///
    /// # Errors
    ///
    /// - `QueueError::Shutdown` if the queue is shut down before the task starts
    /// - `QueueError::TaskPanicked` if the task panics
    pub async fn submit<F, T>(&self, task: F) -> Result<T, QueueError>
    where
        F: Future<Output = T>,
    {
        let _admitted = Arc::clone(&self.admission)
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Shutdown)?;

        let slot = {
            let _waiting = GaugeGuard::enter(&self.queued);
            Arc::clone(&self.slots)
                .acquire_owned()
                .await
                .map_err(|_| {
                    debug!("Queued request dropped by shutdown");
                    QueueError::Shutdown
                })?
        };

        let _running = GaugeGuard::enter(&self.in_flight);
        let result = self
            .tracker
            .track_future(AssertUnwindSafe(task).catch_unwind())
            .await;
        drop(slot);

        result.map_err(|_| {
            warn!("Queued task panicked");
            QueueError::TaskPanicked
        })
    }

    /// Stop admission, fail waiting submissions, then wait for running tasks.
    pub async fn shutdown(&self) {
        if self.is_shutdown() {
            self.tracker.wait().await;
            return;
        }

        info!(
            in_flight = self.in_flight(),
            queued = self.queued(),
            "Shutting down request queue"
        );
        self.admission.close();
        self.slots.close();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Request queue drained");
    }

    pub fn is_shutdown(&self) -> bool {
        self.admission.is_closed()
    }

    /// Tasks currently executing
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Admitted submissions waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_queued(&self) -> usize {
        self.max_queued
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_QUEUED)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("max_concurrent", &self.max_concurrent)
            .field("max_queued", &self.max_queued)
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::{oneshot, Mutex};

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        while !condition() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_submit_returns_task_output() {
        let queue = RequestQueue::new(2, 2);
        assert_eq!(queue.submit(async { 40 + 2 }).await, Ok(42));
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.queued(), 0);
    }

    #[tokio::test]
    async fn test_zero_concurrency_is_raised_to_one() {
        let queue = RequestQueue::new(0, 0);
        assert_eq!(queue.max_concurrent(), 1);
        assert_eq!(queue.submit(async { "ok" }).await, Ok("ok"));
    }

    #[tokio::test]
    async fn test_waiting_submissions_run_in_fifo_order() {
        let queue = Arc::new(RequestQueue::new(1, 8));
        let order = Arc::new(Mutex::new(Vec::new()));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        wait_until(|| queue.in_flight() == 1).await;

        let mut handles = Vec::new();
        for i in 0..5 {
            let queue_for_task = Arc::clone(&queue);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                queue_for_task
                    .submit(async move { order.lock().await.push(i) })
                    .await
            }));
            wait_until(|| queue.queued() == i + 1).await;
        }

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_panicking_task_is_reported() {
        let queue = RequestQueue::new(1, 1);
        let result = queue
            .submit(async {
                if true {
                    panic!("provider bug");
                }
            })
            .await;
        assert_eq!(result, Err(QueueError::TaskPanicked));

        // The slot is released.
        assert_eq!(queue.submit(async { 1 }).await, Ok(1));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_fails() {
        let queue = RequestQueue::new(2, 2);
        queue.shutdown().await;
        assert!(queue.is_shutdown());
        assert_eq!(queue.submit(async { 1 }).await, Err(QueueError::Shutdown));
    }

    #[tokio::test]
    async fn test_dropped_submission_releases_queue_position() {
        let queue = Arc::new(RequestQueue::new(1, 1));
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let blocker = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        wait_until(|| queue.in_flight() == 1).await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), queue.submit(async { 1 })).await;
        assert!(waiting.is_err());
        assert_eq!(queue.queued(), 0);

        release_tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        assert_eq!(queue.submit(async { 2 }).await, Ok(2));
    }
}
