//! Bounded worker pool with caller-runs admission.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

/// Spawns unit tasks on the runtime, at most `concurrency` running at once.
///
/// Admission is bounded by `concurrency * (1 + queue_factor)`: up to
/// `concurrency` tasks execute and the rest wait for a permit. When the
/// bound is reached `try_spawn` hands the future back so the submitter can
/// run it itself.
pub(crate) struct WorkerPool {
    concurrency: usize,
    capacity: usize,
    permits: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl WorkerPool {
    pub(crate) fn new(concurrency: usize, queue_factor: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            concurrency,
            capacity: concurrency.saturating_mul(queue_factor.saturating_add(1)),
            permits: Arc::new(Semaphore::new(concurrency)),
            admitted: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Tasks admitted and not yet finished (queued or running).
    pub(crate) fn admitted(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }

    /// Spawns `fut` if the pool has room, otherwise returns it unchanged.
    pub(crate) fn try_spawn<F>(&self, fut: F) -> Result<JoinHandle<F::Output>, F>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let reserved = self
            .admitted
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            return Err(fut);
        }

        let slot = Slot {
            admitted: Arc::clone(&self.admitted),
            idle: Arc::clone(&self.idle),
        };
        let permits = Arc::clone(&self.permits);
        Ok(tokio::spawn(async move {
            let _slot = slot;
            // The semaphore is never closed, so a failed acquire cannot happen;
            // run the task regardless rather than drop it.
            let _permit = permits.acquire_owned().await.ok();
            fut.await
        }))
    }

    /// Waits until every admitted task has finished.
    pub(crate) async fn drain(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.admitted() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases an admission slot when the task finishes, panics included.
struct Slot {
    admitted: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.admitted.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_try_spawn_rejects_beyond_capacity() {
        let pool = WorkerPool::new(1, 2);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let handle = pool
                .try_spawn(tokio::time::sleep(Duration::from_secs(1)))
                .unwrap_or_else(|_| panic!("pool should have room"));
            handles.push(handle);
        }

        assert!(pool.try_spawn(async {}).is_err());
        assert_eq!(pool.admitted(), 3);

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.admitted(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_running_tasks() {
        let pool = WorkerPool::new(2, 1);
        let finished = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let finished = Arc::clone(&finished);
            let _ = pool.try_spawn(async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }

        pool.drain().await;

        assert_eq!(finished.load(Ordering::SeqCst), 4);
        assert_eq!(pool.admitted(), 0);
    }

    #[tokio::test]
    async fn test_drain_on_idle_pool_returns_immediately() {
        let pool = WorkerPool::new(3, 10);
        pool.drain().await;
        assert_eq!(pool.concurrency(), 3);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_its_slot() {
        let pool = WorkerPool::new(1, 0);
        let handle = pool
            .try_spawn(async { panic!("boom") })
            .unwrap_or_else(|_| panic!("pool should have room"));

        assert!(handle.await.is_err());
        assert_eq!(pool.admitted(), 0);
    }
}
