//! Bounded worker pool for CPU-bound extraction work.
//!
//! PDF scanning, image header parsing, and hashing are CPU-bound; running
//! them inline would stall the async reactor. The pool runs such jobs on
//! blocking threads behind a semaphore with a bounded admission queue:
//! `slots` jobs run concurrently, up to `queue` more wait, and anything
//! beyond that is refused with [`PoolError::QueueFull`], which callers
//! surface as `server-busy`.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::sync::Semaphore;

/// Pool admission failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker queue is full")]
    QueueFull,
    #[error("worker task aborted")]
    Aborted,
}

/// Bounded CPU-bound worker pool.
pub struct CpuPool {
    semaphore: Arc<Semaphore>,
    admitted: AtomicUsize,
    max_admitted: usize,
}

impl CpuPool {
    /// `slots` concurrent jobs, `queue` additional waiters.
    pub fn new(slots: usize, queue: usize) -> Self {
        let slots = slots.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            admitted: AtomicUsize::new(0),
            max_admitted: slots + queue,
        }
    }

    /// Runs `f` on a blocking thread once a slot frees up.
    ///
    /// Admission is non-blocking: a saturated queue refuses immediately
    /// rather than parking the caller.
    pub async fn run<F, T>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let admitted = self.admitted.fetch_add(1, Ordering::SeqCst);
        if admitted >= self.max_admitted {
            self.admitted.fetch_sub(1, Ordering::SeqCst);
            return Err(PoolError::QueueFull);
        }

        let result = async {
            let permit = self
                .semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Aborted)?;

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                f()
            })
            .await
            .map_err(|_| PoolError::Aborted)
        }
        .await;

        self.admitted.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Jobs currently running or queued.
    pub fn in_flight(&self) -> usize {
        self.admitted.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_and_return() {
        let pool = CpuPool::new(2, 2);
        let out = pool.run(|| 40 + 2).await.unwrap();
        assert_eq!(out, 42);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn saturated_queue_refuses() {
        let pool = Arc::new(CpuPool::new(1, 1));

        // Occupy the slot and the single queue position.
        let p1 = pool.clone();
        let busy1 = tokio::spawn(async move {
            p1.run(|| std::thread::sleep(Duration::from_millis(200)))
                .await
        });
        let p2 = pool.clone();
        let busy2 = tokio::spawn(async move {
            p2.run(|| std::thread::sleep(Duration::from_millis(200)))
                .await
        });

        // Give the spawned jobs time to be admitted.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let refused = pool.run(|| ()).await;
        assert_eq!(refused.unwrap_err(), PoolError::QueueFull);

        busy1.await.unwrap().unwrap();
        busy2.await.unwrap().unwrap();

        // Capacity frees once jobs finish.
        assert!(pool.run(|| ()).await.is_ok());
    }
}
