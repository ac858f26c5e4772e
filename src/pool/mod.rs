//! Bounded work pool
//!
//! Side effects that must not run on a session's inbox (playing an uploaded
//! file, for one) are submitted here. The queue is bounded; a full queue
//! rejects the job instead of blocking the submitter. Each job runs on the
//! blocking thread pool so it may call synchronous engine APIs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A unit of work
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Submission errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The queue is at capacity
    #[error("work queue full")]
    Full,
    /// The pool has been shut down
    #[error("work pool shut down")]
    ShutDown,
}

/// Fixed set of workers draining one bounded queue
pub struct WorkPool {
    /// Submission side; `None` once shut down
    tx: Mutex<Option<mpsc::Sender<Job>>>,

    /// Worker tasks
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Jobs finished (including ones that panicked)
    completed: Arc<AtomicU64>,
}

impl WorkPool {
    /// Start `workers` workers sharing a queue of `capacity` jobs
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let completed = Arc::new(AtomicU64::new(0));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let completed = Arc::clone(&completed);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };

                        if let Err(e) = tokio::task::spawn_blocking(job).await {
                            tracing::error!(worker, error = %e, "Work job panicked");
                        }
                        completed.fetch_add(1, Ordering::Relaxed);
                    }
                    tracing::debug!(worker, "Worker exiting");
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            completed,
        }
    }

    /// Queue a job without waiting
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let tx = self.tx.lock();
        let tx = tx.as_ref().ok_or(PoolError::ShutDown)?;

        tx.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => PoolError::Full,
            mpsc::error::TrySendError::Closed(_) => PoolError::ShutDown,
        })
    }

    /// Stop accepting jobs and wait for queued ones to finish
    pub async fn shutdown(&self) {
        drop(self.tx.lock().take());

        let workers: Vec<_> = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Whether `shutdown` has been called
    pub fn is_shut_down(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Jobs finished so far
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_jobs_run_before_shutdown_returns() {
        let pool = WorkPool::new(2, 8);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = Arc::clone(&counter);
            pool.submit(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        }

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(pool.completed(), 5);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let pool = WorkPool::new(1, 1);
        pool.shutdown().await;

        assert!(pool.is_shut_down());
        assert_eq!(pool.submit(Box::new(|| {})), Err(PoolError::ShutDown));
    }

    #[tokio::test]
    async fn test_full_queue_rejects() {
        let pool = WorkPool::new(1, 1);
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Arc::new(std::sync::Mutex::new(gate_rx));

        // Occupy the only worker until the gate opens
        let blocker = Arc::clone(&gate_rx);
        pool.submit(Box::new(move || {
            let _ = blocker.lock().unwrap().recv();
        }))
        .unwrap();

        // Wait until the worker has taken the blocking job off the queue
        let mut rejected = false;
        for _ in 0..100 {
            match pool.submit(Box::new(|| {})) {
                Ok(()) => {}
                Err(PoolError::Full) => {
                    rejected = true;
                    break;
                }
                Err(e) => panic!("unexpected {:?}", e),
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(rejected);

        gate_tx.send(()).unwrap();
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_worker() {
        let pool = WorkPool::new(1, 4);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(Box::new(|| panic!("boom"))).unwrap();
        let c = Arc::clone(&counter);
        pool.submit(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();

        pool.shutdown().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(pool.completed(), 2);
    }
}
