//! Detached task submission.
//!
//! # Responsibilities
//! - Run fire-and-forget work (propagation, graph bookkeeping) off the request path
//! - Bound how many of those tasks run at once
//! - Make failures and completion observable (counters, `wait_idle`)
//!
//! # Design Decisions
//! - Tasks are spawned onto the runtime, never tied to a request's cancellation
//! - When the bound is reached new work waits for a permit inside its own task,
//!   so submission itself never blocks the caller
//! - Long-lived consumers bypass the bound; they are limited by the number of
//!   distinct endpoints, not by request volume

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;

use crate::error::CascadeError;

#[derive(Debug)]
struct Inner {
    permits: Arc<Semaphore>,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    idle: Notify,
}

/// Bounded pool for detached tasks. Clones share the same pool.
#[derive(Debug, Clone)]
pub struct TaskPool {
    inner: Arc<Inner>,
}

/// Counters exposed for tests and the admin API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct TaskStats {
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

impl TaskPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
                in_flight: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Spawn a detached task. Errors are logged and counted, never returned.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = Result<(), CascadeError>> + Send + 'static,
    {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.clone();

        tokio::spawn(async move {
            let _guard = InFlightGuard(inner.clone());
            let _permit = match inner.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            match fut.await {
                Ok(()) => {
                    inner.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    inner.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(task = name, error = %e, "Detached task failed");
                }
            }
        });
    }

    /// Spawn a task that lives for the rest of the process.
    pub fn spawn_long_lived<F>(&self, name: &'static str, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Starting long-lived task");
        tokio::spawn(fut)
    }

    /// Wait until no detached task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight count even if the task panics or is aborted.
struct InFlightGuard(Arc<Inner>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}
