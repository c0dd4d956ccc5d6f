//! Detached, best-effort background work.
//!
//! Promotion writes and telemetry flushes run after the response has been handed back.
//! A scheduled task may run to completion or be abandoned when the process exits;
//! callers must never depend on it having finished by any particular time.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::warn;

/// A unit of fire-and-forget work.
pub type BackgroundTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// "Run this after the response is sent" capability.
pub trait BackgroundScheduler: Send + Sync {
    /// Schedules `task`. No completion signal is given back.
    fn schedule(&self, task: BackgroundTask);
}

/// Boxes a future into a [`BackgroundTask`].
pub fn task<F>(future: F) -> BackgroundTask
where
    F: Future<Output = ()> + Send + 'static,
{
    Box::pin(future)
}

/// Runs tasks on the ambient Tokio runtime and tracks how many are outstanding.
#[derive(Clone, Default)]
pub struct TokioScheduler {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks scheduled but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until every outstanding task has finished or `grace` elapses.
    ///
    /// Returns `true` if the scheduler became idle within the grace period.
    pub async fn drain(&self, grace: Duration) -> bool {
        let wait_idle = async {
            loop {
                let notified = self.idle.notified();
                if self.pending() == 0 {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(grace, wait_idle).await.is_ok()
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending", &self.pending())
            .finish()
    }
}

struct PendingGuard {
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        // AcqRel: the last finisher must observe every earlier decrement before waking
        // drain().
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl BackgroundScheduler for TokioScheduler {
    fn schedule(&self, task: BackgroundTask) {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No Tokio runtime available; dropping background task");
                return;
            }
        };

        self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            idle: Arc::clone(&self.idle),
        };

        handle.spawn(async move {
            let _guard = guard;
            task.await;
        });
    }
}

/// Scheduler that queues tasks until the test runs them explicitly.
#[cfg(any(test, feature = "mock"))]
#[derive(Default)]
pub struct ManualScheduler {
    queue: parking_lot::Mutex<Vec<BackgroundTask>>,
    scheduled: AtomicUsize,
}

#[cfg(any(test, feature = "mock"))]
impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Total tasks ever scheduled.
    pub fn scheduled(&self) -> usize {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Discards every queued task, as a host reclaiming the worker would.
    pub fn abandon_all(&self) -> usize {
        let mut queue = self.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    /// Runs queued tasks in FIFO order, including tasks they schedule, until the queue
    /// is empty. Returns how many ran.
    pub async fn run_all(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch: Vec<BackgroundTask> = std::mem::take(&mut *self.queue.lock());
            if batch.is_empty() {
                return ran;
            }
            for task in batch {
                task.await;
                ran += 1;
            }
        }
    }
}

#[cfg(any(test, feature = "mock"))]
impl BackgroundScheduler for ManualScheduler {
    fn schedule(&self, task: BackgroundTask) {
        self.scheduled.fetch_add(1, Ordering::SeqCst);
        self.queue.lock().push(task);
    }
}
