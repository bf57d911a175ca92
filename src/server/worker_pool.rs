//! Bounded pool for response-generation tasks
//!
//! At most `max_workers` tasks execute at once; further submissions wait for a
//! slot instead of spawning unbounded concurrency. Shutdown stops intake,
//! tells every active room, cancels tasks still waiting for a slot and drains
//! the running ones.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::room_manager::ConnectionRegistry;
use crate::error::{ChatError, Result};
use crate::protocol::Frame;

/// Notice broadcast to every active room when the pool shuts down
pub const MAINTENANCE_NOTICE: &str =
    "The server is shutting down for maintenance, please reconnect later...";

/// How a submitted task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The task ran to completion
    Completed(T),
    /// Shutdown began before the task got a slot
    Cancelled,
    /// The task was still running when the shutdown timeout expired
    Abandoned,
    /// The task panicked
    Panicked(String),
}

/// Handle to a submitted task
#[derive(Debug)]
pub struct TaskHandle<T> {
    inner: JoinHandle<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    /// Wait for the task to end
    pub async fn join(self) -> TaskOutcome<T> {
        match self.inner.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => TaskOutcome::Panicked(e.to_string()),
            Err(_) => TaskOutcome::Abandoned,
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub max_workers: usize,
    pub running: usize,
    pub queued: usize,
    pub accepting: bool,
}

#[derive(Debug, Default)]
struct Counters {
    running: AtomicUsize,
    queued: AtomicUsize,
}

/// Decrements a counter when dropped, including on panic
struct CountGuard<'a>(&'a AtomicUsize);

impl<'a> CountGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for CountGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bounded worker pool
pub struct WorkerPool {
    max_workers: usize,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    /// Intake flag; submission and shutdown both hold this lock
    accepting: Mutex<bool>,
    /// Fires when shutdown starts, releasing tasks still waiting for a slot
    queue_cancel: CancellationToken,
    /// Fires when the drain timeout expires
    abort: CancellationToken,
    counters: Arc<Counters>,
    registry: Arc<ConnectionRegistry>,
}

impl WorkerPool {
    /// Create a pool with `max_workers` slots (at least one)
    pub fn new(max_workers: usize, registry: Arc<ConnectionRegistry>) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            max_workers,
            slots: Arc::new(Semaphore::new(max_workers)),
            tracker: TaskTracker::new(),
            accepting: Mutex::new(true),
            queue_cancel: CancellationToken::new(),
            abort: CancellationToken::new(),
            counters: Arc::new(Counters::default()),
            registry,
        }
    }

    /// Submit a task.
    ///
    /// Fails with `CapacitySaturated` once shutdown has begun. Accepted tasks
    /// queue until a slot frees up.
    pub fn submit<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let accepting = self.accepting.lock();
        if !*accepting {
            return Err(ChatError::capacity("Server is shutting down, cannot process new messages"));
        }

        let slots = Arc::clone(&self.slots);
        let counters = Arc::clone(&self.counters);
        let queue_cancel = self.queue_cancel.clone();
        let abort = self.abort.clone();

        // Count as queued before the task can observe the semaphore
        counters.queued.fetch_add(1, Ordering::SeqCst);
        let inner = self.tracker.spawn(async move {
            let permit = {
                let _queued = QueuedSlot(&counters.queued);
                // Biased so a shutdown that already started wins over a free slot
                tokio::select! {
                    biased;
                    _ = queue_cancel.cancelled() => return TaskOutcome::Cancelled,
                    permit = slots.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return TaskOutcome::Cancelled,
                    },
                }
            };

            let _running = CountGuard::enter(&counters.running);
            let outcome = tokio::select! {
                biased;
                _ = abort.cancelled() => TaskOutcome::Abandoned,
                value = task => TaskOutcome::Completed(value),
            };
            drop(permit);
            outcome
        });
        drop(accepting);

        Ok(TaskHandle { inner })
    }

    pub fn is_accepting(&self) -> bool {
        *self.accepting.lock()
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            max_workers: self.max_workers,
            running: self.counters.running.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            accepting: self.is_accepting(),
        }
    }

    /// Stop the pool and drain running tasks.
    ///
    /// With `timeout` unset the drain waits without bound; otherwise tasks
    /// still running when it expires are abandoned and logged. Returns `false`
    /// if shutdown had already been started.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> bool {
        {
            let mut accepting = self.accepting.lock();
            if !*accepting {
                debug!("worker pool shutdown already in progress");
                return false;
            }
            *accepting = false;
        }
        info!(
            running = self.counters.running.load(Ordering::SeqCst),
            queued = self.counters.queued.load(Ordering::SeqCst),
            "shutting down worker pool"
        );

        self.notify_rooms().await;

        self.queue_cancel.cancel();
        self.tracker.close();

        let drained = match timeout {
            None => {
                self.tracker.wait().await;
                true
            }
            Some(limit) => tokio::time::timeout(limit, self.tracker.wait()).await.is_ok(),
        };

        if !drained {
            warn!(
                running = self.counters.running.load(Ordering::SeqCst),
                "abandoning tasks still running after shutdown timeout"
            );
            self.abort.cancel();
            self.tracker.wait().await;
        }

        self.slots.close();
        info!("worker pool stopped");
        true
    }

    /// Broadcast the maintenance notice to every room with a live connection
    async fn notify_rooms(&self) {
        let notice = Frame::system(MAINTENANCE_NOTICE);
        for room_id in self.registry.active_rooms().await {
            if let Err(e) = self.registry.broadcast(&room_id, &notice).await {
                error!(room_id = %room_id, error = %e, "failed to send shutdown notice");
            }
        }
    }
}

/// Releases the queued count once the task stops waiting for a slot
struct QueuedSlot<'a>(&'a AtomicUsize);

impl Drop for QueuedSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
