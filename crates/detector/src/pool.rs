//! A bounded pool of check units on top of the tokio runtime.
//!
//! At most `parallelism` units execute at once, and at most `queue_capacity`
//! submitted units wait for an execution slot; once the queue is full,
//! [`CheckPool::submit`] suspends until a queued unit starts, the run is
//! cancelled or the pool's deadline passes. Every unit is isolated: a panic is caught at the unit boundary
//! and only counted, it never reaches sibling units or the pool.

use std::{
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use futures::FutureExt;
use tokio::{
    sync::Semaphore,
    task::JoinSet,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::PoolError;

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    panicked: AtomicU64,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

/// Point in time view of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: u64,
    pub completed: u64,
    pub panicked: u64,
    /// Highest number of units observed executing at the same time
    pub peak_active: usize,
}

#[derive(Debug)]
pub struct CheckPool {
    slots: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    tasks: JoinSet<()>,
    cancel: CancellationToken,
    created: Instant,
    deadline: Option<Instant>,
    counters: Arc<Counters>,
}

impl CheckPool {
    /// Create a pool running at most `parallelism` units at once. Both limits
    /// are raised to at least one.
    pub fn new(parallelism: usize, queue_capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(parallelism.max(1))),
            queue: Arc::new(Semaphore::new(queue_capacity.max(1))),
            tasks: JoinSet::new(),
            cancel,
            created: Instant::now(),
            deadline: None,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Bound submission by `deadline`: once it passes, [`CheckPool::submit`]
    /// fails instead of waiting for queue space.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn exceeded(&self, deadline: Instant) -> PoolError {
        PoolError::DeadlineExceeded(deadline.saturating_duration_since(self.created))
    }

    /// Accept a unit for asynchronous execution.
    ///
    /// Waits while the submission queue is full. Fails if the pool's
    /// cancellation token fires or its deadline passes before the unit could
    /// be queued.
    pub async fn submit<F>(&mut self, unit: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let queued = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PoolError::Cancelled),
            deadline = deadline_passed(self.deadline) => return Err(self.exceeded(deadline)),
            permit = self.queue.clone().acquire_owned() => {
                permit.map_err(|_| PoolError::Cancelled)?
            }
        };

        let slots = self.slots.clone();
        let counters = self.counters.clone();
        counters.submitted.fetch_add(1, Ordering::Relaxed);

        self.tasks.spawn(async move {
            let Ok(slot) = slots.acquire_owned().await else {
                return;
            };
            drop(queued);

            let active = counters.active.fetch_add(1, Ordering::SeqCst) + 1;
            counters.peak_active.fetch_max(active, Ordering::SeqCst);

            let outcome = AssertUnwindSafe(unit).catch_unwind().await;

            counters.active.fetch_sub(1, Ordering::SeqCst);
            drop(slot);

            match outcome {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(panic) => {
                    counters.panicked.fetch_add(1, Ordering::Relaxed);
                    error!("Check unit panicked: {}", panic_message(panic.as_ref()));
                }
            }
        });

        // Reap finished units so the set does not grow with the run
        while self.tasks.try_join_next().is_some() {}
        Ok(())
    }

    /// Wait until every submitted unit has finished.
    ///
    /// Fails if `deadline` passes or the cancellation token fires first; the
    /// remaining units are then aborted, and `join` only returns once none of
    /// them is running anymore.
    pub async fn join(&mut self, deadline: Instant) -> Result<(), PoolError> {
        let exceeded = self.exceeded(deadline);
        let tasks = &mut self.tasks;

        let outcome = tokio::select! {
            biased;
            _ = async { while tasks.join_next().await.is_some() {} } => Ok(()),
            _ = self.cancel.cancelled() => Err(PoolError::Cancelled),
            _ = sleep_until(deadline) => Err(exceeded),
        };

        if outcome.is_err() {
            self.shutdown().await;
        }
        outcome
    }

    /// Abort every unfinished unit and wait until none of them is running
    pub async fn shutdown(&mut self) {
        if !self.tasks.is_empty() {
            debug!("Aborting {} unfinished check units", self.tasks.len());
        }
        self.tasks.abort_all();
        while self.tasks.join_next().await.is_some() {}
    }

    /// Number of units that were submitted and not yet reaped
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            panicked: self.counters.panicked.load(Ordering::Relaxed),
            peak_active: self.counters.peak_active.load(Ordering::SeqCst),
        }
    }
}

async fn deadline_passed(deadline: Option<Instant>) -> Instant {
    match deadline {
        Some(deadline) => {
            sleep_until(deadline).await;
            deadline
        }
        None => std::future::pending().await,
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
