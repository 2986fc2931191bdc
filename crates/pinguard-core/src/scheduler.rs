//! Cancellable delayed execution
//!
//! The throttle arms a one-shot task at the end of every lockout window.
//! Handles cancel their task when dropped, so whoever owns the handle owns
//! the timer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tracing::debug;

use crate::clock::Clock;
use crate::error::{GuardError, Result};

/// A one-shot task run by a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs a task at an absolute point in time
pub trait DelayedScheduler: Send + Sync {
    /// Schedule `task` to run at `at`; a time in the past runs as soon as possible
    fn schedule_at(&self, at: DateTime<Utc>, task: Task) -> ScheduledTask;
}

/// Handle to a scheduled task; dropping it cancels the task
pub struct ScheduledTask {
    cancel: Option<Box<dyn FnOnce() + Send + 'static>>,
}

impl ScheduledTask {
    /// Wrap a cancellation action
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Cancel the task if it has not run yet
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("armed", &self.cancel.is_some())
            .finish()
    }
}

/// Scheduler backed by sleeping tokio tasks
pub struct TokioScheduler {
    handle: Handle,
    clock: Arc<dyn Clock>,
}

impl TokioScheduler {
    /// Create a scheduler spawning onto the given runtime
    pub fn new(handle: Handle, clock: Arc<dyn Clock>) -> Self {
        Self { handle, clock }
    }

    /// Create a scheduler on the runtime of the calling context
    pub fn current(clock: Arc<dyn Clock>) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| GuardError::Config(format!("no tokio runtime: {}", e)))?;
        Ok(Self::new(handle, clock))
    }
}

impl DelayedScheduler for TokioScheduler {
    fn schedule_at(&self, at: DateTime<Utc>, task: Task) -> ScheduledTask {
        let delay = (at - self.clock.now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        debug!("Scheduling task in {:?}", delay);

        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });

        ScheduledTask::new(move || join.abort())
    }
}
