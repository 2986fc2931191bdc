//! Time sources
//!
//! Everything that needs "now" takes a [`Clock`]. [`ManualClock`] doubles as a
//! [`DelayedScheduler`] so tests can move time forward and have lockout
//! expiry fire exactly when the window elapses.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::scheduler::{DelayedScheduler, ScheduledTask, Task};

/// Source of the current time
pub trait Clock: Send + Sync {
    /// Current UTC time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct PendingTask {
    id: u64,
    at: DateTime<Utc>,
    task: Task,
}

struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    pending: Vec<PendingTask>,
}

/// Manually driven clock and scheduler
///
/// Cloning shares the same timeline. Tasks scheduled at or before the current
/// time run on the next [`advance`](ManualClock::advance) or
/// [`run_due`](ManualClock::run_due).
#[derive(Clone)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState {
                now: start,
                next_id: 0,
                pending: Vec::new(),
            })),
        }
    }

    /// Move time forward and run every task that became due
    pub fn advance(&self, by: Duration) {
        {
            let mut state = self.lock();
            let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
            state.now = state.now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        }
        self.run_due();
    }

    /// Run tasks due at the current time, earliest first
    ///
    /// Tasks run without the clock lock held, so they may read the clock or
    /// schedule further tasks.
    pub fn run_due(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                let now = state.now;
                let due = state
                    .pending
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| p.at <= now)
                    .min_by_key(|(_, p)| (p.at, p.id))
                    .map(|(index, _)| index);
                due.map(|index| state.pending.remove(index))
            };

            match next {
                Some(pending) => (pending.task)(),
                None => break,
            }
        }
    }

    /// Number of tasks waiting to run
    pub fn pending_tasks(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }
}

impl DelayedScheduler for ManualClock {
    fn schedule_at(&self, at: DateTime<Utc>, task: Task) -> ScheduledTask {
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            state.pending.push(PendingTask { id, at, task });
            id
        };

        let weak: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        ScheduledTask::new(move || {
            if let Some(state) = weak.upgrade() {
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                state.pending.retain(|p| p.id != id);
            }
        })
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ManualClock")
            .field("now", &state.now)
            .field("pending", &state.pending.len())
            .finish()
    }
}
