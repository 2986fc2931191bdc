//! Brute-force protection through a persisted failed-attempt counter
//!
//! Once `max_attempts` failures accumulate, the lockout start is stamped and
//! attempts are refused for `lockout_duration`. The throttle arms a one-shot
//! timer at the end of the window; when it fires the state is reset exactly
//! as a successful authentication would reset it, which is what publishes the
//! transition back to [`ProtectionStatus::Allowed`].
//!
//! All mutations and all status publications happen under one lock, so a
//! subscriber's replayed value and the live values that follow never overlap
//! or leave a gap.

mod state;
mod stream;

pub use state::{FailedAttemptState, ProtectionStatus};
pub use stream::StatusStream;

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use crate::error::Result;
use crate::scheduler::{DelayedScheduler, ScheduledTask};
use crate::store::AttemptStore;
use state::lockout_end;

/// Buffered status updates per subscriber before it starts lagging
const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Why the attempt state was cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// The user authenticated successfully
    Authenticated,
    /// The lockout window elapsed
    LockoutExpired,
}

/// Expiry timer for one lockout epoch
struct ArmedExpiry {
    epoch: DateTime<Utc>,
    _task: ScheduledTask,
}

#[derive(Default)]
struct Guarded {
    expiry: Option<ArmedExpiry>,
}

struct Inner {
    config: ThrottleConfig,
    store: Arc<dyn AttemptStore>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn DelayedScheduler>,
    guarded: Mutex<Guarded>,
    status_tx: broadcast::Sender<ProtectionStatus>,
}

/// Attempt counter and lockout controller
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct AttemptThrottle {
    inner: Arc<Inner>,
}

impl AttemptThrottle {
    /// Create a throttle over `store`
    ///
    /// A lockout read back from the store is resumed: if its window already
    /// elapsed the state is cleared, otherwise the expiry timer is re-armed.
    pub fn new(
        config: ThrottleConfig,
        store: Arc<dyn AttemptStore>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn DelayedScheduler>,
    ) -> Result<Self> {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);

        let throttle = Self {
            inner: Arc::new(Inner {
                config,
                store,
                clock,
                scheduler,
                guarded: Mutex::new(Guarded::default()),
                status_tx,
            }),
        };

        throttle.resume()?;
        Ok(throttle)
    }

    /// Throttle parameters
    pub fn config(&self) -> &ThrottleConfig {
        &self.inner.config
    }

    /// Current status, without subscribing
    pub fn status(&self) -> Result<ProtectionStatus> {
        let _guarded = self.lock()?;
        Ok(self.load()?.status(&self.inner.config))
    }

    /// Subscribe to status changes
    ///
    /// The returned stream yields the current status first, then every change.
    pub fn status_changes(&self) -> Result<StatusStream> {
        let _guarded = self.lock()?;
        let current = self.load()?.status(&self.inner.config);
        let rx = self.inner.status_tx.subscribe();
        Ok(StatusStream::new(current, rx))
    }

    /// Count a failed attempt
    ///
    /// The lockout start is stamped only by the attempt that first reaches the
    /// limit; further failures raise the count but leave the window alone.
    pub fn increment_failed_attempt(&self) -> Result<ProtectionStatus> {
        let mut guarded = self.lock()?;

        let current = self.load()?;
        let next = current.record_failure(&self.inner.config, self.inner.clock.now())?;
        self.inner.store.save(&next)?;

        let status = next.status(&self.inner.config);
        if let Some(started) = next.lockout_started_at {
            if current.lockout_started_at.is_none() {
                info!(
                    "Attempt limit reached after {} failures, locked until {}",
                    next.failed_count,
                    lockout_end(started, &self.inner.config)
                );
            }
            self.ensure_expiry(&mut guarded, started);
        } else {
            debug!("Failed attempt {} recorded", next.failed_count);
        }

        self.publish(status);
        Ok(status)
    }

    /// Clear the attempt state after a successful authentication
    pub fn record_successful_authentication(&self) -> Result<ProtectionStatus> {
        let mut guarded = self.lock()?;
        self.reset(&mut guarded, ResetReason::Authenticated)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Guarded>> {
        Ok(self.inner.guarded.lock()?)
    }

    fn load(&self) -> Result<FailedAttemptState> {
        Ok(self.inner.store.load()?.unwrap_or_default())
    }

    fn publish(&self, status: ProtectionStatus) {
        debug!("Publishing status {:?}", status);
        // No subscribers is fine
        let _ = self.inner.status_tx.send(status);
    }

    fn reset(&self, guarded: &mut Guarded, reason: ResetReason) -> Result<ProtectionStatus> {
        let state = FailedAttemptState::default();
        self.inner.store.save(&state)?;
        guarded.expiry = None;

        match reason {
            ResetReason::Authenticated => debug!("Attempt state reset after authentication"),
            ResetReason::LockoutExpired => info!("Lockout expired, attempts allowed again"),
        }

        let status = state.status(&self.inner.config);
        self.publish(status);
        Ok(status)
    }

    fn resume(&self) -> Result<()> {
        let mut guarded = self.lock()?;
        let state = self.load()?;

        // A limit lowered since the state was written can leave the count at
        // or over it with no stamp; that starts a lockout now
        if state.lockout_started_at.is_none()
            && state.failed_count >= self.inner.config.max_attempts()
        {
            let now = self.inner.clock.now();
            let stamped = FailedAttemptState {
                lockout_started_at: Some(now),
                ..state
            };
            self.inner.store.save(&stamped)?;
            info!(
                "Stored {} failures reach the limit of {}, locked until {}",
                stamped.failed_count,
                self.inner.config.max_attempts(),
                lockout_end(now, &self.inner.config)
            );
            self.ensure_expiry(&mut guarded, now);
            return Ok(());
        }

        if let Some(started) = state.lockout_started_at {
            let until = lockout_end(started, &self.inner.config);
            if until <= self.inner.clock.now() {
                info!("Stored lockout ended at {}, clearing", until);
                self.reset(&mut guarded, ResetReason::LockoutExpired)?;
            } else {
                info!("Resuming lockout until {}", until);
                self.ensure_expiry(&mut guarded, started);
            }
        }

        Ok(())
    }

    /// Arm the expiry timer for the lockout that began at `epoch`, once
    fn ensure_expiry(&self, guarded: &mut Guarded, epoch: DateTime<Utc>) {
        if guarded.expiry.as_ref().is_some_and(|armed| armed.epoch == epoch) {
            return;
        }

        let until = lockout_end(epoch, &self.inner.config);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let task = self.inner.scheduler.schedule_at(
            until,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    AttemptThrottle { inner }.expire(epoch);
                }
            }),
        );

        debug!("Expiry armed for {}", until);
        guarded.expiry = Some(ArmedExpiry { epoch, _task: task });
    }

    fn expire(&self, epoch: DateTime<Utc>) {
        if let Err(e) = self.try_expire(epoch) {
            error!("Failed to clear expired lockout: {}", e);
        }
    }

    fn try_expire(&self, epoch: DateTime<Utc>) -> Result<()> {
        let mut guarded = self.lock()?;

        if self.load()?.lockout_started_at != Some(epoch) {
            debug!("Ignoring expiry for superseded lockout {}", epoch);
            return Ok(());
        }

        self.reset(&mut guarded, ResetReason::LockoutExpired)?;
        Ok(())
    }
}

impl std::fmt::Debug for AttemptThrottle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptThrottle")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::GuardError;
    use crate::store::MemoryAttemptStore;
    use std::time::Duration;

    struct Fixture {
        clock: ManualClock,
        store: Arc<MemoryAttemptStore>,
        throttle: AttemptThrottle,
    }

    fn fixture_with(store: MemoryAttemptStore, max_attempts: u32, lockout_secs: u64) -> Fixture {
        let clock = ManualClock::default();
        let store = Arc::new(store);
        let config = ThrottleConfig::new(max_attempts, Duration::from_secs(lockout_secs)).unwrap();
        let throttle = AttemptThrottle::new(
            config,
            Arc::clone(&store) as Arc<dyn AttemptStore>,
            Arc::new(clock.clone()),
            Arc::new(clock.clone()),
        )
        .unwrap();
        Fixture {
            clock,
            store,
            throttle,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryAttemptStore::new(), 5, 5)
    }

    #[test]
    fn test_fresh_throttle_is_allowed() {
        let f = fixture();
        assert_eq!(
            f.throttle.status().unwrap(),
            ProtectionStatus::Allowed {
                attempts_made: 0,
                attempts_remaining: 5
            }
        );
        assert!(f.store.load().unwrap().is_none());
    }

    #[test]
    fn test_one_below_limit_is_allowed_with_one_remaining() {
        let f = fixture();
        for _ in 0..4 {
            f.throttle.increment_failed_attempt().unwrap();
        }
        assert_eq!(
            f.throttle.status().unwrap(),
            ProtectionStatus::Allowed {
                attempts_made: 4,
                attempts_remaining: 1
            }
        );
    }

    #[test]
    fn test_reaching_limit_locks_for_lockout_duration() {
        let f = fixture();
        let t0 = f.clock.now();
        for _ in 0..4 {
            f.throttle.increment_failed_attempt().unwrap();
        }

        let status = f.throttle.increment_failed_attempt().unwrap();
        assert_eq!(
            status,
            ProtectionStatus::Locked {
                attempts_made: 5,
                locked_until: t0 + chrono::Duration::seconds(5)
            }
        );
        assert_eq!(f.clock.pending_tasks(), 1);
    }

    #[test]
    fn test_increment_while_locked_keeps_window() {
        let f = fixture();
        let t0 = f.clock.now();
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }

        f.clock.advance(Duration::from_secs(2));
        let status = f.throttle.increment_failed_attempt().unwrap();

        assert_eq!(
            status,
            ProtectionStatus::Locked {
                attempts_made: 6,
                locked_until: t0 + chrono::Duration::seconds(5)
            }
        );
        // Still a single timer for the epoch
        assert_eq!(f.clock.pending_tasks(), 1);
    }

    #[test]
    fn test_success_resets_from_any_state() {
        let f = fixture();
        for _ in 0..7 {
            f.throttle.increment_failed_attempt().unwrap();
        }

        let status = f.throttle.record_successful_authentication().unwrap();
        assert_eq!(
            status,
            ProtectionStatus::Allowed {
                attempts_made: 0,
                attempts_remaining: 5
            }
        );
        assert_eq!(f.store.load().unwrap(), Some(FailedAttemptState::default()));
        assert_eq!(f.clock.pending_tasks(), 0);
    }

    #[test]
    fn test_expiry_clears_state_without_explicit_call() {
        let f = fixture();
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }
        let mut stream = f.throttle.status_changes().unwrap();
        assert!(stream.try_recv().unwrap().is_locked());

        f.clock.advance(Duration::from_millis(5001));

        assert_eq!(
            stream.drain(),
            vec![ProtectionStatus::Allowed {
                attempts_made: 0,
                attempts_remaining: 5
            }]
        );
        assert!(f.store.load().unwrap().unwrap().is_clear());
    }

    #[test]
    fn test_expiry_after_reset_is_noop() {
        let f = fixture();
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }
        f.throttle.record_successful_authentication().unwrap();
        f.throttle.increment_failed_attempt().unwrap();

        let mut stream = f.throttle.status_changes().unwrap();
        stream.try_recv();

        f.clock.advance(Duration::from_secs(10));
        assert!(stream.drain().is_empty());
        assert_eq!(f.throttle.status().unwrap().attempts_made(), 1);
    }

    #[test]
    fn test_stale_timer_ignored_for_new_epoch() {
        let f = fixture();
        let stale_epoch = f.clock.now();
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }

        // Simulate a timer from an old epoch firing late
        f.throttle.record_successful_authentication().unwrap();
        f.clock.advance(Duration::from_secs(1));
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }
        f.throttle.expire(stale_epoch);

        assert!(f.throttle.status().unwrap().is_locked());
    }

    #[test]
    fn test_subscriber_gets_replay_then_changes() {
        let f = fixture();
        f.throttle.increment_failed_attempt().unwrap();

        let mut stream = f.throttle.status_changes().unwrap();
        f.throttle.increment_failed_attempt().unwrap();
        f.throttle.record_successful_authentication().unwrap();

        let seen: Vec<u32> = stream.drain().iter().map(|s| s.attempts_made()).collect();
        assert_eq!(seen, vec![1, 2, 0]);
    }

    #[test]
    fn test_single_lock_transition_per_crossing() {
        let f = fixture();
        let mut stream = f.throttle.status_changes().unwrap();
        for _ in 0..8 {
            f.throttle.increment_failed_attempt().unwrap();
        }

        let statuses = stream.drain();
        let transitions = statuses
            .windows(2)
            .filter(|pair| !pair[0].is_locked() && pair[1].is_locked())
            .count();
        assert_eq!(transitions, 1);

        let counts: Vec<u32> = statuses.iter().map(|s| s.attempts_made()).collect();
        assert!(counts.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn test_resume_live_lockout_rearms_timer() {
        let start = DateTime::<Utc>::UNIX_EPOCH;
        let store = MemoryAttemptStore::with_state(FailedAttemptState {
            failed_count: 5,
            lockout_started_at: Some(start),
        });
        let f = fixture_with(store, 5, 5);

        assert!(f.throttle.status().unwrap().is_locked());
        assert_eq!(f.clock.pending_tasks(), 1);

        f.clock.advance(Duration::from_secs(5));
        assert!(!f.throttle.status().unwrap().is_locked());
    }

    #[test]
    fn test_resume_elapsed_lockout_clears() {
        let store = MemoryAttemptStore::with_state(FailedAttemptState {
            failed_count: 9,
            lockout_started_at: Some(DateTime::<Utc>::UNIX_EPOCH - chrono::Duration::seconds(60)),
        });
        let f = fixture_with(store, 5, 5);

        assert_eq!(f.throttle.status().unwrap().attempts_made(), 0);
        assert_eq!(f.clock.pending_tasks(), 0);
    }

    #[test]
    fn test_resume_over_lowered_limit_locks() {
        let store = MemoryAttemptStore::with_state(FailedAttemptState {
            failed_count: 4,
            lockout_started_at: None,
        });
        let f = fixture_with(store, 3, 5);
        let t0 = f.clock.now();

        assert_eq!(
            f.throttle.status().unwrap(),
            ProtectionStatus::Locked {
                attempts_made: 4,
                locked_until: t0 + chrono::Duration::seconds(5)
            }
        );
        assert_eq!(f.store.load().unwrap().unwrap().lockout_started_at, Some(t0));
        assert_eq!(f.clock.pending_tasks(), 1);

        f.clock.advance(Duration::from_secs(5));
        assert!(f.store.load().unwrap().unwrap().is_clear());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let f = fixture_with(MemoryAttemptStore::new(), 1000, 5);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let throttle = f.throttle.clone();
                scope.spawn(move || {
                    for _ in 0..25 {
                        throttle.increment_failed_attempt().unwrap();
                    }
                });
            }
        });

        assert_eq!(f.throttle.status().unwrap().attempts_made(), 200);
    }

    #[test]
    fn test_dropping_throttle_cancels_timer() {
        let f = fixture();
        for _ in 0..5 {
            f.throttle.increment_failed_attempt().unwrap();
        }
        assert_eq!(f.clock.pending_tasks(), 1);

        drop(f.throttle);
        assert_eq!(f.clock.pending_tasks(), 0);
    }

    struct FailingStore;

    impl AttemptStore for FailingStore {
        fn load(&self) -> Result<Option<FailedAttemptState>> {
            Err(GuardError::Store("disk gone".to_string()))
        }

        fn save(&self, _state: &FailedAttemptState) -> Result<()> {
            Err(GuardError::Store("disk gone".to_string()))
        }
    }

    #[test]
    fn test_store_failure_propagates() {
        let clock = ManualClock::default();
        let result = AttemptThrottle::new(
            ThrottleConfig::default(),
            Arc::new(FailingStore),
            Arc::new(clock.clone()),
            Arc::new(clock),
        );
        assert!(matches!(result, Err(GuardError::Store(_))));
    }
}
