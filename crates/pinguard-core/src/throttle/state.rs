//! Persisted attempt state and the status derived from it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ThrottleConfig;
use crate::error::{GuardError, Result};

/// Failed attempts since the last successful authentication
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttemptState {
    /// Number of failed attempts
    #[serde(default)]
    pub failed_count: u32,

    /// When the current lockout began; stays fixed until the next reset
    #[serde(default)]
    pub lockout_started_at: Option<DateTime<Utc>>,
}

impl FailedAttemptState {
    /// Count one more failure, stamping the lockout start the first time the
    /// limit is reached
    pub fn record_failure(self, config: &ThrottleConfig, now: DateTime<Utc>) -> Result<Self> {
        let failed_count = self
            .failed_count
            .checked_add(1)
            .ok_or(GuardError::CounterOverflow)?;

        let lockout_started_at = match self.lockout_started_at {
            Some(started) => Some(started),
            None if failed_count >= config.max_attempts() => Some(now),
            None => None,
        };

        Ok(Self {
            failed_count,
            lockout_started_at,
        })
    }

    /// Status implied by this state
    pub fn status(&self, config: &ThrottleConfig) -> ProtectionStatus {
        match self.lockout_started_at {
            Some(started) => ProtectionStatus::Locked {
                attempts_made: self.failed_count,
                locked_until: lockout_end(started, config),
            },
            None => ProtectionStatus::Allowed {
                attempts_made: self.failed_count,
                attempts_remaining: config.max_attempts().saturating_sub(self.failed_count),
            },
        }
    }

    /// Whether nothing has been recorded since the last reset
    pub fn is_clear(&self) -> bool {
        *self == Self::default()
    }
}

pub(crate) fn lockout_end(started: DateTime<Utc>, config: &ThrottleConfig) -> DateTime<Utc> {
    started
        .checked_add_signed(config.lockout_delta())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// The throttle's opinion on whether another attempt may be made
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionStatus {
    /// Attempts are accepted
    Allowed {
        /// Failed attempts since the last reset
        attempts_made: u32,
        /// Failed attempts left before lockout
        attempts_remaining: u32,
    },
    /// Attempts are refused until `locked_until`
    Locked {
        /// Failed attempts since the last reset
        attempts_made: u32,
        /// End of the lockout window
        locked_until: DateTime<Utc>,
    },
}

impl ProtectionStatus {
    /// Failed attempts since the last reset
    pub fn attempts_made(&self) -> u32 {
        match self {
            ProtectionStatus::Allowed { attempts_made, .. }
            | ProtectionStatus::Locked { attempts_made, .. } => *attempts_made,
        }
    }

    /// End of the lockout window, if locked
    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            ProtectionStatus::Locked { locked_until, .. } => Some(*locked_until),
            ProtectionStatus::Allowed { .. } => None,
        }
    }

    /// Whether attempts are currently refused
    pub fn is_locked(&self) -> bool {
        matches!(self, ProtectionStatus::Locked { .. })
    }
}
