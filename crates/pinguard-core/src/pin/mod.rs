//! PIN entry and verification
//!
//! - [`PinSession`]: pure state machine from keystrokes and verdicts to
//!   effects and UI outputs
//! - [`PinVerificationMachine`]: drives a session against a [`Verifier`] and
//!   an [`AttemptThrottle`](crate::throttle::AttemptThrottle)
//! - [`PinCredential`]: locally stored Argon2id PIN hash

mod countdown;
mod credential;
mod machine;
mod secret;
mod session;
mod verifier;

pub use countdown::{format_time_remaining, Countdown};
pub use credential::{validate_pin, PinCredential};
pub use machine::{PinVerificationMachine, SessionOutcome};
pub use secret::{PinBuffer, Secret};
pub use session::{
    Effect, EntryMode, PinEvent, PinInput, PinOutput, PinSession, SessionState, Transition,
};
pub use verifier::{LocalPinVerifier, VerificationVerdict, Verifier};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors shown to the user during PIN entry
///
/// Each rejection reason maps to exactly one variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PinError {
    /// First wrong PIN since the last reset
    #[error("Incorrect PIN")]
    IncorrectFirstAttempt,

    /// Wrong PIN after earlier failures
    #[error("Incorrect PIN, {remaining} attempts remaining")]
    IncorrectAttemptsRemaining { remaining: u32 },

    /// Attempt limit reached
    #[error("Too many attempts ({attempts_made}), locked until {locked_until}")]
    AttemptsExhausted {
        attempts_made: u32,
        locked_until: DateTime<Utc>,
    },

    /// The verifier could not be reached
    #[error("Could not check PIN, network unavailable")]
    Network,

    /// The verifier failed
    #[error("Could not check PIN, server error")]
    Server,

    /// Any other failure while checking
    #[error("Could not check PIN: {0}")]
    Unexpected(String),
}
