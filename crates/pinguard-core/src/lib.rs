//! Pinguard - brute-force resistant PIN verification
//!
//! This crate provides:
//! - A persisted failed-attempt throttle with time-boxed lockout
//! - A live status stream that unlocks itself when the lockout window ends
//! - A PIN entry state machine that auto-submits and interprets verdicts
//! - Local Argon2id PIN credentials

pub mod clock;
pub mod config;
pub mod error;
pub mod pin;
pub mod scheduler;
pub mod store;
pub mod throttle;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{GuardConfig, PinEntryConfig, ThrottleConfig};
pub use error::{GuardError, Result};
pub use pin::{
    LocalPinVerifier, PinCredential, PinError, PinInput, PinOutput, PinVerificationMachine,
    SessionOutcome, VerificationVerdict, Verifier,
};
pub use scheduler::{DelayedScheduler, ScheduledTask, TokioScheduler};
pub use store::{AttemptStore, JsonFileStore, MemoryAttemptStore};
pub use throttle::{AttemptThrottle, FailedAttemptState, ProtectionStatus, StatusStream};
