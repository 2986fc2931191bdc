//! Error types for pinguard
//!
//! These are invariant violations (broken storage, poisoned locks, bad
//! configuration). User-facing PIN failures live in [`crate::pin::PinError`].

use thiserror::Error;

/// Result type alias for pinguard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Errors that can occur in the throttle and verification machine
#[derive(Debug, Error)]
pub enum GuardError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Attempt store failure
    #[error("Attempt store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failed attempt counter would overflow
    #[error("Failed attempt counter overflow")]
    CounterOverflow,

    /// A lock guarding throttle state was poisoned by a panicking holder
    #[error("Throttle state lock poisoned")]
    Poisoned,

    /// Credential hashing or parsing failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The PIN does not have the configured shape
    #[error("PIN must be exactly {0} digits")]
    InvalidPin(usize),

    /// No PIN credential has been set up yet
    #[error("PIN not set up - run `pinguard set-pin` first")]
    PinNotSetUp,
}

impl From<serde_json::Error> for GuardError {
    fn from(e: serde_json::Error) -> Self {
        GuardError::Serialization(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for GuardError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        GuardError::Poisoned
    }
}
