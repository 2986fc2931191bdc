//! Zeroizing holders for PIN digits and verified secrets
//!
//! Both are wiped on drop and never print their contents.

use std::fmt;

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Digits typed so far
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct PinBuffer(String);

impl PinBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Digits as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no digits were entered
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn push(&mut self, digit: char) {
        self.0.push(digit);
    }

    pub(crate) fn pop(&mut self) {
        self.0.pop();
    }

    /// Move the digits out, leaving the buffer empty
    pub(crate) fn take(&mut self) -> PinBuffer {
        PinBuffer(std::mem::take(&mut self.0))
    }
}

impl From<&str> for PinBuffer {
    fn from(digits: &str) -> Self {
        Self(digits.to_string())
    }
}

impl fmt::Debug for PinBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PinBuffer({})", "*".repeat(self.0.len()))
    }
}

/// Value released by a successful verification
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}
