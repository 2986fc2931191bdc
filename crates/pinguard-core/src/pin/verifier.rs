//! Verification capability consumed by the PIN machine

use async_trait::async_trait;

use super::credential::PinCredential;
use super::secret::Secret;

/// Outcome of checking a candidate PIN
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationVerdict {
    /// The PIN matched; carries the value released on success
    Correct(Secret),
    /// The PIN did not match
    Incorrect,
    /// The check could not reach its backend
    NetworkError,
    /// The backend failed while checking
    ServerError,
    /// Any other failure while checking
    OtherError(String),
}

/// Checks a candidate PIN
///
/// Implementations may take arbitrarily long (remote comparison, memory-hard
/// hashing). Failures to check are reported as verdicts, never as errors.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Check `candidate`
    async fn verify(&self, candidate: &str) -> VerificationVerdict;
}

/// Verifier comparing against a locally stored Argon2id hash
#[derive(Debug, Clone)]
pub struct LocalPinVerifier {
    credential: PinCredential,
}

impl LocalPinVerifier {
    /// Verify against `credential`
    pub fn new(credential: PinCredential) -> Self {
        Self { credential }
    }
}

#[async_trait]
impl Verifier for LocalPinVerifier {
    async fn verify(&self, candidate: &str) -> VerificationVerdict {
        let credential = self.credential.clone();
        let pin = Secret::new(candidate);

        // Argon2 is memory-hard; keep it off the async workers
        let checked = tokio::task::spawn_blocking(move || {
            credential.matches(pin.expose()).map(|matched| (matched, pin))
        })
        .await;

        match checked {
            Ok(Ok((true, pin))) => VerificationVerdict::Correct(pin),
            Ok(Ok((false, _))) => VerificationVerdict::Incorrect,
            Ok(Err(e)) => VerificationVerdict::OtherError(e.to_string()),
            Err(e) => VerificationVerdict::OtherError(format!("verification task failed: {}", e)),
        }
    }
}
