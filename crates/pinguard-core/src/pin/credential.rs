//! Local PIN credential hashed with Argon2id

use std::fs;
use std::path::Path;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{GuardError, Result};
use crate::store::write_private;

/// Current credential file version
const CREDENTIAL_VERSION: u32 = 1;

/// On-disk credential format
#[derive(Serialize, Deserialize)]
struct CredentialFile {
    /// Argon2id PHC string
    hash: String,
    /// Version for future migrations
    version: u32,
}

/// A stored PIN hash
#[derive(Clone)]
pub struct PinCredential {
    hash: String,
}

impl PinCredential {
    /// Hash a new PIN, which must be exactly `length` ASCII digits
    pub fn create(pin: &str, length: usize) -> Result<Self> {
        validate_pin(pin, length)?;

        let salt = SaltString::generate(&mut OsRng);
        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());

        let hash = Argon2::default()
            .hash_password(&pin_bytes, &salt)
            .map_err(|e| GuardError::Crypto(format!("Failed to hash PIN: {}", e)))?
            .to_string();

        Ok(Self { hash })
    }

    /// Wrap an existing PHC hash string
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self { hash: hash.into() }
    }

    /// Constant-time comparison of `pin` against the stored hash
    pub fn matches(&self, pin: &str) -> Result<bool> {
        let parsed = PasswordHash::new(&self.hash)
            .map_err(|e| GuardError::Crypto(format!("Invalid stored hash: {}", e)))?;

        let pin_bytes = Zeroizing::new(pin.as_bytes().to_vec());
        Ok(Argon2::default()
            .verify_password(&pin_bytes, &parsed)
            .is_ok())
    }

    /// Load a credential file; `None` if no PIN was set up
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(path)?;
        let file: CredentialFile = serde_json::from_str(&contents)?;
        if file.version != CREDENTIAL_VERSION {
            return Err(GuardError::Store(format!(
                "Unsupported credential version {}",
                file.version
            )));
        }

        Ok(Some(Self { hash: file.hash }))
    }

    /// Write the credential with owner-only permissions
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = CredentialFile {
            hash: self.hash.clone(),
            version: CREDENTIAL_VERSION,
        };
        let contents = serde_json::to_string_pretty(&file)?;
        write_private(path, contents.as_bytes())
    }
}

impl std::fmt::Debug for PinCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCredential").finish_non_exhaustive()
    }
}

/// Check `pin` is exactly `length` ASCII digits
pub fn validate_pin(pin: &str, length: usize) -> Result<()> {
    if pin.len() != length || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(GuardError::InvalidPin(length));
    }
    Ok(())
}
