//! Configuration for the throttle and the PIN entry flow
//!
//! [`GuardConfig`] is the persisted, user-editable form. It is validated into
//! the immutable [`ThrottleConfig`] and [`PinEntryConfig`] values the runtime
//! components take at construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Configuration file name
const CONFIG_FILE_NAME: &str = "config.json";

/// Directory under the platform config/data dirs
const APP_DIR_NAME: &str = "pinguard";

/// Default number of failed attempts before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout window (20 minutes)
pub const DEFAULT_LOCKOUT_SECS: u64 = 20 * 60;

/// Default PIN length at which entry is submitted automatically
pub const DEFAULT_SUBMIT_LENGTH: usize = 4;

/// Immutable throttle parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottleConfig {
    max_attempts: u32,
    lockout_duration: Duration,
    lockout_delta: chrono::Duration,
}

impl ThrottleConfig {
    /// Create a throttle config, rejecting a zero attempt limit
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Result<Self> {
        if max_attempts == 0 {
            return Err(GuardError::Config(
                "max_attempts must be greater than zero".to_string(),
            ));
        }

        let lockout_delta = chrono::Duration::from_std(lockout_duration)
            .map_err(|e| GuardError::Config(format!("lockout duration out of range: {}", e)))?;

        Ok(Self {
            max_attempts,
            lockout_duration,
            lockout_delta,
        })
    }

    /// Failed attempts that trigger a lockout
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Length of the lockout window
    pub fn lockout_duration(&self) -> Duration {
        self.lockout_duration
    }

    pub(crate) fn lockout_delta(&self) -> chrono::Duration {
        self.lockout_delta
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration: Duration::from_secs(DEFAULT_LOCKOUT_SECS),
            lockout_delta: chrono::Duration::seconds(DEFAULT_LOCKOUT_SECS as i64),
        }
    }
}

/// Immutable PIN entry parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEntryConfig {
    submit_length: usize,
}

impl PinEntryConfig {
    /// Create a PIN entry config; the submit length must be non-zero
    pub fn new(submit_length: usize) -> Result<Self> {
        if submit_length == 0 {
            return Err(GuardError::Config(
                "submit_length must be greater than zero".to_string(),
            ));
        }
        Ok(Self { submit_length })
    }

    /// Number of digits at which the PIN is submitted
    pub fn submit_length(&self) -> usize {
        self.submit_length
    }
}

impl Default for PinEntryConfig {
    fn default() -> Self {
        Self {
            submit_length: DEFAULT_SUBMIT_LENGTH,
        }
    }
}

/// Persisted pinguard configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuardConfig {
    /// Failed attempts before lockout
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Lockout window in seconds
    #[serde(default = "default_lockout_secs")]
    pub lockout_duration_secs: u64,

    /// PIN length that triggers automatic submission
    #[serde(default = "default_submit_length")]
    pub submit_length: usize,

    /// Directory holding the attempt state and PIN credential files
    #[serde(default = "GuardConfig::default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_lockout_secs() -> u64 {
    DEFAULT_LOCKOUT_SECS
}

fn default_submit_length() -> usize {
    DEFAULT_SUBMIT_LENGTH
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_SECS,
            submit_length: DEFAULT_SUBMIT_LENGTH,
            state_dir: Self::default_state_dir(),
        }
    }
}

impl GuardConfig {
    /// Default config file location, honouring `PINGUARD_CONFIG`
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os("PINGUARD_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    fn default_state_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME)
    }

    /// Path of the persisted failed-attempt state
    pub fn attempts_path(&self) -> PathBuf {
        self.state_dir.join("attempts.json")
    }

    /// Path of the stored PIN credential
    pub fn credential_path(&self) -> PathBuf {
        self.state_dir.join("pin.json")
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| GuardError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, writing the defaults if the file does not exist
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every field converts into a runtime config
    pub fn validate(&self) -> Result<()> {
        self.throttle()?;
        self.pin_entry()?;
        Ok(())
    }

    /// Throttle parameters
    pub fn throttle(&self) -> Result<ThrottleConfig> {
        ThrottleConfig::new(
            self.max_attempts,
            Duration::from_secs(self.lockout_duration_secs),
        )
    }

    /// PIN entry parameters
    pub fn pin_entry(&self) -> Result<PinEntryConfig> {
        PinEntryConfig::new(self.submit_length)
    }
}
