//! Durable storage of the failed-attempt state
//!
//! The store holds a single value. A missing value reads as `None` and the
//! throttle treats that as the zero state.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use crate::error::{GuardError, Result};
use crate::throttle::FailedAttemptState;

/// Persistent single-key store for [`FailedAttemptState`]
pub trait AttemptStore: Send + Sync {
    /// Read the stored state, if any
    fn load(&self) -> Result<Option<FailedAttemptState>>;

    /// Replace the stored state
    fn save(&self, state: &FailedAttemptState) -> Result<()>;
}

/// In-memory store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    state: Mutex<Option<FailedAttemptState>>,
}

impl MemoryAttemptStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with `state`
    pub fn with_state(state: FailedAttemptState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn load(&self) -> Result<Option<FailedAttemptState>> {
        Ok(*self.state.lock()?)
    }

    fn save(&self, state: &FailedAttemptState) -> Result<()> {
        *self.state.lock()? = Some(*state);
        Ok(())
    }
}

/// JSON file store with atomic replacement
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store at `path`, creating the parent directory
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(Self { path })
    }

    /// Location of the state file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AttemptStore for JsonFileStore {
    fn load(&self) -> Result<Option<FailedAttemptState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let contents = fs::read_to_string(&self.path)?;
        let state = serde_json::from_str(&contents).map_err(|e| {
            GuardError::Store(format!("Failed to parse {}: {}", self.path.display(), e))
        })?;
        Ok(Some(state))
    }

    fn save(&self, state: &FailedAttemptState) -> Result<()> {
        let contents = serde_json::to_string_pretty(state)?;
        write_private(&self.path, contents.as_bytes())?;
        debug!("Saved attempt state to {:?}", self.path);
        Ok(())
    }
}

/// Write `contents` atomically (temp file then rename), owner-only on Unix
pub(crate) fn write_private(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, contents)?;
    fs::rename(&temp_path, path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
