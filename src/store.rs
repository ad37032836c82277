//! Durable key-value storage for the session blob.
//!
//! The store knows nothing about the shape of what it holds: it moves a
//! single JSON document in and out. Schema checks live with
//! [`crate::state::PersistedState`].
//!
//! [`FileStateStore`] gives the guarantees the controller relies on:
//! - Atomic writes (temp file + rename), so a crash never leaves half a blob
//! - An exclusive lock file, so two watchers never interleave writes
//! - Corrupted files are deleted with a warning and read back as empty

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde_json::Value;
use tracing::warn;

use crate::error::{IntoSlotwatchError, Result};

/// State file name inside the state directory.
const STATE_FILE: &str = "state.json";

/// Temporary file suffix for atomic writes.
const TMP_SUFFIX: &str = ".tmp";

/// Lock file suffix for concurrent access prevention.
const LOCK_SUFFIX: &str = ".lock";

/// Durable store for one JSON document. Last write wins.
pub trait StateStore: Send + Sync {
    /// Read the stored document, if any.
    fn load(&self) -> Result<Option<Value>>;

    /// Replace the stored document.
    fn save(&self, value: &Value) -> Result<()>;

    /// Remove the stored document.
    fn clear(&self) -> Result<()>;
}

/// File-backed store in a state directory.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. Nothing is touched until the first save.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_file_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn tmp_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{TMP_SUFFIX}"))
    }

    fn lock_file_path(&self) -> PathBuf {
        self.dir.join(format!("{STATE_FILE}{LOCK_SUFFIX}"))
    }

    /// Checks if a state file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.state_file_path().exists()
    }
}

impl StateStore for FileStateStore {
    fn load(&self) -> Result<Option<Value>> {
        let state_path = self.state_file_path();
        if !state_path.exists() {
            return Ok(None);
        }

        let lock_path = self.lock_file_path();
        let _lock = if lock_path.exists() {
            let lock_file = File::open(&lock_path)?;
            FileExt::lock_shared(&lock_file).into_store_error()?;
            Some(lock_file)
        } else {
            None
        };

        let mut file = match File::open(&state_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        match serde_json::from_str(&contents) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(
                    "Corrupted state file at {}: {}. Deleting and starting fresh.",
                    state_path.display(),
                    e
                );
                let _ = fs::remove_file(&state_path);
                Ok(None)
            }
        }
    }

    fn save(&self, value: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let lock_file = File::create(self.lock_file_path())?;
        FileExt::lock_exclusive(&lock_file).into_store_error()?;

        let tmp_path = self.tmp_file_path();
        let json = serde_json::to_string_pretty(value)?;

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(json.as_bytes())?;
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, self.state_file_path())?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let state_path = self.state_file_path();
        if state_path.exists() {
            fs::remove_file(&state_path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and `--no-persist` runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    value: Mutex<Option<Value>>,
}

impl MemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store.
    #[must_use]
    pub fn with_value(value: Value) -> Self {
        Self {
            value: Mutex::new(Some(value)),
        }
    }

    /// Copy of the current document.
    #[must_use]
    pub fn snapshot(&self) -> Option<Value> {
        self.value
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<Option<Value>> {
        Ok(self.snapshot())
    }

    fn save(&self, value: &Value) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = Some(value.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.value.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}
