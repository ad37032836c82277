//! Everything the watcher persists between process runs.
//!
//! # Architecture
//!
//! ```text
//! PersistedState
//!   ├── metadata: StateMetadata (version, timestamps, pid)
//!   ├── session: SessionState (status, countdown, stop timestamps)
//!   ├── counters: ClickCounters (per-control and daily clicks)
//!   ├── claim_queue: ClaimLinkQueue (claim links still to visit)
//!   ├── claim_active: bool (a claim is in progress)
//!   ├── housekeeping: bool (paused for a filter refresh)
//!   ├── log: EventLog (last 1000 events)
//!   └── config: Option<SessionConfig> (snapshot used by the last run)
//! ```
//!
//! [`PersistedState::load`] and [`PersistedState::save`] are the only
//! places the in-memory model meets the [`StateStore`]. A blob written by an
//! incompatible version, or one that no longer deserializes, is discarded
//! with a warning and the watcher starts fresh.

pub mod counters;
pub mod log;
pub mod queue;

pub use counters::{ClickCounters, ClickKind};
pub use log::{EventLog, LogEntry, LogLevel, EVENT_LOG_CAPACITY};
pub use queue::ClaimLinkQueue;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::session::SessionState;
use crate::store::StateStore;

/// Current schema version for the persisted blob.
/// Increment when making breaking changes to the serialization format.
pub const STATE_VERSION: u32 = 1;

/// Oldest schema version that can still be loaded.
pub const MIN_SUPPORTED_VERSION: u32 = 1;

/// Version and provenance of a persisted blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMetadata {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub saved_at: DateTime<Utc>,
    /// Process that last wrote the blob.
    pub pid: u32,
}

impl StateMetadata {
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            created_at: now,
            saved_at: now,
            pid: std::process::id(),
        }
    }

    /// Updates the saved_at timestamp and PID.
    pub fn touch(&mut self) {
        self.saved_at = Utc::now();
        self.pid = std::process::id();
    }

    #[must_use]
    pub fn is_compatible(&self) -> bool {
        (MIN_SUPPORTED_VERSION..=STATE_VERSION).contains(&self.version)
    }
}

impl Default for StateMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// The full persisted model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub metadata: StateMetadata,
    #[serde(default)]
    pub session: SessionState,
    #[serde(default)]
    pub counters: ClickCounters,
    #[serde(default)]
    pub claim_queue: ClaimLinkQueue,
    /// A slot is being claimed; polling stays off until it resolves.
    #[serde(default)]
    pub claim_active: bool,
    /// The session is paused only for a filter refresh and resumes when it
    /// is done.
    #[serde(default)]
    pub housekeeping: bool,
    #[serde(default)]
    pub log: EventLog,
    #[serde(default)]
    pub config: Option<SessionConfig>,
}

impl PersistedState {
    /// Fresh state with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from the store, returning `None` when there is nothing usable.
    pub fn load(store: &dyn StateStore) -> Result<Option<Self>> {
        let Some(value) = store.load()? else {
            return Ok(None);
        };

        let state: Self = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("Persisted state does not match the current schema: {}. Starting fresh.", e);
                store.clear()?;
                return Ok(None);
            }
        };

        if !state.metadata.is_compatible() {
            warn!(
                "Incompatible state version {} (supported: {}..={}). Starting fresh.",
                state.metadata.version, MIN_SUPPORTED_VERSION, STATE_VERSION
            );
            store.clear()?;
            return Ok(None);
        }

        Ok(Some(state))
    }

    /// Load, or start fresh when the store is empty.
    pub fn load_or_default(store: &dyn StateStore) -> Result<Self> {
        Ok(Self::load(store)?.unwrap_or_default())
    }

    /// Stamp and write to the store.
    pub fn save(&mut self, store: &dyn StateStore) -> Result<()> {
        self.metadata.touch();
        let value = serde_json::to_value(&*self)?;
        store.save(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use crate::store::MemoryStateStore;
    use serde_json::json;

    #[test]
    fn test_metadata_compatibility() {
        let mut metadata = StateMetadata::new();
        assert!(metadata.is_compatible());
        metadata.version = STATE_VERSION + 1;
        assert!(!metadata.is_compatible());
        metadata.version = 0;
        assert!(!metadata.is_compatible());
    }

    #[test]
    fn test_load_empty_store() {
        let store = MemoryStateStore::new();
        assert!(PersistedState::load(&store).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryStateStore::new();
        let mut state = PersistedState::new();
        state.session.status = SessionStatus::Running;
        state.session.countdown_remaining_secs = 600;
        state.claim_queue.replace(["/x".to_string()]);
        state.log.push(LogLevel::Info, "started", None);
        state.save(&store).unwrap();

        let loaded = PersistedState::load(&store).unwrap().unwrap();
        assert_eq!(loaded.session.status, SessionStatus::Running);
        assert_eq!(loaded.session.countdown_remaining_secs, 600);
        assert_eq!(loaded.claim_queue.peek(), Some("/x"));
        assert_eq!(loaded.log.len(), 1);
    }

    #[test]
    fn test_incompatible_version_discarded() {
        let mut state = PersistedState::new();
        state.metadata.version = STATE_VERSION + 5;
        let store = MemoryStateStore::with_value(serde_json::to_value(&state).unwrap());

        assert!(PersistedState::load(&store).unwrap().is_none());
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_schema_mismatch_discarded() {
        let store = MemoryStateStore::with_value(json!({"metadata": "nonsense"}));
        assert!(PersistedState::load(&store).unwrap().is_none());
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn test_missing_sections_default() {
        let metadata = serde_json::to_value(StateMetadata::new()).unwrap();
        let store = MemoryStateStore::with_value(json!({ "metadata": metadata }));

        let loaded = PersistedState::load(&store).unwrap().unwrap();
        assert_eq!(loaded.session.status, SessionStatus::Idle);
        assert!(loaded.claim_queue.is_empty());
        assert!(loaded.config.is_none());
    }
}
