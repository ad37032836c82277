//! Slotwatch - booking slot watcher
//!
//! Drives an already open booking page in Chrome: keeps clicking through
//! weekly availability, classifies every search response, and claims free
//! slots the moment one shows up. Runs are time-boxed, rate-limited and
//! followed by a cooldown.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`session`] - Session controller actor, countdown and cooldown gate
//! - [`agent`] - Page automation actor (clicks, dialogs, housekeeping, recovery)
//! - [`classifier`] - Response classification and pattern extraction
//! - [`reservation`] - Claim planning and reservation panel evaluation
//! - [`page`] - Page abstraction and the Chrome DevTools driver
//! - [`channel`] - Request/reply channel between controller and agent
//! - [`state`] / [`store`] - Persisted session blob and its storage
//! - [`alerts`] - Alert events and sinks
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Custom error types and handling
//! - [`runtime`] - Process wiring for `slotwatch run`
//! - [`testing`] - Testing infrastructure (mocks, fixtures)
//!
//! # Example
//!
//! ```rust,ignore
//! use slotwatch::config::WatchConfig;
//! use slotwatch::runtime::{RunOptions, Runner};
//!
//! let state_dir = WatchConfig::default_state_dir();
//! let config = WatchConfig::load(&state_dir)?;
//! let summary = Runner::new(
//!     RunOptions { state_dir, keep_running_on_signal: true },
//!     config,
//! )
//! .run()
//! .await?;
//! println!("{} clicks", summary.clicks);
//! ```

pub mod agent;
pub mod alerts;
pub mod channel;
pub mod classifier;
pub mod config;
pub mod error;
pub mod page;
pub mod reservation;
pub mod runtime;
pub mod session;
pub mod state;
pub mod store;
pub mod testing;

// Re-export commonly used types
pub use error::{IntoSlotwatchError, Result, SlotwatchError};

// Re-export config types
pub use config::{ConfigHandle, SessionConfig, SettingsSource, WatchConfig};

// Re-export session types
pub use session::{
    CooldownGate, GateDecision, RecoveryReport, SessionController, SessionHandle, SessionState,
    SessionStatus,
};

// Re-export classification types
pub use classifier::{Classification, PatternExtractor, ResponseClassifier};

// Re-export page types
pub use page::{Control, FormField, PageDriver, PageEvent, PageRegion};

// Re-export alert types
pub use alerts::{AlertEvent, AlertSink};

// Re-export persistence types
pub use state::PersistedState;
pub use store::{FileStateStore, MemoryStateStore, StateStore};

// Re-export testing types for convenience
pub use testing::{MockPageDriver, RecordingAlertSink, StaticSettings};
