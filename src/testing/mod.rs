//! Testing infrastructure for slotwatch.
//!
//! Test doubles for every collaborator the core talks to, so the session
//! controller, page agent and claim workflow run without a browser or a
//! backend.
//!
//! - **Mocks**: [`MockPageDriver`], [`RecordingAlertSink`], [`StaticSettings`]
//! - **Fixtures**: canned response bodies and a temporary state dir (test-only)
//! - **Assertions**: checks over recorded alerts
//!
//! # Example
//!
//! ```
//! use slotwatch::alerts::{AlertEvent, AlertSink};
//! use slotwatch::testing::{assert_alerts, RecordingAlertSink};
//!
//! let sink = RecordingAlertSink::new();
//! sink.emit(AlertEvent::SessionStart);
//! assert_alerts(&sink, &["session-start"]);
//! ```

pub mod assertions;
#[cfg(test)]
pub mod fixtures;
pub mod mocks;

pub use assertions::*;
#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
