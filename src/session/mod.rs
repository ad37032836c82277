//! Session lifecycle: status, countdown bookkeeping and the cooldown gate.
//!
//! The [`controller`] module owns the running state machine; this module
//! holds the plain data it mutates plus the pure decision functions that
//! are easy to test in isolation.
//!
//! # States
//!
//! ```text
//!   Idle ──start()──► Running ◄──resume()── Paused
//!    ▲                  │  └────pause()──────►│
//!    └────stop()────────┴─────────stop()──────┘
//! ```

pub mod controller;
pub mod signals;
pub mod timers;

pub use controller::{
    ControllerOptions, RecoveryReport, SessionCommand, SessionController, SessionEvent,
    SessionHandle,
};
pub use signals::{ShutdownResult, SignalHandler, SignalHandlerConfig};
pub use timers::TimerSlot;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;

/// Seconds before the end of a run at which the ending-soon flag is raised.
pub const ENDING_SOON_SECS: u64 = 10;

/// Lifecycle status of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Running,
    Paused,
}

impl SessionStatus {
    /// Running or Paused.
    #[must_use]
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Idle)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Controller-owned session fields, persisted after every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    /// Seconds left in the current run. Never negative by construction.
    pub countdown_remaining_secs: u64,
    /// Set on every stop.
    pub last_active_at: Option<DateTime<Utc>>,
    /// Set only when a run was served to the end; drives the cooldown gate.
    pub last_full_duration_stop_at: Option<DateTime<Utc>>,
    /// The ending-soon notice was already raised for this run.
    pub cooldown_alert_sent: bool,
}

impl SessionState {
    /// Record a stop at `now`.
    pub fn mark_stopped(&mut self, completed_full_duration: bool, now: DateTime<Utc>) {
        self.status = SessionStatus::Idle;
        self.last_active_at = Some(now);
        if completed_full_duration {
            self.last_full_duration_stop_at = Some(now);
            self.countdown_remaining_secs = 0;
        }
    }

    /// Decrement the countdown by one second.
    ///
    /// Returns true when the countdown just reached zero.
    pub fn tick(&mut self) -> bool {
        if self.countdown_remaining_secs == 0 {
            return false;
        }
        self.countdown_remaining_secs -= 1;
        self.countdown_remaining_secs == 0
    }

    /// Raise the ending-soon flag once per run. Returns true the first time.
    pub fn check_ending_soon(&mut self) -> bool {
        if self.countdown_remaining_secs <= ENDING_SOON_SECS && !self.cooldown_alert_sent {
            self.cooldown_alert_sent = true;
            return true;
        }
        false
    }
}

// ============================================================================
// Cooldown gate
// ============================================================================

/// Outcome of [`CooldownGate::evaluate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The previous run stopped early; continue with what was left.
    Resume { remaining_secs: u64 },
    /// No full-duration run on record; start from the full duration.
    Fresh { duration_secs: u64 },
    /// Cooldown has elapsed; reset to the full duration and clear timestamps.
    Reset { duration_secs: u64 },
    /// Still cooling down.
    Reject { remaining_minutes: i64 },
}

impl GateDecision {
    #[must_use]
    pub fn is_accepted(self) -> bool {
        !matches!(self, Self::Reject { .. })
    }

    /// Apply an accepted decision to the session fields.
    ///
    /// Rejections leave the state untouched.
    pub fn apply(self, state: &mut SessionState) {
        match self {
            Self::Resume { remaining_secs } => state.countdown_remaining_secs = remaining_secs,
            Self::Fresh { duration_secs } => state.countdown_remaining_secs = duration_secs,
            Self::Reset { duration_secs } => {
                state.countdown_remaining_secs = duration_secs;
                state.last_active_at = None;
                state.last_full_duration_stop_at = None;
            }
            Self::Reject { .. } => {}
        }
    }
}

/// Decides whether a session may start, and with how much time.
pub struct CooldownGate;

impl CooldownGate {
    /// Evaluate the gate at `now`.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use slotwatch::config::SessionConfig;
    /// use slotwatch::session::{CooldownGate, GateDecision, SessionState};
    ///
    /// let now = Utc::now();
    /// let state = SessionState {
    ///     last_full_duration_stop_at: Some(now - Duration::minutes(10)),
    ///     ..SessionState::default()
    /// };
    /// let decision = CooldownGate::evaluate(&state, &SessionConfig::default(), now);
    /// assert_eq!(decision, GateDecision::Reject { remaining_minutes: 35 });
    /// ```
    #[must_use]
    pub fn evaluate(state: &SessionState, config: &SessionConfig, now: DateTime<Utc>) -> GateDecision {
        if state.countdown_remaining_secs > 0 {
            return GateDecision::Resume {
                remaining_secs: state.countdown_remaining_secs,
            };
        }

        let duration_secs = config.full_duration_secs();
        let Some(stopped_at) = state.last_full_duration_stop_at else {
            return GateDecision::Fresh { duration_secs };
        };

        let elapsed_secs = (now - stopped_at).num_seconds().max(0);
        let cooldown_secs = i64::from(config.cooldown_minutes) * 60;
        if elapsed_secs >= cooldown_secs {
            GateDecision::Reset { duration_secs }
        } else {
            let remaining_secs = cooldown_secs - elapsed_secs;
            GateDecision::Reject {
                remaining_minutes: (remaining_secs + 59) / 60,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn config(max_running: u32, cooldown: u32) -> SessionConfig {
        SessionConfig {
            max_running_minutes: max_running,
            cooldown_minutes: cooldown,
            ..SessionConfig::default()
        }
    }

    fn stopped_ago(minutes: i64, now: DateTime<Utc>) -> SessionState {
        SessionState {
            last_active_at: Some(now - Duration::minutes(minutes)),
            last_full_duration_stop_at: Some(now - Duration::minutes(minutes)),
            ..SessionState::default()
        }
    }

    #[test]
    fn test_gate_resumes_remaining_time() {
        let now = Utc::now();
        let mut state = stopped_ago(1, now);
        state.countdown_remaining_secs = 300;
        assert_eq!(
            CooldownGate::evaluate(&state, &config(20, 45), now),
            GateDecision::Resume { remaining_secs: 300 }
        );
    }

    #[test]
    fn test_gate_fresh_without_full_duration_stop() {
        let now = Utc::now();
        let state = SessionState {
            last_active_at: Some(now),
            ..SessionState::default()
        };
        assert_eq!(
            CooldownGate::evaluate(&state, &config(20, 45), now),
            GateDecision::Fresh { duration_secs: 1200 }
        );
    }

    #[test]
    fn test_cooldown_scenario_rejects_then_accepts() {
        let now = Utc::now();
        let cfg = config(20, 45);

        let decision = CooldownGate::evaluate(&stopped_ago(10, now), &cfg, now);
        assert_eq!(decision, GateDecision::Reject { remaining_minutes: 35 });

        let decision = CooldownGate::evaluate(&stopped_ago(46, now), &cfg, now);
        assert_eq!(decision, GateDecision::Reset { duration_secs: 1200 });
    }

    #[test]
    fn test_cooldown_resets_iff_elapsed_reaches_cooldown() {
        let now = Utc::now();
        for cooldown in [1_u32, 5, 45, 90] {
            let cfg = config(20, cooldown);
            for elapsed in 0..(i64::from(cooldown) + 3) {
                let decision = CooldownGate::evaluate(&stopped_ago(elapsed, now), &cfg, now);
                if elapsed >= i64::from(cooldown) {
                    assert!(decision.is_accepted(), "C={cooldown} E={elapsed}");
                } else {
                    assert_eq!(
                        decision,
                        GateDecision::Reject {
                            remaining_minutes: i64::from(cooldown) - elapsed
                        },
                        "C={cooldown} E={elapsed}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_reject_rounds_partial_minutes_up() {
        let now = Utc::now();
        let state = SessionState {
            last_full_duration_stop_at: Some(now - Duration::seconds(30)),
            ..SessionState::default()
        };
        assert_eq!(
            CooldownGate::evaluate(&state, &config(20, 1), now),
            GateDecision::Reject { remaining_minutes: 1 }
        );
    }

    #[test]
    fn test_reset_clears_timestamps() {
        let now = Utc::now();
        let mut state = stopped_ago(50, now);
        GateDecision::Reset { duration_secs: 1200 }.apply(&mut state);
        assert_eq!(state.countdown_remaining_secs, 1200);
        assert!(state.last_full_duration_stop_at.is_none());
        assert!(state.last_active_at.is_none());
    }

    #[test]
    fn test_reject_leaves_state_untouched() {
        let now = Utc::now();
        let mut state = stopped_ago(5, now);
        let before = state.clone();
        GateDecision::Reject { remaining_minutes: 40 }.apply(&mut state);
        assert_eq!(state, before);
    }

    #[test]
    fn test_mark_stopped_early_keeps_countdown() {
        let now = Utc::now();
        let mut state = SessionState {
            status: SessionStatus::Running,
            countdown_remaining_secs: 500,
            ..SessionState::default()
        };
        state.mark_stopped(false, now);
        assert_eq!(state.status, SessionStatus::Idle);
        assert_eq!(state.last_active_at, Some(now));
        assert!(state.last_full_duration_stop_at.is_none());
        assert_eq!(state.countdown_remaining_secs, 500);
    }

    #[test]
    fn test_mark_stopped_full_duration_sets_stop_time() {
        let now = Utc::now();
        let mut state = SessionState::default();
        state.mark_stopped(true, now);
        assert_eq!(state.last_full_duration_stop_at, Some(now));
    }

    #[test]
    fn test_tick_never_goes_negative() {
        let mut state = SessionState {
            countdown_remaining_secs: 2,
            ..SessionState::default()
        };
        assert!(!state.tick());
        assert!(state.tick());
        assert!(!state.tick());
        assert_eq!(state.countdown_remaining_secs, 0);
    }

    #[test]
    fn test_ending_soon_raised_once() {
        let mut state = SessionState {
            countdown_remaining_secs: 11,
            ..SessionState::default()
        };
        assert!(!state.check_ending_soon());
        state.tick();
        assert!(state.check_ending_soon());
        state.tick();
        assert!(!state.check_ending_soon());
    }
}
