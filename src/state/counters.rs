//! Per-control click counters with a local-day daily total.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Navigation control a click was made on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickKind {
    NextAvailable,
    PreviousAvailable,
    NextWeek,
    PreviousWeek,
}

impl std::fmt::Display for ClickKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NextAvailable => write!(f, "next_available"),
            Self::PreviousAvailable => write!(f, "previous_available"),
            Self::NextWeek => write!(f, "next_week"),
            Self::PreviousWeek => write!(f, "previous_week"),
        }
    }
}

/// Click statistics.
///
/// Per-control counts and `session_total` cover the current run; the
/// daily total rolls over at the local-day boundary.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use slotwatch::state::{ClickCounters, ClickKind};
///
/// let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
/// let mut counters = ClickCounters::default();
/// counters.record(ClickKind::NextAvailable, today);
/// counters.record(ClickKind::PreviousAvailable, today);
/// assert_eq!(counters.session_total, 2);
/// assert_eq!(counters.daily_total, 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickCounters {
    pub next_available: u32,
    pub previous_available: u32,
    pub next_week: u32,
    pub previous_week: u32,
    pub session_total: u32,
    pub daily_total: u32,
    /// Local day `daily_total` belongs to.
    pub day: Option<NaiveDate>,
}

impl ClickCounters {
    /// Record one completed click and return the daily total after it.
    pub fn record(&mut self, kind: ClickKind, today: NaiveDate) -> u32 {
        self.roll_day(today);
        match kind {
            ClickKind::NextAvailable => self.next_available += 1,
            ClickKind::PreviousAvailable => self.previous_available += 1,
            ClickKind::NextWeek => self.next_week += 1,
            ClickKind::PreviousWeek => self.previous_week += 1,
        }
        self.session_total += 1;
        self.daily_total += 1;
        self.daily_total
    }

    /// Zero the daily total if `today` is a different day than the one recorded.
    ///
    /// Returns true when a rollover happened.
    pub fn roll_day(&mut self, today: NaiveDate) -> bool {
        if self.day == Some(today) {
            return false;
        }
        self.day = Some(today);
        self.daily_total = 0;
        true
    }

    /// Clicks made today, accounting for a pending rollover.
    #[must_use]
    pub fn daily_total_on(&self, today: NaiveDate) -> u32 {
        if self.day == Some(today) {
            self.daily_total
        } else {
            0
        }
    }

    /// Zero the per-run counts, keeping the daily total.
    pub fn reset_session(&mut self) {
        self.next_available = 0;
        self.previous_available = 0;
        self.next_week = 0;
        self.previous_week = 0;
        self.session_total = 0;
    }

    /// Count recorded for one control.
    #[must_use]
    pub fn count(&self, kind: ClickKind) -> u32 {
        match kind {
            ClickKind::NextAvailable => self.next_available,
            ClickKind::PreviousAvailable => self.previous_available,
            ClickKind::NextWeek => self.next_week,
            ClickKind::PreviousWeek => self.previous_week,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    #[test]
    fn test_record_increments_kind_and_totals() {
        let mut counters = ClickCounters::default();
        counters.record(ClickKind::NextAvailable, day(1));
        counters.record(ClickKind::NextAvailable, day(1));
        counters.record(ClickKind::PreviousWeek, day(1));

        assert_eq!(counters.count(ClickKind::NextAvailable), 2);
        assert_eq!(counters.count(ClickKind::PreviousWeek), 1);
        assert_eq!(counters.session_total, 3);
        assert_eq!(counters.daily_total, 3);
    }

    #[test]
    fn test_daily_total_rolls_over_at_day_boundary() {
        let mut counters = ClickCounters::default();
        counters.record(ClickKind::NextAvailable, day(1));
        counters.record(ClickKind::NextAvailable, day(1));

        let total = counters.record(ClickKind::NextAvailable, day(2));
        assert_eq!(total, 1);
        assert_eq!(counters.session_total, 3);
        assert_eq!(counters.day, Some(day(2)));
    }

    #[test]
    fn test_daily_total_on_other_day_is_zero() {
        let mut counters = ClickCounters::default();
        counters.record(ClickKind::NextWeek, day(1));
        assert_eq!(counters.daily_total_on(day(1)), 1);
        assert_eq!(counters.daily_total_on(day(2)), 0);
    }

    #[test]
    fn test_reset_session_keeps_daily_total() {
        let mut counters = ClickCounters::default();
        counters.record(ClickKind::PreviousAvailable, day(1));
        counters.reset_session();
        assert_eq!(counters.session_total, 0);
        assert_eq!(counters.previous_available, 0);
        assert_eq!(counters.daily_total, 1);
    }

    #[test]
    fn test_click_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ClickKind::PreviousAvailable).unwrap();
        assert_eq!(json, "\"previous_available\"");
    }
}
