//! Displayed week and target window arithmetic.

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::classifier::extract::parse_loose_date;
use crate::config::SessionConfig;
use crate::page::Control;
use crate::state::ClickKind;

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Share at least one day.
    #[must_use]
    pub fn overlaps(&self, other: &Period) -> bool {
        self.start <= other.end && self.end >= other.start
    }
}

fn range_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(\d+)(?:st|nd|rd|th)?\s+(\w+)\s+(\d{4})\s*[–—-]\s*(\d+)(?:st|nd|rd|th)?\s+(\w+)\s+(\d{4})",
        )
        .ok()
    })
    .as_ref()
}

/// Parse `23rd March 2026 – 29th March 2026`.
///
/// En dash, em dash and hyphen separators are accepted, ordinal suffixes
/// are optional.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use slotwatch::agent::period::parse_period;
///
/// let period = parse_period("23rd March 2026 – 29th March 2026").unwrap();
/// assert_eq!(period.start, NaiveDate::from_ymd_opt(2026, 3, 23).unwrap());
/// assert_eq!(period.end, NaiveDate::from_ymd_opt(2026, 3, 29).unwrap());
/// ```
#[must_use]
pub fn parse_period(text: &str) -> Option<Period> {
    let caps = range_regex()?.captures(text)?;
    let start = parse_loose_date(&format!("{} {} {}", &caps[1], &caps[2], &caps[3]))?;
    let end = parse_loose_date(&format!("{} {} {}", &caps[4], &caps[5], &caps[6]))?;
    Some(Period::new(start, end))
}

/// Window the watcher is looking for slots in: today until the deadline.
#[must_use]
pub fn target_period(config: &SessionConfig, today: NaiveDate) -> Period {
    Period::new(today, config.search_end(today))
}

/// Navigation control to use next.
///
/// Outside the target window the site is walked back; inside it the site is
/// asked for the next available week.
#[must_use]
pub fn choose_control(current: &Period, target: &Period) -> (Control, ClickKind) {
    if current.overlaps(target) {
        (Control::NextAvailable, ClickKind::NextAvailable)
    } else {
        (Control::PreviousAvailable, ClickKind::PreviousAvailable)
    }
}
