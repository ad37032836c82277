//! Reading and judging the reservation panel.
//!
//! A snapshot is taken once per page load while a claim is active and then
//! judged by [`evaluate`], which is pure.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::Result;
use crate::page::{PageDriver, PageRegion};

/// Text a row shows when the sidebar is empty.
pub const EMPTY_ROW_TEXT: &str = "No information found";

/// Fallback when no test-centre header row can be parsed.
pub const UNKNOWN_CENTRE: &str = "Unknown";

/// Fallback when the day page has no location heading.
pub const UNKNOWN_LOCATION: &str = "Unknown location";

const BOOKING_PHRASES: [&str; 2] = [
    "minutes to complete your booking",
    "minute to complete your booking",
];

fn slot_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b(Mon|Tue|Wed|Thu|Fri|Sat|Sun)\s+(\d{1,2})\s+(Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+(\d{4})\s+(\d{2}:\d{2})\b",
        )
        .ok()
    })
    .as_ref()
}

fn centre_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([^(]+)\s*\(([^)]+)\)").ok())
        .as_ref()
}

/// Collapse runs of whitespace to single spaces.
fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Everything [`evaluate`] needs from the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelSnapshot {
    pub notice_text: Option<String>,
    pub minutes_text: Option<String>,
    pub sidebar_rows: Vec<String>,
    pub centre_rows: Vec<String>,
    pub claim_controls: usize,
    pub location_heading: Option<String>,
}

impl PanelSnapshot {
    /// Read the panel regions from the page.
    pub async fn read(driver: &dyn PageDriver) -> Result<Self> {
        Ok(Self {
            notice_text: driver.read_region(PageRegion::BookingNotice).await?,
            minutes_text: driver.read_region(PageRegion::MinutesToTimeout).await?,
            sidebar_rows: driver.read_all(PageRegion::ReservedRows).await?,
            centre_rows: driver.read_all(PageRegion::TestCentreRows).await?,
            claim_controls: driver.count(PageRegion::ClaimControls).await?,
            location_heading: driver.read_region(PageRegion::LocationHeading).await?,
        })
    }

    /// The booking countdown notice is shown.
    #[must_use]
    pub fn has_booking_notice(&self) -> bool {
        self.notice_text.as_deref().is_some_and(|text| {
            let text = normalize(text);
            BOOKING_PHRASES.iter().any(|phrase| text.contains(phrase))
        })
    }

    /// Sidebar rows that are real reserved slots, normalised to
    /// `Fri 20 Mar 2026 08:57`.
    #[must_use]
    pub fn reserved_slots(&self) -> Vec<String> {
        let Some(re) = slot_regex() else {
            return Vec::new();
        };
        self.sidebar_rows
            .iter()
            .map(|row| row.trim())
            .filter(|row| *row != EMPTY_ROW_TEXT)
            .filter_map(|row| {
                let caps = re.captures(row)?;
                Some(format!(
                    "{} {} {} {} {}",
                    &caps[1], &caps[2], &caps[3], &caps[4], &caps[5]
                ))
            })
            .collect()
    }

    /// `Name (Code)` from the last parseable header row.
    #[must_use]
    pub fn test_centre(&self) -> String {
        let Some(re) = centre_regex() else {
            return UNKNOWN_CENTRE.to_string();
        };
        self.centre_rows
            .iter()
            .filter_map(|row| {
                let caps = re.captures(row.trim())?;
                Some(format!("{} ({})", caps[1].trim(), caps[2].trim()))
            })
            .last()
            .unwrap_or_else(|| UNKNOWN_CENTRE.to_string())
    }

    #[must_use]
    pub fn minutes_remaining(&self) -> Option<u32> {
        self.minutes_text.as_deref()?.trim().parse().ok()
    }

    #[must_use]
    pub fn location_info(&self) -> String {
        self.location_heading
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(UNKNOWN_LOCATION)
            .to_string()
    }
}

/// What a claim produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSummary {
    pub minutes_remaining: Option<u32>,
    pub reserved_count: usize,
    pub test_center: String,
    pub slots: Vec<String>,
}

/// Verdict on one panel snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PanelOutcome {
    /// Neither the booking notice nor the sidebar is on this page.
    NotReady,
    /// Claim controls are still offered and nothing is reserved yet.
    InProgress,
    Success(ReservationSummary),
    /// Nothing reserved and nothing left to claim.
    SlotLost { location_info: String },
}

/// Judge a snapshot. `cap` is the most slots the site lets one booking hold.
#[must_use]
pub fn evaluate(snapshot: &PanelSnapshot, cap: usize) -> PanelOutcome {
    if !snapshot.has_booking_notice() && snapshot.sidebar_rows.is_empty() {
        return PanelOutcome::NotReady;
    }

    let slots = snapshot.reserved_slots();
    let reserved = slots.len();
    let controls_left = snapshot.claim_controls > 0;

    if reserved >= cap || (!controls_left && reserved > 0) {
        return PanelOutcome::Success(ReservationSummary {
            minutes_remaining: snapshot.minutes_remaining(),
            reserved_count: reserved,
            test_center: snapshot.test_centre(),
            slots,
        });
    }

    if controls_left {
        return PanelOutcome::InProgress;
    }

    PanelOutcome::SlotLost {
        location_info: snapshot.location_info(),
    }
}
