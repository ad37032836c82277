//! The booking page as seen by the watcher.
//!
//! [`PageDriver`] is the only way the rest of the crate touches the browser.
//! Regions and controls are named by what they mean to the workflow; the
//! CSS selectors behind them live here and nowhere else.

pub mod cdp;

pub use cdp::CdpPageDriver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::Result;

/// Readable part of the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageRegion {
    /// Displayed week, e.g. `23rd March 2026 – 29th March 2026`.
    DateRange,
    /// Weekly navigation buttons.
    NavigationButtons,
    /// Any open modal dialog.
    OpenDialog,
    /// The "you pressed back" warning dialog.
    WarningDialog,
    /// Rows of the reserved-tests sidebar.
    ReservedRows,
    /// Header rows of the sidebar naming the test centre.
    TestCentreRows,
    /// Claim buttons still available on a day page.
    ClaimControls,
    /// Booking countdown notice.
    BookingNotice,
    /// Minutes left to complete the booking.
    MinutesToTimeout,
    /// First section heading, naming the location on a day page.
    LocationHeading,
    /// Error banner.
    ErrorBanner,
    /// First paragraph of the page.
    LeadParagraph,
    /// Embedded challenge widget.
    ChallengeWidget,
    /// Site key attribute of the challenge widget.
    ChallengeSitekey,
    /// Main heading of the sign-in pages.
    PageHeading,
}

impl PageRegion {
    /// CSS selector for the region.
    #[must_use]
    pub fn selector(self) -> &'static str {
        match self {
            Self::DateRange => ".span-7 .centre.bold",
            Self::NavigationButtons => {
                "#searchForWeeklySlotsNextAvailable, #searchForWeeklySlotsPreviousAvailable"
            }
            Self::OpenDialog => ".ui-dialog",
            Self::WarningDialog => {
                "#back-button-warning-dialog, .ui-dialog[aria-describedby=\"back-button-warning-dialog\"]"
            }
            Self::ReservedRows => "#orderSideBar tbody tr",
            Self::TestCentreRows => "#orderSideBar tbody tr.first, #orderSideBar tbody tr.searchcriteria",
            Self::ClaimControls => "a[id^=\"reserve_\"]",
            Self::BookingNotice => "div.notice.clockIcon",
            Self::MinutesToTimeout => "#minutesToTimeout",
            Self::LocationHeading => "h3",
            Self::ErrorBanner => ".error",
            Self::LeadParagraph => "p",
            Self::ChallengeWidget => {
                ".h-captcha, [class*=\"hcaptcha\"], iframe[src*=\"hcaptcha.com\"]"
            }
            Self::ChallengeSitekey => "[data-sitekey]",
            Self::PageHeading => "h1.govuk-heading-xl",
        }
    }

    /// Attribute read instead of the text content, if any.
    #[must_use]
    pub fn attribute(self) -> Option<&'static str> {
        match self {
            Self::ChallengeSitekey => Some("data-sitekey"),
            _ => None,
        }
    }
}

/// Clickable control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Control {
    NextAvailable,
    PreviousAvailable,
    /// "Change your search criteria".
    RefreshFilters,
    /// Close button of the open dialog. Clicking it reloads the page.
    CloseDialog,
    /// "Okay, thanks" in the back-button warning.
    DismissWarning,
    ReturnToResults,
    /// Submit button of the sign-in forms.
    SignIn,
    /// "Stay signed in" choice on the already-signed-in page.
    StaySignedIn,
}

impl Control {
    /// Selectors tried in order; the first match is clicked.
    #[must_use]
    pub fn selectors(self) -> &'static [&'static str] {
        match self {
            Self::NextAvailable => &["#searchForWeeklySlotsNextAvailable"],
            Self::PreviousAvailable => &["#searchForWeeklySlotsPreviousAvailable"],
            Self::RefreshFilters => &["#refineSearch2"],
            Self::CloseDialog => &[
                ".ui-dialog-titlebar-close",
                "button[title=\"close\"]",
                ".ui-dialog-titlebar .ui-button",
                ".ui-dialog .ui-dialog-titlebar button",
            ],
            Self::DismissWarning => &["#backButtonCloseDialog"],
            Self::ReturnToResults => &["a[href*=\"_eventId=returnToSearchResults\"]"],
            Self::SignIn => &["#continue", "button[type=\"submit\"]", "button.govuk-button"],
            Self::StaySignedIn => &["#confirm-Stay"],
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::NextAvailable => "next_available",
            Self::PreviousAvailable => "previous_available",
            Self::RefreshFilters => "refresh_filters",
            Self::CloseDialog => "close_dialog",
            Self::DismissWarning => "dismiss_warning",
            Self::ReturnToResults => "return_to_results",
            Self::SignIn => "sign_in",
            Self::StaySignedIn => "stay_signed_in",
        }
    }
}

impl std::fmt::Display for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Text input of the sign-in form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormField {
    UserId,
    Password,
}

impl FormField {
    /// Selectors tried in order; the first match is filled.
    #[must_use]
    pub fn selectors(self) -> &'static [&'static str] {
        match self {
            Self::UserId => &["#user_id", "input[name=\"user_id\"]"],
            Self::Password => &["#password", "input[name=\"password\"]"],
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UserId => "user_id",
            Self::Password => "password",
        }
    }
}

/// A network response captured before the page consumed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedResponse {
    pub url: String,
    pub status: u16,
    pub body: String,
}

/// Something that happened on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    /// A whitelisted response was intercepted.
    Response(InterceptedResponse),
    /// A document finished loading.
    Loaded { url: String },
    /// The DOM changed; used to look for interstitial dialogs.
    DomChanged,
}

/// Access to the booking page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Text of the first element of a region.
    async fn read_region(&self, region: PageRegion) -> Result<Option<String>>;

    /// Text of every element of a region.
    async fn read_all(&self, region: PageRegion) -> Result<Vec<String>>;

    /// Number of elements matching a region.
    async fn count(&self, region: PageRegion) -> Result<usize>;

    /// Whether the first element of a region is displayed.
    async fn is_visible(&self, region: PageRegion) -> Result<bool>;

    /// Click a control. Fails with `ControlNotFound` when no selector matches.
    async fn trigger(&self, control: Control) -> Result<()>;

    /// Type `value` into a form field, firing its input and change events.
    /// Fails with `ControlNotFound` when no selector matches.
    async fn fill(&self, field: FormField, value: &str) -> Result<()>;

    /// Replace the current document with `url` (no history entry).
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Fetch `url` with the page's cookies and return the body.
    async fn fetch(&self, url: &str) -> Result<String>;

    /// URL of the current document.
    async fn current_url(&self) -> Result<String>;

    /// Stream of page events. Each call returns a new subscription.
    async fn subscribe(&self) -> Result<mpsc::Receiver<PageEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_selectors_non_empty() {
        for control in [
            Control::NextAvailable,
            Control::PreviousAvailable,
            Control::RefreshFilters,
            Control::CloseDialog,
            Control::DismissWarning,
            Control::ReturnToResults,
            Control::SignIn,
            Control::StaySignedIn,
        ] {
            assert!(!control.selectors().is_empty(), "{control}");
        }
    }

    #[test]
    fn test_close_dialog_has_fallbacks() {
        assert_eq!(Control::CloseDialog.selectors()[0], ".ui-dialog-titlebar-close");
        assert!(Control::CloseDialog.selectors().len() > 1);
    }

    #[test]
    fn test_region_selectors() {
        assert_eq!(PageRegion::DateRange.selector(), ".span-7 .centre.bold");
        assert_eq!(PageRegion::ChallengeSitekey.attribute(), Some("data-sitekey"));
        assert_eq!(PageRegion::DateRange.attribute(), None);
        assert!(PageRegion::WarningDialog.selector().contains("back-button-warning-dialog"));
    }

    #[test]
    fn test_sign_in_selectors() {
        assert_eq!(FormField::UserId.selectors()[0], "#user_id");
        assert_eq!(FormField::Password.selectors()[0], "#password");
        assert_eq!(Control::SignIn.selectors()[0], "#continue");
        assert_eq!(Control::StaySignedIn.selectors(), &["#confirm-Stay"]);
    }
}
