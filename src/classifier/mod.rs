//! Response classification.
//!
//! Weekly search responses are intercepted before the page renders them and
//! mapped to exactly one [`Classification`]. Checks run in strict priority
//! order and a slot always wins, even when other markers appear in the same
//! body:
//!
//! 1. day-slot marker → [`Classification::SlotFound`] (or `NoSlot` when the
//!    period starts after the deadline or no link can be extracted)
//! 2. interstitial marker → [`Classification::RateLimited`]
//! 3. access-control marker → `FatalSystemError` for code 15, otherwise
//!    [`Classification::CaptchaChallenge`]
//! 4. → [`Classification::NoSlot`]
//!
//! Classification is synchronous so it can run inside the interception hook.

pub mod extract;

pub use extract::{MarkerExtractor, PatternExtractor, DAY_SLOT_MARKER};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::warn;

/// Anti-automation interstitial title.
pub const RATE_LIMIT_MARKER: &str = "Pardon Our Interruption";

/// Access-control resource injected by the site firewall.
pub const ACCESS_CONTROL_MARKER: &str = "_Incapsula_Resource";

/// Error code meaning the client is blocked outright.
pub const FATAL_ERROR_CODE: u32 = 15;

/// Error code meaning an interactive challenge is shown.
pub const CHALLENGE_ERROR_CODE: u32 = 12;

/// Request URL fragments whose responses are classified.
pub const CLASSIFIED_URLS: [&str; 2] = [
    "searchForWeeklySlotsNextAvailable",
    "searchForWeeklySlotsPreviousAvailable",
];

/// Outcome of classifying one response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classification {
    SlotFound {
        claim_link: String,
        period_start: Option<NaiveDate>,
    },
    RateLimited,
    CaptchaChallenge {
        sitekey: Option<String>,
    },
    FatalSystemError {
        code: u32,
    },
    NoSlot,
}

impl Classification {
    /// Short label for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::SlotFound { .. } => "slot_found",
            Self::RateLimited => "rate_limited",
            Self::CaptchaChallenge { .. } => "captcha_challenge",
            Self::FatalSystemError { .. } => "fatal_system_error",
            Self::NoSlot => "no_slot",
        }
    }
}

/// Response classifier with a pluggable [`PatternExtractor`].
pub struct ResponseClassifier {
    extractor: Box<dyn PatternExtractor>,
}

impl Default for ResponseClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResponseClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseClassifier").finish_non_exhaustive()
    }
}

impl ResponseClassifier {
    /// Classifier using [`MarkerExtractor`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_extractor(Box::new(MarkerExtractor))
    }

    #[must_use]
    pub fn with_extractor(extractor: Box<dyn PatternExtractor>) -> Self {
        Self { extractor }
    }

    /// The extractor in use, shared with the reservation workflow.
    #[must_use]
    pub fn extractor(&self) -> &dyn PatternExtractor {
        self.extractor.as_ref()
    }

    /// Whether a response from `url` should be classified at all.
    #[must_use]
    pub fn accepts_url(url: &str) -> bool {
        CLASSIFIED_URLS.iter().any(|fragment| url.contains(fragment))
    }

    /// Classify a body against the last acceptable period start.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use slotwatch::classifier::{Classification, ResponseClassifier};
    ///
    /// let classifier = ResponseClassifier::new();
    /// let deadline = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
    /// assert_eq!(
    ///     classifier.classify("<h1>Pardon Our Interruption</h1>", deadline),
    ///     Classification::RateLimited
    /// );
    /// ```
    #[must_use]
    pub fn classify(&self, body: &str, deadline: NaiveDate) -> Classification {
        if let Some(claim_link) = self.extractor.slot_link(body) {
            let period_start = self.extractor.period_start(body);
            if period_start.is_some_and(|start| start > deadline) {
                return Classification::NoSlot;
            }
            return Classification::SlotFound {
                claim_link,
                period_start,
            };
        }
        if body.contains(DAY_SLOT_MARKER) {
            warn!("Day-slot marker present but no link could be extracted");
            return Classification::NoSlot;
        }

        if body.contains(RATE_LIMIT_MARKER) {
            return Classification::RateLimited;
        }

        if body.contains(ACCESS_CONTROL_MARKER) {
            if error_code(body) == Some(FATAL_ERROR_CODE) {
                return Classification::FatalSystemError {
                    code: FATAL_ERROR_CODE,
                };
            }
            return Classification::CaptchaChallenge {
                sitekey: self.extractor.sitekey(body),
            };
        }

        Classification::NoSlot
    }

    /// Classify a response if its URL is whitelisted.
    #[must_use]
    pub fn classify_response(
        &self,
        url: &str,
        body: &str,
        deadline: NaiveDate,
    ) -> Option<Classification> {
        Self::accepts_url(url).then(|| self.classify(body, deadline))
    }
}

/// Numeric value of the first `edet=` parameter in `body`.
fn error_code(body: &str) -> Option<u32> {
    let start = body.find("edet=")? + "edet=".len();
    let digits: String = body[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLOT_BODY: &str = concat!(
        "<p>Number of available tests between 23 <span>March</span> 2026 &ndash; 29 March 2026</p>",
        r#"<a href="/obs?execution=e1s1&amp;_eventId=searchForDaySlots&amp;date=2026-03-24">Tue</a>"#,
    );

    fn deadline(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_slot_found_within_deadline() {
        let result = ResponseClassifier::new().classify(SLOT_BODY, deadline(2026, 4, 1));
        assert_eq!(
            result,
            Classification::SlotFound {
                claim_link: "/obs?execution=e1s1&_eventId=searchForDaySlots&date=2026-03-24".into(),
                period_start: NaiveDate::from_ymd_opt(2026, 3, 23),
            }
        );
    }

    #[test]
    fn test_slot_after_deadline_is_no_slot() {
        let result = ResponseClassifier::new().classify(SLOT_BODY, deadline(2026, 3, 22));
        assert_eq!(result, Classification::NoSlot);
    }

    #[test]
    fn test_period_on_deadline_is_accepted() {
        let result = ResponseClassifier::new().classify(SLOT_BODY, deadline(2026, 3, 23));
        assert_eq!(result.label(), "slot_found");
    }

    #[test]
    fn test_slot_without_period_still_found() {
        let body = r#"<a href="/x?searchForDaySlots&amp;d=1">go</a>"#;
        let result = ResponseClassifier::new().classify(body, deadline(2026, 1, 1));
        assert_eq!(
            result,
            Classification::SlotFound {
                claim_link: "/x?searchForDaySlots&d=1".into(),
                period_start: None,
            }
        );
    }

    #[test]
    fn test_slot_wins_over_rate_limit() {
        let body = format!("{SLOT_BODY}<title>Pardon Our Interruption</title>{ACCESS_CONTROL_MARKER}edet=15");
        let result = ResponseClassifier::new().classify(&body, deadline(2026, 12, 31));
        assert!(matches!(result, Classification::SlotFound { .. }));
    }

    #[test]
    fn test_rate_limit_wins_over_access_control() {
        let body = format!("Pardon Our Interruption {ACCESS_CONTROL_MARKER}?edet=15");
        assert_eq!(
            ResponseClassifier::new().classify(&body, deadline(2026, 12, 31)),
            Classification::RateLimited
        );
    }

    #[test]
    fn test_access_control_codes() {
        let classifier = ResponseClassifier::new();
        let d = deadline(2026, 12, 31);

        assert_eq!(
            classifier.classify("/_Incapsula_Resource?edet=15&x=1", d),
            Classification::FatalSystemError { code: 15 }
        );
        assert_eq!(
            classifier.classify(r#"/_Incapsula_Resource?edet=12 data-sitekey="sk""#, d),
            Classification::CaptchaChallenge {
                sitekey: Some("sk".into())
            }
        );
        assert_eq!(
            classifier.classify("/_Incapsula_Resource?edet=99", d),
            Classification::CaptchaChallenge { sitekey: None }
        );
    }

    #[test]
    fn test_fatal_code_needs_exact_number() {
        let classifier = ResponseClassifier::new();
        let d = deadline(2026, 12, 31);

        assert_eq!(
            classifier.classify("/_Incapsula_Resource?edet=150", d),
            Classification::CaptchaChallenge { sitekey: None }
        );
        assert_eq!(
            classifier.classify("/_Incapsula_Resource?edet=15", d),
            Classification::FatalSystemError { code: 15 }
        );
        assert_eq!(error_code("x?edet=12&y"), Some(12));
        assert_eq!(error_code("x?edet=&y"), None);
    }

    #[test]
    fn test_slot_marker_without_link_blocks_lower_classes() {
        let body = format!("{DAY_SLOT_MARKER} Pardon Our Interruption {ACCESS_CONTROL_MARKER}?edet=15");
        assert_eq!(
            ResponseClassifier::new().classify(&body, deadline(2026, 12, 31)),
            Classification::NoSlot
        );
    }

    #[test]
    fn test_plain_page_is_no_slot() {
        assert_eq!(
            ResponseClassifier::new().classify("<html>nothing</html>", deadline(2026, 1, 1)),
            Classification::NoSlot
        );
    }

    #[test]
    fn test_url_whitelist() {
        assert!(ResponseClassifier::accepts_url(
            "https://site.test/obs?_eventId=searchForWeeklySlotsNextAvailable"
        ));
        assert!(ResponseClassifier::accepts_url(
            "/obs?_eventId=searchForWeeklySlotsPreviousAvailable&x=1"
        ));
        assert!(!ResponseClassifier::accepts_url("/obs?_eventId=searchForDaySlots"));

        let classifier = ResponseClassifier::new();
        assert!(classifier
            .classify_response("/other", "Pardon Our Interruption", deadline(2026, 1, 1))
            .is_none());
    }

    struct FixedExtractor;

    impl PatternExtractor for FixedExtractor {
        fn slot_link(&self, _body: &str) -> Option<String> {
            Some("/fixed".into())
        }
        fn period_start(&self, _body: &str) -> Option<NaiveDate> {
            None
        }
        fn claim_links(&self, _body: &str) -> Vec<String> {
            Vec::new()
        }
        fn sitekey(&self, _body: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_custom_extractor() {
        let classifier = ResponseClassifier::with_extractor(Box::new(FixedExtractor));
        assert_eq!(
            classifier.classify("", deadline(2026, 1, 1)),
            Classification::SlotFound {
                claim_link: "/fixed".into(),
                period_start: None
            }
        );
    }
}
