//! Detection of dead-end pages the site shows after timeouts and outages,
//! and of the sign-in pages that follow an expired login.

use serde::Serialize;

/// URL fragments of the session-timeout pages.
pub const TIMEOUT_URL_MARKERS: [&str; 2] = ["/sessionTimeout", "_eventId=slotsTimedOut"];

/// Text of the generic error banner.
pub const SYSTEM_ERROR_TEXT: &str = "Sorry, there's a problem with the system";

/// Text of the overload page.
pub const TRY_LATER_TEXT: &str = "Please try again later";

/// URL fragment of the credentials form.
pub const SIGN_IN_URL_MARKER: &str = "/login/signin/creds";

/// URL fragment of the "you are signed in elsewhere" page.
pub const ALREADY_SIGNED_IN_URL_MARKER: &str = "/login/already-signed-in/";

/// Heading the credentials form shows once the login itself expired.
pub const LOGIN_EXPIRED_TEXT: &str = "Your session has expired";

/// Why the agent is sending the page back to the landing URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryReason {
    SessionTimeout,
    SystemError,
    TryLater,
    LoginExpired,
}

/// Sign-in page the agent has to get past.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignInPage {
    /// The username and password form.
    Credentials,
    /// The account is signed in elsewhere; stay on this one.
    AlreadySignedIn,
}

impl std::fmt::Display for SignInPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Credentials => write!(f, "credentials form"),
            Self::AlreadySignedIn => write!(f, "already-signed-in page"),
        }
    }
}

/// What to do on a sign-in URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignInStep {
    /// Go back to the landing URL and start over.
    Restart,
    /// Get through the page.
    Complete(SignInPage),
}

/// Whether `url` is a sign-in page. The heading is read only on the
/// credentials form, see [`needs_heading`].
#[must_use]
pub fn sign_in_step(url: &str, heading: Option<&str>) -> Option<SignInStep> {
    if url.contains(ALREADY_SIGNED_IN_URL_MARKER) {
        return Some(SignInStep::Complete(SignInPage::AlreadySignedIn));
    }
    if !needs_heading(url) {
        return None;
    }
    if heading.is_some_and(|text| text.contains(LOGIN_EXPIRED_TEXT)) {
        return Some(SignInStep::Restart);
    }
    Some(SignInStep::Complete(SignInPage::Credentials))
}

/// The page heading decides what happens on `url`.
#[must_use]
pub fn needs_heading(url: &str) -> bool {
    url.contains(SIGN_IN_URL_MARKER)
}

impl std::fmt::Display for RecoveryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SessionTimeout => write!(f, "session timed out"),
            Self::SystemError => write!(f, "system error page"),
            Self::TryLater => write!(f, "try-again-later page"),
            Self::LoginExpired => write!(f, "login expired"),
        }
    }
}

/// Decide whether the current page is a dead end.
///
/// `error_banner` is the text of the first error element and `lead` the text
/// of the first paragraph, if present.
#[must_use]
pub fn detect(url: &str, error_banner: Option<&str>, lead: Option<&str>) -> Option<RecoveryReason> {
    if TIMEOUT_URL_MARKERS.iter().any(|marker| url.contains(marker)) {
        return Some(RecoveryReason::SessionTimeout);
    }
    if error_banner.is_some_and(|text| text.contains(SYSTEM_ERROR_TEXT)) {
        return Some(RecoveryReason::SystemError);
    }
    if lead.is_some_and(|text| text.contains(TRY_LATER_TEXT)) {
        return Some(RecoveryReason::TryLater);
    }
    None
}
