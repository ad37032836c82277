//! Interstitial bookkeeping: the back-button warning and challenge de-dup.

use std::time::Duration;

use tokio::time::Instant;

/// Minimum spacing between two warning-dialog checks.
pub const DIALOG_CHECK_THROTTLE: Duration = Duration::from_secs(1);

/// How long warning checks stay off after the agent closes a dialog itself.
pub const CLOSE_GRACE: Duration = Duration::from_secs(3);

/// What to do after looking at the warning dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogAction {
    Dismiss,
    Ignore,
}

/// Throttled detector for the back-button warning.
///
/// After one dismissal the watch stays quiet until the dialog has left the
/// DOM, so a slow-closing dialog is never clicked twice.
#[derive(Debug, Clone)]
pub struct DialogWatch {
    throttle: Duration,
    last_check: Option<Instant>,
    dismissed: bool,
    quiet_until: Option<Instant>,
}

impl Default for DialogWatch {
    fn default() -> Self {
        Self::new(DIALOG_CHECK_THROTTLE)
    }
}

impl DialogWatch {
    #[must_use]
    pub fn new(throttle: Duration) -> Self {
        Self {
            throttle,
            last_check: None,
            dismissed: false,
            quiet_until: None,
        }
    }

    /// Whether a check may run at `now`. Records the check when it may.
    pub fn should_check(&mut self, now: Instant) -> bool {
        if self.quiet_until.is_some_and(|until| now < until) {
            return false;
        }
        if self
            .last_check
            .is_some_and(|last| now.duration_since(last) < self.throttle)
        {
            return false;
        }
        self.last_check = Some(now);
        true
    }

    /// Feed what the page shows and get the action to take.
    pub fn observe(&mut self, present: bool, visible: bool) -> DialogAction {
        if self.dismissed {
            if !present {
                self.dismissed = false;
            }
            return DialogAction::Ignore;
        }
        if present && visible {
            self.dismissed = true;
            return DialogAction::Dismiss;
        }
        DialogAction::Ignore
    }

    /// The agent is about to close a dialog on purpose.
    pub fn closing_started(&mut self, now: Instant) {
        self.quiet_until = Some(now + CLOSE_GRACE);
    }

    #[must_use]
    pub fn is_quiet(&self, now: Instant) -> bool {
        self.quiet_until.is_some_and(|until| now < until)
    }
}

/// Suppresses repeated reports of the same challenge.
#[derive(Debug, Clone)]
pub struct ChallengeDedup {
    window: Duration,
    last: Option<(Option<String>, String, Instant)>,
}

impl ChallengeDedup {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// True when this challenge should be reported.
    pub fn should_report(&mut self, sitekey: Option<&str>, url: &str, now: Instant) -> bool {
        if let Some((last_key, last_url, at)) = &self.last {
            if last_key.as_deref() == sitekey
                && last_url == url
                && now.duration_since(*at) < self.window
            {
                return false;
            }
        }
        self.last = Some((sitekey.map(str::to_string), url.to_string(), now));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_checks_throttled_to_one_per_second() {
        let mut watch = DialogWatch::default();
        let start = Instant::now();
        assert!(watch.should_check(start));
        assert!(!watch.should_check(start + Duration::from_millis(200)));
        assert!(!watch.should_check(start + Duration::from_millis(999)));
        assert!(watch.should_check(start + Duration::from_millis(1000)));
    }

    #[test]
    fn test_dismiss_once_until_gone() {
        let mut watch = DialogWatch::default();
        assert_eq!(watch.observe(true, true), DialogAction::Dismiss);
        assert_eq!(watch.observe(true, true), DialogAction::Ignore);
        assert_eq!(watch.observe(true, false), DialogAction::Ignore);
        assert_eq!(watch.observe(false, false), DialogAction::Ignore);
        assert_eq!(watch.observe(true, true), DialogAction::Dismiss);
    }

    #[test]
    fn test_hidden_dialog_ignored() {
        let mut watch = DialogWatch::default();
        assert_eq!(watch.observe(true, false), DialogAction::Ignore);
        assert_eq!(watch.observe(false, false), DialogAction::Ignore);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_while_closing() {
        let mut watch = DialogWatch::default();
        let now = Instant::now();
        watch.closing_started(now);
        assert!(watch.is_quiet(now + Duration::from_secs(1)));
        assert!(!watch.should_check(now + Duration::from_secs(2)));
        assert!(watch.should_check(now + CLOSE_GRACE));
    }

    #[tokio::test(start_paused = true)]
    async fn test_challenge_dedup_window() {
        let mut dedup = ChallengeDedup::new(Duration::from_secs(30));
        let now = Instant::now();
        assert!(dedup.should_report(Some("k"), "/a", now));
        assert!(!dedup.should_report(Some("k"), "/a", now + Duration::from_secs(10)));
        assert!(dedup.should_report(Some("other"), "/a", now + Duration::from_secs(11)));
        assert!(dedup.should_report(Some("other"), "/a", now + Duration::from_secs(45)));
    }
}
