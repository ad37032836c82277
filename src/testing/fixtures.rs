//! Canned page bodies and a throwaway state directory.

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

/// Weekly search response offering a day with free slots.
pub const SLOT_RESPONSE: &str = concat!(
    "<html><body>",
    "<p>Number of available tests between 23 <span>March</span> 2026 &ndash; 29 March 2026</p>",
    r#"<a href="/obs?execution=e1s2&amp;_eventId=searchForDaySlots&amp;date=2026-03-24">Tue</a>"#,
    "</body></html>",
);

/// Weekly search response with nothing free.
pub const EMPTY_RESPONSE: &str =
    "<html><p>Number of available tests between 23 <span>March</span> 2026 &ndash; 29 March 2026</p></html>";

/// Anti-automation interstitial.
pub const RATE_LIMIT_RESPONSE: &str = "<html><title>Pardon Our Interruption</title></html>";

/// Firewall page with an interactive challenge.
pub const CHALLENGE_RESPONSE: &str = r#"<iframe src="/_Incapsula_Resource?edet=12&cinfo=1"></iframe><div class="h-captcha" data-sitekey="site-key-1"></div>"#;

/// Firewall page blocking the client.
pub const BLOCKED_RESPONSE: &str = r#"<iframe src="/_Incapsula_Resource?edet=15&cinfo=1"></iframe>"#;

/// Day page with two claim links.
pub const DAY_PAGE: &str = concat!(
    r#"<a id="reserve_1" href="/obs?execution=e1s3&amp;_eventId=reserveSlot&amp;slot=1">Reserve</a>"#,
    r#"<a id="reserve_2" href="/obs?execution=e1s3&amp;_eventId=reserveSlot&amp;slot=2">Reserve</a>"#,
);

/// A temporary state directory, removed when dropped.
///
/// # Panics
///
/// Constructors panic when the temporary directory cannot be created.
pub struct StateDirFixture {
    temp_dir: TempDir,
}

impl StateDirFixture {
    /// Empty state directory.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// State directory with a settings file using short durations.
    #[must_use]
    pub fn with_settings() -> Self {
        let fixture = Self::empty();
        fixture.write_settings(&json!({
            "session": {
                "jitterMin": 0.8,
                "jitterMax": 1.5,
                "maxClicks": 100,
                "maxRunningMinutes": 20,
                "cooldownMinutes": 45,
                "deadlineDate": "2026-06-30"
            },
            "account": { "username": "driver", "password": "secret" }
        }));
        fixture
    }

    /// Write `settings.json`.
    pub fn write_settings(&self, value: &serde_json::Value) {
        std::fs::write(
            self.settings_path(),
            serde_json::to_string_pretty(value).expect("settings serialize"),
        )
        .expect("Failed to write settings.json");
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    #[must_use]
    pub fn settings_path(&self) -> PathBuf {
        self.temp_dir.path().join(crate::config::SETTINGS_FILE)
    }
}
