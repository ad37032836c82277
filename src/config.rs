//! Configuration management for slotwatch.
//!
//! Two layers live here:
//!
//! - [`SessionConfig`] is the snapshot the settings collaborator hands over
//!   at session start (jitter window, limits, deadline). It is immutable for
//!   the duration of a run and shared through a [`ConfigHandle`].
//! - [`WatchConfig`] is the on-disk settings file (`.slotwatch/settings.json`)
//!   that also carries site, account, alert and browser settings plus the
//!   tuning constants of the workflow.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Result, SlotwatchError};

/// Settings file name inside the state directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Default state directory name (relative to the working directory).
pub const STATE_DIR: &str = ".slotwatch";

/// Months searched ahead when no deadline is configured.
pub const DEFAULT_SEARCH_MONTHS: u32 = 3;

// ============================================================================
// Session configuration (settings collaborator snapshot)
// ============================================================================

/// Per-run limits and pacing, as delivered by the settings collaborator.
///
/// # Example
///
/// ```
/// use slotwatch::config::SessionConfig;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.full_duration_secs(), 20 * 60);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Lower bound of the delay between actions, in seconds.
    #[serde(default = "default_jitter_min")]
    pub jitter_min: f64,
    /// Upper bound of the delay between actions, in seconds.
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// Clicks allowed per local day before the session is forced to stop.
    #[serde(default = "default_max_clicks", rename = "maxClicks")]
    pub max_clicks_per_day: u32,
    /// Length of one full run.
    #[serde(default = "default_max_running_minutes")]
    pub max_running_minutes: u32,
    /// Rest period enforced after a full-duration run.
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u32,
    /// Latest acceptable test date. `None` searches three months ahead.
    #[serde(default, deserialize_with = "deserialize_optional_date")]
    pub deadline_date: Option<NaiveDate>,
}

fn default_jitter_min() -> f64 {
    0.8
}

fn default_jitter_max() -> f64 {
    1.5
}

fn default_max_clicks() -> u32 {
    9500
}

fn default_max_running_minutes() -> u32 {
    20
}

fn default_cooldown_minutes() -> u32 {
    45
}

/// Accepts `null`, an empty string, or an ISO date.
fn deserialize_optional_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
            max_clicks_per_day: default_max_clicks(),
            max_running_minutes: default_max_running_minutes(),
            cooldown_minutes: default_cooldown_minutes(),
            deadline_date: None,
        }
    }
}

impl SessionConfig {
    /// Full run length in seconds.
    #[must_use]
    pub fn full_duration_secs(&self) -> u64 {
        u64::from(self.max_running_minutes) * 60
    }

    /// Last day of the search window, falling back to three months ahead.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::NaiveDate;
    /// use slotwatch::config::SessionConfig;
    ///
    /// let today = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
    /// let config = SessionConfig::default();
    /// assert_eq!(config.search_end(today), NaiveDate::from_ymd_opt(2026, 4, 30).unwrap());
    /// ```
    #[must_use]
    pub fn search_end(&self, today: NaiveDate) -> NaiveDate {
        self.deadline_date.unwrap_or_else(|| {
            today
                .checked_add_months(Months::new(DEFAULT_SEARCH_MONTHS))
                .unwrap_or(today)
        })
    }

    /// Validate the snapshot, returning the first problem found.
    pub fn validate(&self) -> Result<()> {
        if !self.jitter_min.is_finite() || self.jitter_min < 0.0 {
            return Err(SlotwatchError::invalid_config(
                "jitterMin",
                "must be a non-negative number of seconds",
            ));
        }
        if !self.jitter_max.is_finite() || self.jitter_max < self.jitter_min {
            return Err(SlotwatchError::invalid_config(
                "jitterMax",
                format!("must be at least jitterMin ({})", self.jitter_min),
            ));
        }
        if self.max_clicks_per_day == 0 {
            return Err(SlotwatchError::invalid_config(
                "maxClicks",
                "must be greater than zero",
            ));
        }
        if self.max_running_minutes == 0 {
            return Err(SlotwatchError::invalid_config(
                "maxRunningMinutes",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Shared, atomically swappable pointer to the current [`SessionConfig`].
///
/// Readers take an `Arc` snapshot and keep using it for the rest of their
/// cycle; a swap never mutates a snapshot somebody else is holding.
#[derive(Debug, Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<SessionConfig>>>,
}

impl ConfigHandle {
    /// Wrap an initial configuration.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<SessionConfig> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Replace the snapshot for subsequent cycles.
    pub fn swap(&self, config: SessionConfig) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }
}

impl Default for ConfigHandle {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

// ============================================================================
// Settings collaborator
// ============================================================================

/// Source of the per-run [`SessionConfig`], consulted once per session start.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    /// Fetch the current settings.
    async fn fetch(&self) -> Result<SessionConfig>;
}

/// Settings read from the `session` section of a settings file.
#[derive(Debug, Clone)]
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    /// Create a source reading the given settings file.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl SettingsSource for FileSettings {
    async fn fetch(&self) -> Result<SessionConfig> {
        let config = WatchConfig::load_file(&self.path)?;
        config.session.validate()?;
        Ok(config.session)
    }
}

// ============================================================================
// Settings file
// ============================================================================

/// Booking site locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteConfig {
    /// Origin used to absolutize claim links.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the page to return to after timeouts and system errors.
    #[serde(default = "default_landing_path")]
    pub landing_path: String,
}

fn default_base_url() -> String {
    "https://driver-services.dvsa.gov.uk".to_string()
}

fn default_landing_path() -> String {
    "/obs".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            landing_path: default_landing_path(),
        }
    }
}

impl SiteConfig {
    /// Absolute landing page URL.
    #[must_use]
    pub fn landing_url(&self) -> String {
        self.absolutize(&self.landing_path)
    }

    /// Resolve a site-relative link against the base URL.
    ///
    /// # Example
    ///
    /// ```
    /// use slotwatch::config::SiteConfig;
    ///
    /// let site = SiteConfig { base_url: "https://site.test/".into(), landing_path: "/obs".into() };
    /// assert_eq!(site.absolutize("/a?b=1"), "https://site.test/a?b=1");
    /// assert_eq!(site.absolutize("https://other.test/x"), "https://other.test/x");
    /// ```
    #[must_use]
    pub fn absolutize(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if link.starts_with('/') {
            format!("{base}{link}")
        } else {
            format!("{base}/{link}")
        }
    }
}

/// Account the automated page is signed in with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountConfig {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl AccountConfig {
    /// Both username and password are present and non-blank.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        filled(&self.username) && filled(&self.password)
    }

    /// Username and password, when both are filled in.
    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        if !self.has_credentials() {
            return None;
        }
        Some(Credentials {
            username: self.username.clone()?.trim().to_string(),
            password: self.password.clone()?,
        })
    }

    /// Names of the missing credential fields.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.username.as_deref().is_none_or(|s| s.trim().is_empty()) {
            missing.push("username");
        }
        if self.password.as_deref().is_none_or(|s| s.trim().is_empty()) {
            missing.push("password");
        }
        missing
    }
}

/// Account the agent signs the page back in with.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Where alert events are delivered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertsConfig {
    /// Backend that fans alerts out to messaging channels.
    #[serde(default)]
    pub backend_url: Option<String>,
}

/// Chrome remote-debugging endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_debug_host")]
    pub debug_host: String,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
}

fn default_debug_host() -> String {
    "127.0.0.1".to_string()
}

fn default_debug_port() -> u16 {
    9222
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            debug_host: default_debug_host(),
            debug_port: default_debug_port(),
        }
    }
}

/// Workflow constants. None of these values is known to be load-bearing,
/// so all of them can be overridden from the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TuningConfig {
    /// Reserved-row count at which a claim is considered complete.
    #[serde(default = "default_reserved_cap")]
    pub reserved_cap: usize,
    /// Inclusive lower bound of the housekeeping threshold.
    #[serde(default = "default_reload_threshold_min")]
    pub reload_threshold_min: u32,
    /// Inclusive upper bound of the housekeeping threshold.
    #[serde(default = "default_reload_threshold_max")]
    pub reload_threshold_max: u32,
    /// Fixed delay used after a rate-limit interstitial.
    #[serde(default = "default_rate_limit_backoff_secs")]
    pub rate_limit_backoff_secs: u64,
    /// Pause before following each queued claim link.
    #[serde(default = "default_claim_step_delay_ms")]
    pub claim_step_delay_ms: u64,
    /// Delay before re-sending a command the page did not accept.
    #[serde(default = "default_soft_retry_delay_secs")]
    pub soft_retry_delay_secs: u64,
    /// Timeout for a single page command.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Window for suppressing repeated captcha log entries.
    #[serde(default = "default_captcha_dedup_secs")]
    pub captcha_dedup_secs: u64,
    /// Restart polling after a lost slot instead of ending the run.
    #[serde(default = "default_true")]
    pub resume_after_slot_lost: bool,
}

fn default_reserved_cap() -> usize {
    10
}

fn default_reload_threshold_min() -> u32 {
    30
}

fn default_reload_threshold_max() -> u32 {
    45
}

fn default_rate_limit_backoff_secs() -> u64 {
    10
}

fn default_claim_step_delay_ms() -> u64 {
    500
}

fn default_soft_retry_delay_secs() -> u64 {
    3
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_captcha_dedup_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            reserved_cap: default_reserved_cap(),
            reload_threshold_min: default_reload_threshold_min(),
            reload_threshold_max: default_reload_threshold_max(),
            rate_limit_backoff_secs: default_rate_limit_backoff_secs(),
            claim_step_delay_ms: default_claim_step_delay_ms(),
            soft_retry_delay_secs: default_soft_retry_delay_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            captcha_dedup_secs: default_captcha_dedup_secs(),
            resume_after_slot_lost: default_true(),
        }
    }
}

/// Complete settings file.
///
/// # Example settings.json
///
/// ```json
/// {
///   "session": { "jitterMin": 0.8, "jitterMax": 1.5, "maxClicks": 9500,
///                "maxRunningMinutes": 20, "cooldownMinutes": 45,
///                "deadlineDate": "2026-06-30" },
///   "account": { "username": "12345678", "password": "..." },
///   "alerts": { "backendUrl": "http://localhost:3000" }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub tuning: TuningConfig,
}

impl WatchConfig {
    /// Load configuration from a state directory, defaulting when absent.
    pub fn load(state_dir: &Path) -> Result<Self> {
        let path = Self::settings_path(state_dir);
        if path.exists() {
            Self::load_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SlotwatchError::config_with_path(format!("cannot read settings: {e}"), path.to_path_buf())
        })?;
        serde_json::from_str(&content).map_err(|e| {
            SlotwatchError::config_with_path(format!("cannot parse settings: {e}"), path.to_path_buf())
        })
    }

    /// Get the settings.json path for a state directory
    #[must_use]
    pub fn settings_path(state_dir: &Path) -> PathBuf {
        state_dir.join(SETTINGS_FILE)
    }

    /// Default state directory: `.slotwatch` under the user's data directory,
    /// or the working directory when no data directory is known.
    #[must_use]
    pub fn default_state_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("slotwatch"))
            .unwrap_or_else(|| PathBuf::from(STATE_DIR))
    }

    /// Every problem with the file, for `config validate`.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(e) = self.session.validate() {
            problems.push(e.to_string());
        }
        if !self.site.base_url.starts_with("http") {
            problems.push(format!("site.baseUrl must be an http(s) URL, got '{}'", self.site.base_url));
        }
        if self.tuning.reload_threshold_min == 0
            || self.tuning.reload_threshold_min > self.tuning.reload_threshold_max
        {
            problems.push(format!(
                "tuning.reloadThresholdMin..Max must be a non-empty positive range, got {}..{}",
                self.tuning.reload_threshold_min, self.tuning.reload_threshold_max
            ));
        }
        if self.tuning.reserved_cap == 0 {
            problems.push("tuning.reservedCap must be greater than zero".to_string());
        }
        if !self.account.has_credentials() {
            problems.push(format!(
                "account is missing: {}",
                self.account.missing_fields().join(", ")
            ));
        }
        problems
    }
}
