//! Custom error types for slotwatch.
//!
//! Errors are grouped by how the session reacts to them: transient
//! failures are retried or backed off, operational failures are logged and
//! reported, fatal session failures stop the run and need a human, and
//! configuration failures refuse to automate at all.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for slotwatch operations
#[derive(Error, Debug)]
pub enum SlotwatchError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Account credentials are not configured
    #[error("Account credentials are missing: {detail}")]
    CredentialsMissing { detail: String },

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// Start rejected because a full-duration run finished too recently
    #[error("Cooldown active: wait {remaining_minutes} more minute(s) before starting")]
    CooldownActive { remaining_minutes: i64 },

    /// Operation needs a running session
    #[error("Session is not running")]
    NotRunning,

    /// Daily click allowance used up
    #[error("Daily click limit reached ({clicks}/{limit})")]
    ClickLimit { clicks: u32, limit: u32 },

    // =========================================================================
    // Page Errors
    // =========================================================================
    /// The page did not answer in time, or navigated away mid-command
    #[error("Page not ready: {detail}")]
    PageNotReady { detail: String },

    /// A named control could not be found on the page
    #[error("Control '{control}' not found on page")]
    ControlNotFound { control: String },

    /// Browser/DevTools transport failure
    #[error("Browser error: {message}")]
    Browser { message: String },

    // =========================================================================
    // Classification / Claim Errors
    // =========================================================================
    /// Anti-automation interstitial seen
    #[error("Rate limited by the booking site")]
    RateLimited,

    /// The expected claim link was absent from the slot page
    #[error("Claim link missing for {slot_link}: {reason}")]
    ClaimLinkMissing { slot_link: String, reason: String },

    /// Interactive challenge appeared while claiming a slot
    #[error("Captcha challenge during claim at {url}")]
    CaptchaDuringClaim { url: String },

    /// Site reported an access error that cannot be retried
    #[error("Fatal site error (code {code})")]
    FatalSystemError { code: u32 },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// State store failure
    #[error("State store error: {message}")]
    Store { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SlotwatchError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create an invalid-configuration error
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a page-not-ready error
    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self::PageNotReady {
            detail: detail.into(),
        }
    }

    /// Create a browser transport error
    pub fn browser(message: impl Into<String>) -> Self {
        Self::Browser {
            message: message.into(),
        }
    }

    /// Create a state store error
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is recoverable without stopping the session
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited
                | Self::PageNotReady { .. }
                | Self::ControlNotFound { .. }
                | Self::ClaimLinkMissing { .. }
        )
    }

    /// Check if this error should be retried after a short delay
    pub fn is_soft_failure(&self) -> bool {
        matches!(self, Self::PageNotReady { .. })
    }

    /// Check if this error requires human intervention
    pub fn requires_human(&self) -> bool {
        matches!(
            self,
            Self::CaptchaDuringClaim { .. }
                | Self::FatalSystemError { .. }
                | Self::CredentialsMissing { .. }
        )
    }

    /// Check if this error is fatal (should stop the session)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::CaptchaDuringClaim { .. }
                | Self::FatalSystemError { .. }
                | Self::ClickLimit { .. }
                | Self::CredentialsMissing { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::CooldownActive { .. } => 2,
            Self::CaptchaDuringClaim { .. } | Self::FatalSystemError { .. } => 3,
            Self::ClickLimit { .. } => 4,
            Self::Browser { .. } | Self::PageNotReady { .. } => 5,
            Self::CredentialsMissing { .. } => 6,
            Self::Config { .. } | Self::InvalidConfig { .. } => 7,
            _ => 1,
        }
    }
}

/// Type alias for slotwatch results
pub type Result<T> = std::result::Result<T, SlotwatchError>;

/// Extension trait for converting foreign errors to SlotwatchError
pub trait IntoSlotwatchError<T> {
    fn into_config_error(self) -> Result<T>;
    fn into_browser_error(self) -> Result<T>;
    fn into_store_error(self) -> Result<T>;
}

impl<T, E: std::fmt::Display> IntoSlotwatchError<T> for std::result::Result<T, E> {
    fn into_config_error(self) -> Result<T> {
        self.map_err(|e| SlotwatchError::config(e.to_string()))
    }

    fn into_browser_error(self) -> Result<T> {
        self.map_err(|e| SlotwatchError::browser(e.to_string()))
    }

    fn into_store_error(self) -> Result<T> {
        self.map_err(|e| SlotwatchError::store(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SlotwatchError::CooldownActive {
            remaining_minutes: 35,
        };
        assert!(err.to_string().contains("35"));

        let err = SlotwatchError::ClickLimit {
            clicks: 9500,
            limit: 9500,
        };
        assert_eq!(err.to_string(), "Daily click limit reached (9500/9500)");
    }

    #[test]
    fn test_is_recoverable() {
        assert!(SlotwatchError::RateLimited.is_recoverable());
        assert!(SlotwatchError::not_ready("navigated").is_recoverable());
        assert!(!SlotwatchError::FatalSystemError { code: 15 }.is_recoverable());
    }

    #[test]
    fn test_soft_failure_only_for_page_not_ready() {
        assert!(SlotwatchError::not_ready("timeout").is_soft_failure());
        assert!(!SlotwatchError::RateLimited.is_soft_failure());
    }

    #[test]
    fn test_is_fatal() {
        assert!(SlotwatchError::FatalSystemError { code: 15 }.is_fatal());
        assert!(SlotwatchError::CaptchaDuringClaim {
            url: "https://example.test".into()
        }
        .is_fatal());
        assert!(!SlotwatchError::RateLimited.is_fatal());
    }

    #[test]
    fn test_requires_human() {
        assert!(SlotwatchError::CredentialsMissing {
            detail: "username".into()
        }
        .requires_human());
        assert!(!SlotwatchError::not_ready("x").requires_human());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(
            SlotwatchError::CooldownActive {
                remaining_minutes: 1
            }
            .exit_code(),
            2
        );
        assert_eq!(SlotwatchError::FatalSystemError { code: 15 }.exit_code(), 3);
        assert_eq!(SlotwatchError::config("test").exit_code(), 7);
        assert_eq!(SlotwatchError::store("disk").exit_code(), 1);
    }

    #[test]
    fn test_config_with_path() {
        let path = PathBuf::from("/test/settings.json");
        let err = SlotwatchError::config_with_path("failed to parse", path.clone());
        if let SlotwatchError::Config {
            message,
            path: opt_path,
        } = err
        {
            assert_eq!(message, "failed to parse");
            assert_eq!(opt_path, Some(path));
        } else {
            panic!("Wrong error variant");
        }
    }

    #[test]
    fn test_into_browser_error() {
        let res: std::result::Result<(), String> = Err("socket closed".to_string());
        let err = res.into_browser_error().unwrap_err();
        assert!(matches!(err, SlotwatchError::Browser { .. }));
        assert!(err.to_string().contains("socket closed"));
    }
}
