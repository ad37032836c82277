//! Signal handling for graceful shutdown.
//!
//! On SIGTERM or SIGINT (Unix), or Ctrl+C (Windows), the running session is
//! told what to do before the process exits:
//!
//! ```text
//! Signal received (SIGTERM/SIGINT)
//!    │
//!    ▼
//! SignalHandler::shutdown()
//!    │
//!    ├─► keep_running=true:  Shutdown  (state saved as-is, next run resumes)
//!    │
//!    └─► keep_running=false: Stop + Shutdown (session ends, alert sent)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use slotwatch::session::{SignalHandler, SignalHandlerConfig};
//!
//! let handler = SignalHandler::new(SignalHandlerConfig::default())
//!     .with_session(controller.handle());
//! tokio::spawn(async move { handler.wait_for_shutdown().await });
//! ```

use tracing::{info, warn};

use super::SessionHandle;
use crate::error::Result;

/// Configuration for the signal handler.
///
/// # Example
///
/// ```rust
/// use slotwatch::session::SignalHandlerConfig;
///
/// // By default an interrupted run resumes on the next start
/// let config = SignalHandlerConfig::default();
/// assert!(config.keep_running);
/// ```
#[derive(Debug, Clone)]
pub struct SignalHandlerConfig {
    /// Leave a running session marked as running so the next process picks
    /// it up. Set to false with `--stop-on-signal`.
    pub keep_running: bool,
}

impl Default for SignalHandlerConfig {
    fn default() -> Self {
        Self { keep_running: true }
    }
}

/// Result of a graceful shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    /// The controller saved its state and is exiting.
    StateKept,
    /// The session was stopped before exit.
    Stopped,
    /// No session attached.
    NoSession,
    /// The controller could not be reached (no panic).
    Failed(String),
}

/// Signal handler forwarding shutdown to the session controller.
#[derive(Debug)]
pub struct SignalHandler {
    config: SignalHandlerConfig,
    session: Option<SessionHandle>,
}

impl SignalHandler {
    #[must_use]
    pub fn new(config: SignalHandlerConfig) -> Self {
        Self {
            config,
            session: None,
        }
    }

    /// Attach the controller to notify.
    #[must_use]
    pub fn with_session(mut self, session: SessionHandle) -> Self {
        self.session = Some(session);
        self
    }

    /// Tell the controller to wind down. Never panics.
    pub async fn shutdown(&self) -> ShutdownResult {
        let Some(session) = &self.session else {
            warn!("Graceful shutdown: no session attached");
            return ShutdownResult::NoSession;
        };

        if !self.config.keep_running {
            if let Err(e) = session.stop().await {
                warn!("Graceful shutdown: could not stop session: {}", e);
                return ShutdownResult::Failed(e.to_string());
            }
        }

        match session.shutdown().await {
            Ok(()) if self.config.keep_running => {
                info!("Graceful shutdown: session state kept for the next run");
                ShutdownResult::StateKept
            }
            Ok(()) => {
                info!("Graceful shutdown: session stopped");
                ShutdownResult::Stopped
            }
            Err(e) => {
                warn!("Graceful shutdown: session loop already gone: {}", e);
                ShutdownResult::Failed(e.to_string())
            }
        }
    }

    /// Wait for a shutdown signal, then call [`Self::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns an error if signal handler registration fails.
    pub async fn wait_for_shutdown(&self) -> Result<ShutdownResult> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        Ok(self.shutdown().await)
    }

    #[must_use]
    pub fn keeps_running(&self) -> bool {
        self.config.keep_running
    }

    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }
}
