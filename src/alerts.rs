//! Alert events and the sinks that deliver them.
//!
//! The core emits fixed-shape [`AlertEvent`] payloads; turning them into
//! chat messages is the backend's job. Emission is fire-and-forget: a sink
//! never blocks the controller and never reports failure back to it.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Event sent to the alert collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum AlertEvent {
    SessionStart,
    SessionEnd {
        clicks_count: u32,
    },
    SlotFound {
        count: usize,
    },
    ReservationSuccess {
        test_center: String,
        slots: Vec<String>,
        minutes_remaining: Option<u32>,
        reserved_count: usize,
    },
    SlotLost {
        location_info: String,
    },
    CaptchaDuringClaim {
        sitekey: Option<String>,
        url: String,
    },
    CredentialsMissing,
    ClickLimitWarning {
        clicks: u32,
        limit: u32,
    },
    ClaimLinkMissing {
        slot_link: String,
        reason: String,
    },
    FatalError {
        code: u32,
    },
}

impl AlertEvent {
    /// Kebab-case event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SessionStart => "session-start",
            Self::SessionEnd { .. } => "session-end",
            Self::SlotFound { .. } => "slot-found",
            Self::ReservationSuccess { .. } => "reservation-success",
            Self::SlotLost { .. } => "slot-lost",
            Self::CaptchaDuringClaim { .. } => "captcha-during-claim",
            Self::CredentialsMissing => "credentials-missing",
            Self::ClickLimitWarning { .. } => "click-limit-warning",
            Self::ClaimLinkMissing { .. } => "claim-link-missing",
            Self::FatalError { .. } => "fatal-error",
        }
    }

    /// Needs a human to look at the page.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        matches!(
            self,
            Self::CaptchaDuringClaim { .. }
                | Self::FatalError { .. }
                | Self::CredentialsMissing
                | Self::ReservationSuccess { .. }
        )
    }

    /// Backend route under `/api/bot/`.
    ///
    /// Session start and end keep the backend's historic route names.
    #[must_use]
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::SessionStart => "start-session",
            Self::SessionEnd { .. } => "end-session",
            other => other.name(),
        }
    }

    /// Request body for the backend route.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::SessionEnd { clicks_count } => json!({ "clicks_count": clicks_count }),
            other => {
                let mut value = serde_json::to_value(other).unwrap_or_else(|_| json!({}));
                if let Some(map) = value.as_object_mut() {
                    map.remove("event");
                }
                value
            }
        }
    }
}

/// Receives alert events.
pub trait AlertSink: Send + Sync {
    /// Deliver one event without blocking the caller.
    fn emit(&self, event: AlertEvent);
}

/// Writes alerts to the tracing log.
#[derive(Debug, Default, Clone)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn emit(&self, event: AlertEvent) {
        let payload = event.payload();
        if event.is_urgent() {
            warn!(alert = event.name(), %payload, "alert");
        } else {
            info!(alert = event.name(), %payload, "alert");
        }
    }
}

/// Posts alerts to `{backend}/api/bot/<endpoint>`.
#[derive(Debug, Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    backend_url: String,
}

impl WebhookAlertSink {
    /// Create a sink for the given backend base URL.
    pub fn new(backend_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            backend_url: backend_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Full URL for an event.
    #[must_use]
    pub fn url_for(&self, event: &AlertEvent) -> String {
        format!("{}/api/bot/{}", self.backend_url, event.endpoint())
    }
}

impl AlertSink for WebhookAlertSink {
    fn emit(&self, event: AlertEvent) {
        let url = self.url_for(&event);
        let body = event.payload();
        let client = self.client.clone();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(alert = event.name(), "no async runtime, alert dropped");
            return;
        };
        runtime.spawn(async move {
            match client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => {
                    debug!(%url, "alert delivered");
                }
                Ok(resp) => {
                    warn!(%url, status = %resp.status(), "alert backend rejected event");
                }
                Err(e) => {
                    warn!(%url, "failed to deliver alert: {}", e);
                }
            }
        });
    }
}

/// Forwards every event to each inner sink.
#[derive(Default, Clone)]
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutAlertSink {
    fn emit(&self, event: AlertEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}
