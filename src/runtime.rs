//! Process wiring for `slotwatch run`.
//!
//! The runner attaches to the browser, starts the page agent and the
//! session controller, and connects the loose ends between them:
//!
//! ```text
//!  CdpPageDriver ──PageEvent──► pump ──Classified / PageLoaded──► SessionController
//!       ▲                        │                                    │
//!       │                        └──CheckDialog──┐                    │
//!       │                                        ▼                    │
//!       └───────────────────────────────── PageAgent ◄──AgentCommand──┘
//!
//!  stop.request file ──► watcher ──Stop──► SessionController
//!  SIGINT / SIGTERM ──► SignalHandler ──Shutdown──► SessionController
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::dialog::DIALOG_CHECK_THROTTLE;
use crate::agent::{AgentChannel, AgentCommand, PageAgent};
use crate::alerts::{AlertSink, FanoutAlertSink, TracingAlertSink, WebhookAlertSink};
use crate::classifier::ResponseClassifier;
use crate::config::{ConfigHandle, FileSettings, WatchConfig};
use crate::error::{IntoSlotwatchError, Result, SlotwatchError};
use crate::page::{CdpPageDriver, PageDriver, PageEvent};
use crate::session::{
    ControllerOptions, RecoveryReport, SessionController, SessionEvent, SessionHandle,
    SignalHandler, SignalHandlerConfig,
};
use crate::state::PersistedState;
use crate::store::FileStateStore;

/// File whose appearance in the state directory stops a running watcher.
pub const STOP_REQUEST_FILE: &str = "stop.request";

/// How often the stop-request file is looked for.
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Requests that may wait for the agent at once.
const AGENT_CHANNEL_CAPACITY: usize = 32;

/// Options for one `run`.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub state_dir: PathBuf,
    /// Leave the session running on SIGINT/SIGTERM so the next `run` resumes.
    pub keep_running_on_signal: bool,
}

/// How a `run` ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub clicks: u32,
    pub daily_total: u32,
    pub resumed: bool,
}

/// Owns the configuration for one watcher process.
#[derive(Debug)]
pub struct Runner {
    options: RunOptions,
    config: WatchConfig,
}

impl Runner {
    #[must_use]
    pub fn new(options: RunOptions, config: WatchConfig) -> Self {
        Self { options, config }
    }

    /// Ask the watcher using `state_dir` to stop.
    pub fn request_stop(state_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(state_dir)?;
        let path = state_dir.join(STOP_REQUEST_FILE);
        std::fs::write(&path, Utc::now().to_rfc3339())?;
        Ok(path)
    }

    /// Alert sinks for this configuration: always tracing, plus the webhook
    /// when a backend is configured.
    pub fn alert_sink(&self) -> Result<Arc<dyn AlertSink>> {
        let mut fanout = FanoutAlertSink::new().with_sink(Arc::new(TracingAlertSink));
        if let Some(backend) = &self.config.alerts.backend_url {
            let timeout = Duration::from_secs(self.config.tuning.request_timeout_secs);
            let webhook = WebhookAlertSink::new(backend.clone(), timeout).into_config_error()?;
            info!("Alerts also sent to {}", backend);
            fanout = fanout.with_sink(Arc::new(webhook));
        }
        Ok(Arc::new(fanout))
    }

    /// Run until the session ends or the process is told to shut down.
    pub async fn run(self) -> Result<RunSummary> {
        self.config.session.validate()?;

        let state_dir = self.options.state_dir.clone();
        std::fs::create_dir_all(&state_dir)?;
        let store = Arc::new(FileStateStore::new(&state_dir));
        let alerts = self.alert_sink()?;

        let timeout = Duration::from_secs(self.config.tuning.request_timeout_secs);
        let driver: Arc<dyn PageDriver> =
            Arc::new(CdpPageDriver::connect(&self.config.browser, timeout).await?);
        let page_events = driver.subscribe().await?;

        let config = ConfigHandle::new(self.config.session.clone());
        let (agent_channel, requests) = AgentChannel::new(AGENT_CHANNEL_CAPACITY, timeout);
        let agent = PageAgent::new(
            Arc::clone(&driver),
            config.clone(),
            self.config.site.clone(),
            &self.config.tuning,
        )
        .with_credentials(self.config.account.credentials());
        tokio::spawn(agent.run(requests));

        let options = ControllerOptions {
            tuning: self.config.tuning.clone(),
            credentials_present: self.config.account.has_credentials(),
            missing_credentials: self
                .config
                .account
                .missing_fields()
                .into_iter()
                .map(str::to_string)
                .collect(),
        };
        let mut controller = SessionController::new(
            config.clone(),
            Arc::new(FileSettings::new(WatchConfig::settings_path(&state_dir))),
            store.clone(),
            alerts,
            agent_channel.clone(),
            options,
        )?;
        let session = controller.handle();

        tokio::spawn(pump_page_events(
            page_events,
            session.clone(),
            config,
            agent_channel,
        ));

        let stop_file = state_dir.join(STOP_REQUEST_FILE);
        if stop_file.exists() {
            debug!("Removing stale stop request");
            std::fs::remove_file(&stop_file)?;
        }
        tokio::spawn(watch_stop_requests(stop_file, session.clone()));

        let resumed = match controller.recover(Utc::now()) {
            RecoveryReport::Resumed {
                status,
                remaining_secs,
            } => {
                info!("Continuing {} session, {}s left", status, remaining_secs);
                true
            }
            RecoveryReport::Ready { countdown_secs } => {
                info!("Starting a {}s session", countdown_secs);
                controller.start().await?;
                false
            }
            RecoveryReport::CoolingDown { remaining_minutes } => {
                return Err(SlotwatchError::CooldownActive { remaining_minutes });
            }
        };

        let signals = SignalHandler::new(SignalHandlerConfig {
            keep_running: self.options.keep_running_on_signal,
        })
        .with_session(session);
        tokio::spawn(async move {
            if let Err(e) = signals.wait_for_shutdown().await {
                warn!("Signal handling unavailable: {}", e);
            }
        });

        controller.run().await?;

        let state = PersistedState::load_or_default(store.as_ref())?;
        Ok(RunSummary {
            clicks: state.counters.session_total,
            daily_total: state.counters.daily_total_on(Local::now().date_naive()),
            resumed,
        })
    }
}

/// Forward page events to the controller until either side goes away.
///
/// Whitelisted responses are classified here, synchronously, against the
/// deadline of the current configuration snapshot. DOM changes trigger a
/// dialog check at most once per [`DIALOG_CHECK_THROTTLE`].
pub(crate) async fn pump_page_events(
    mut events: mpsc::Receiver<PageEvent>,
    session: SessionHandle,
    config: ConfigHandle,
    agent: AgentChannel,
) {
    let classifier = ResponseClassifier::new();
    let mut last_dialog_check: Option<Instant> = None;

    while let Some(event) = events.recv().await {
        let delivered = match event {
            PageEvent::Response(response) => {
                let deadline = config.snapshot().search_end(Local::now().date_naive());
                match classifier.classify_response(&response.url, &response.body, deadline) {
                    Some(classification) => {
                        debug!(
                            url = %response.url,
                            status = response.status,
                            kind = classification.label(),
                            "Response classified"
                        );
                        session
                            .notify(SessionEvent::Classified(classification))
                            .await
                    }
                    None => Ok(()),
                }
            }
            PageEvent::Loaded { url } => session.notify(SessionEvent::PageLoaded { url }).await,
            PageEvent::DomChanged => {
                let now = Instant::now();
                if last_dialog_check.map_or(true, |at| now.duration_since(at) >= DIALOG_CHECK_THROTTLE) {
                    last_dialog_check = Some(now);
                    let agent = agent.clone();
                    tokio::spawn(async move {
                        if let Err(e) = agent.request(AgentCommand::CheckDialog).await {
                            debug!("Dialog check skipped: {}", e);
                        }
                    });
                }
                Ok(())
            }
        };

        if delivered.is_err() {
            debug!("Session loop gone; page event pump exiting");
            break;
        }
    }
}

/// Stop the session when the stop-request file appears.
pub(crate) async fn watch_stop_requests(path: PathBuf, session: SessionHandle) {
    let mut ticker = tokio::time::interval(STOP_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if !path.exists() {
            continue;
        }
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("Could not remove {}: {}", path.display(), e);
        }
        info!("Stop requested");
        if let Err(e) = session.stop().await {
            debug!("Stop request not delivered: {}", e);
        }
        let _ = session.shutdown().await;
        break;
    }
}
