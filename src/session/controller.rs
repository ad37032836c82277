//! The session state machine.
//!
//! [`SessionController`] owns every mutable field of a run and is driven by
//! one task. Commands, timer ticks, agent replies, classified responses and
//! page loads all arrive as [`SessionEvent`]s on a single channel and go
//! through [`SessionController::handle_event`], one at a time.
//!
//! Page work never blocks the loop: a command for the agent is sent from a
//! spawned task whose answer comes back as [`SessionEvent::AgentDone`].
//!
//! # Claim sequence
//!
//! ```text
//! Classified(SlotFound) ─► BeginClaim ─► ClaimPlanned ─► Navigate(first)
//!                                                            │
//!   PageLoaded ◄─────────────────────────────────────────────┘
//!       ├─ queue non-empty ─► Navigate(next) ─► PageLoaded ...
//!       └─ queue empty ─────► InspectPage ─► Success / SlotLost / InProgress
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{CooldownGate, GateDecision, SessionStatus, TimerSlot};
use crate::agent::{
    ActionOutcome, AgentChannel, AgentCommand, AgentReply, ChallengeDedup, PageCheck,
};
use crate::alerts::{AlertEvent, AlertSink};
use crate::classifier::Classification;
use crate::config::{ConfigHandle, SessionConfig, SettingsSource, TuningConfig};
use crate::error::{Result, SlotwatchError};
use crate::reservation::{next_step, ClaimPlan, ClaimStep, PanelOutcome, ReservationSummary};
use crate::state::{LogLevel, PersistedState};
use crate::store::StateStore;

/// Capacity of the controller's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Inspections of a page without a reservation panel before a claim is
/// given up.
pub const MAX_PANEL_WAITS: u32 = 10;

/// Operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    Start,
    Stop,
    Pause,
    Resume,
    /// Persist and leave the loop without stopping the run.
    Shutdown,
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum SessionEvent {
    Command {
        command: SessionCommand,
        reply: Option<oneshot::Sender<Result<SessionStatus>>>,
    },
    CountdownTick,
    ActionDue,
    AgentDone {
        command: AgentCommand,
        result: Result<AgentReply>,
    },
    Classified(Classification),
    PageLoaded {
        url: String,
    },
    /// Re-send a command after a soft failure or a wait.
    Retry(AgentCommand),
}

/// Knobs the controller takes from the settings file.
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub tuning: TuningConfig,
    /// Account credentials are configured.
    pub credentials_present: bool,
    /// Names of the missing credential fields, for the error message.
    pub missing_credentials: Vec<String>,
}

/// What [`SessionController::recover`] found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryReport {
    /// A run was in progress and continues without a start alert.
    Resumed {
        status: SessionStatus,
        remaining_secs: u64,
    },
    /// Idle and free to start with this much time.
    Ready { countdown_secs: u64 },
    /// Idle and still cooling down.
    CoolingDown { remaining_minutes: i64 },
}

/// Cloneable way into a running controller.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Handle around a bare channel, for wiring tests.
    #[cfg(test)]
    pub(crate) fn from_sender(tx: mpsc::Sender<SessionEvent>) -> Self {
        Self { tx }
    }

    async fn command(&self, command: SessionCommand) -> Result<SessionStatus> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(SessionEvent::Command {
                command,
                reply: Some(reply),
            })
            .await
            .map_err(|_| SlotwatchError::NotRunning)?;
        answer.await.map_err(|_| SlotwatchError::NotRunning)?
    }

    pub async fn start(&self) -> Result<SessionStatus> {
        self.command(SessionCommand::Start).await
    }

    pub async fn stop(&self) -> Result<SessionStatus> {
        self.command(SessionCommand::Stop).await
    }

    pub async fn pause(&self) -> Result<SessionStatus> {
        self.command(SessionCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<SessionStatus> {
        self.command(SessionCommand::Resume).await
    }

    /// Ask the loop to persist and exit. Does not wait for an answer.
    pub async fn shutdown(&self) -> Result<()> {
        self.notify(SessionEvent::Command {
            command: SessionCommand::Shutdown,
            reply: None,
        })
        .await
    }

    /// Deliver an event without waiting for it to be handled.
    pub async fn notify(&self, event: SessionEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| SlotwatchError::NotRunning)
    }
}

/// Top-level state machine for one watcher process.
pub struct SessionController {
    config: ConfigHandle,
    settings: Arc<dyn SettingsSource>,
    options: ControllerOptions,
    state: PersistedState,
    store: Arc<dyn StateStore>,
    alerts: Arc<dyn AlertSink>,
    agent: AgentChannel,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: mpsc::Receiver<SessionEvent>,
    countdown: TimerSlot,
    next_action: TimerSlot,
    retry: TimerSlot,
    challenges: ChallengeDedup,
    in_flight: usize,
    pending_backoff: Option<Duration>,
    soft_retried: bool,
    restart_pending: bool,
    panel_waits: u32,
    shutdown: bool,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("status", &self.state.session.status)
            .field("countdown", &self.state.session.countdown_remaining_secs)
            .field("claim_active", &self.state.claim_active)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Build a controller around the state found in `store`.
    pub fn new(
        config: ConfigHandle,
        settings: Arc<dyn SettingsSource>,
        store: Arc<dyn StateStore>,
        alerts: Arc<dyn AlertSink>,
        agent: AgentChannel,
        options: ControllerOptions,
    ) -> Result<Self> {
        let state = PersistedState::load_or_default(store.as_ref())?;
        if let Some(saved) = &state.config {
            config.swap(saved.clone());
        }
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let challenges = ChallengeDedup::new(Duration::from_secs(options.tuning.captcha_dedup_secs));

        Ok(Self {
            config,
            settings,
            options,
            state,
            store,
            alerts,
            agent,
            events_tx,
            events_rx,
            countdown: TimerSlot::new("countdown"),
            next_action: TimerSlot::new("next_action"),
            retry: TimerSlot::new("retry"),
            challenges,
            in_flight: 0,
            pending_backoff: None,
            soft_retried: false,
            restart_pending: false,
            panel_waits: 0,
            shutdown: false,
        })
    }

    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            tx: self.events_tx.clone(),
        }
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.state.session.status
    }

    #[must_use]
    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> Arc<SessionConfig> {
        self.config.snapshot()
    }

    /// Commands sent to the agent and not yet answered.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Handle events until the run is over or a shutdown is requested.
    pub async fn run(mut self) -> Result<()> {
        info!("Session loop started ({})", self.status());
        while !self.is_finished() {
            let Some(event) = self.next_event().await else {
                break;
            };
            self.handle_event(event).await;
        }
        self.persist();
        info!("Session loop finished ({})", self.status());
        Ok(())
    }

    /// Wait for the next event.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    fn is_finished(&self) -> bool {
        self.shutdown
            || (self.status() == SessionStatus::Idle && !self.restart_pending && self.in_flight == 0)
    }

    // =========================================================================
    // Event dispatch
    // =========================================================================

    /// Single entry point for everything that happens to the session.
    pub async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Command { command, reply } => {
                let result = self.apply_command(command).await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            warn!("{:?} rejected: {}", command, e);
                        }
                    }
                }
            }
            SessionEvent::CountdownTick => self.on_tick(),
            SessionEvent::ActionDue => self.on_action_due(),
            SessionEvent::AgentDone { command, result } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.on_agent_done(command, result).await;
            }
            SessionEvent::Classified(classification) => self.on_classified(classification),
            SessionEvent::PageLoaded { url } => self.on_page_loaded(&url),
            SessionEvent::Retry(command) => self.on_retry(command),
        }
    }

    async fn apply_command(&mut self, command: SessionCommand) -> Result<SessionStatus> {
        match command {
            SessionCommand::Start => self.start().await,
            SessionCommand::Stop => {
                self.stop(false, false);
                Ok(self.status())
            }
            SessionCommand::Pause | SessionCommand::Resume => {
                // An operator decision overrides the automatic resume.
                self.state.housekeeping = false;
                if command == SessionCommand::Pause {
                    self.pause()
                } else {
                    self.resume()
                }
            }
            SessionCommand::Shutdown => {
                info!("Shutdown requested; state kept for the next process");
                self.countdown.cancel();
                self.next_action.cancel();
                self.retry.cancel();
                self.shutdown = true;
                self.persist();
                Ok(self.status())
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a run, or continue a paused one.
    pub async fn start(&mut self) -> Result<SessionStatus> {
        self.start_inner(Utc::now(), false).await
    }

    async fn start_inner(&mut self, now: DateTime<Utc>, silent: bool) -> Result<SessionStatus> {
        match self.status() {
            SessionStatus::Running => {
                debug!("Start ignored: already running");
                return Ok(SessionStatus::Running);
            }
            SessionStatus::Paused => return self.resume(),
            SessionStatus::Idle => {}
        }

        if !self.options.credentials_present {
            let detail = if self.options.missing_credentials.is_empty() {
                "username and password".to_string()
            } else {
                self.options.missing_credentials.join(", ")
            };
            self.log(LogLevel::Error, format!("Credentials missing: {detail}"), None);
            self.persist();
            self.alerts.emit(AlertEvent::CredentialsMissing);
            return Err(SlotwatchError::CredentialsMissing { detail });
        }

        let config = self.refresh_config().await;

        let today = Local::now().date_naive();
        self.state.counters.roll_day(today);
        let daily = self.state.counters.daily_total_on(today);
        if daily >= config.max_clicks_per_day {
            self.log(
                LogLevel::Warning,
                format!("Daily click limit already reached ({daily}/{})", config.max_clicks_per_day),
                None,
            );
            self.persist();
            return Err(SlotwatchError::ClickLimit {
                clicks: daily,
                limit: config.max_clicks_per_day,
            });
        }

        let decision = CooldownGate::evaluate(&self.state.session, &config, now);
        if let GateDecision::Reject { remaining_minutes } = decision {
            self.log(
                LogLevel::Warning,
                format!("Start rejected: cooling down for {remaining_minutes} more minute(s)"),
                None,
            );
            self.persist();
            return Err(SlotwatchError::CooldownActive { remaining_minutes });
        }
        if !matches!(decision, GateDecision::Resume { .. }) {
            self.state.session.cooldown_alert_sent = false;
        }
        decision.apply(&mut self.state.session);

        self.state.counters.reset_session();
        self.state.session.status = SessionStatus::Running;
        self.soft_retried = false;
        self.log(
            LogLevel::Info,
            format!(
                "Session started ({}s remaining)",
                self.state.session.countdown_remaining_secs
            ),
            Some(json!({ "decision": format!("{decision:?}"), "silent": silent })),
        );
        self.persist();

        self.arm_countdown();
        if !silent {
            self.alerts.emit(AlertEvent::SessionStart);
        }
        if self.state.claim_active {
            self.resume_claim();
        } else {
            self.schedule_next(Some(Duration::ZERO));
        }
        Ok(SessionStatus::Running)
    }

    /// Fetch settings for this run, falling back to the last snapshot.
    async fn refresh_config(&mut self) -> Arc<SessionConfig> {
        match self.settings.fetch().await {
            Ok(config) => {
                self.config.swap(config.clone());
                self.state.config = Some(config);
            }
            Err(e) => {
                warn!("Settings unavailable, using last known settings: {}", e);
                if let Some(saved) = self.state.config.clone() {
                    self.config.swap(saved);
                }
            }
        }
        self.config.snapshot()
    }

    /// End the run.
    ///
    /// Only a run whose countdown reached zero counts as fully served and
    /// starts the cooldown. A no-op when already idle.
    pub fn stop(&mut self, completed_full_duration: bool, suppress_alert: bool) {
        if self.status() == SessionStatus::Idle {
            debug!("Stop ignored: already idle");
            return;
        }

        self.countdown.cancel();
        self.next_action.cancel();
        self.retry.cancel();
        self.pending_backoff = None;
        self.state.housekeeping = false;
        self.end_claim();

        self.state
            .session
            .mark_stopped(completed_full_duration, Utc::now());
        let clicks = self.state.counters.session_total;
        self.log(
            LogLevel::Info,
            if completed_full_duration {
                format!("Session completed full duration after {clicks} click(s)")
            } else {
                format!("Session stopped after {clicks} click(s)")
            },
            None,
        );
        self.persist();

        if !suppress_alert {
            self.alerts.emit(AlertEvent::SessionEnd {
                clicks_count: clicks,
            });
        }
    }

    /// Suspend scheduling. The countdown keeps running.
    pub fn pause(&mut self) -> Result<SessionStatus> {
        match self.status() {
            SessionStatus::Idle => Err(SlotwatchError::NotRunning),
            SessionStatus::Paused => Ok(SessionStatus::Paused),
            SessionStatus::Running => {
                self.next_action.cancel();
                self.state.session.status = SessionStatus::Paused;
                self.log(LogLevel::Info, "Session paused", None);
                self.persist();
                Ok(SessionStatus::Paused)
            }
        }
    }

    /// Resume scheduling and act right away.
    pub fn resume(&mut self) -> Result<SessionStatus> {
        match self.status() {
            SessionStatus::Idle => Err(SlotwatchError::NotRunning),
            SessionStatus::Running => Ok(SessionStatus::Running),
            SessionStatus::Paused => {
                self.state.session.status = SessionStatus::Running;
                self.log(LogLevel::Info, "Session resumed", None);
                self.persist();
                self.arm_countdown();
                if self.state.claim_active {
                    self.resume_claim();
                } else {
                    self.schedule_next(Some(Duration::ZERO));
                }
                Ok(SessionStatus::Running)
            }
        }
    }

    /// Pick up after a process restart.
    ///
    /// A run that was in progress continues silently; an idle session is
    /// run through the cooldown gate so the caller knows whether it may
    /// start.
    pub fn recover(&mut self, now: DateTime<Utc>) -> RecoveryReport {
        if std::mem::take(&mut self.state.housekeeping)
            && self.status() == SessionStatus::Paused
        {
            info!("Previous process stopped during housekeeping; resuming");
            self.state.session.status = SessionStatus::Running;
        }
        let status = self.status();
        let remaining = self.state.session.countdown_remaining_secs;

        if status.is_active() && remaining > 0 {
            info!("Resuming {} session with {}s remaining", status, remaining);
            self.log(
                LogLevel::Info,
                format!("Recovered {status} session ({remaining}s remaining)"),
                None,
            );
            self.persist();
            self.arm_countdown();
            if status == SessionStatus::Running {
                if self.state.claim_active {
                    self.resume_claim();
                } else {
                    self.schedule_next(Some(Duration::ZERO));
                }
            }
            return RecoveryReport::Resumed {
                status,
                remaining_secs: remaining,
            };
        }

        if status.is_active() {
            warn!("Persisted {} session had no time left; treating as stopped", status);
            self.state.session.mark_stopped(true, now);
            self.end_claim();
        }

        let config = self.config.snapshot();
        let report = match CooldownGate::evaluate(&self.state.session, &config, now) {
            GateDecision::Reject { remaining_minutes } => {
                RecoveryReport::CoolingDown { remaining_minutes }
            }
            decision => {
                decision.apply(&mut self.state.session);
                RecoveryReport::Ready {
                    countdown_secs: self.state.session.countdown_remaining_secs,
                }
            }
        };
        self.persist();
        report
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn arm_countdown(&mut self) {
        if self.countdown.is_armed() {
            return;
        }
        let tx = self.events_tx.clone();
        self.countdown.arm(async move {
            let period = Duration::from_secs(1);
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if tx.send(SessionEvent::CountdownTick).await.is_err() {
                    break;
                }
            }
        });
    }

    fn on_tick(&mut self) {
        if !self.status().is_active() {
            self.countdown.cancel();
            return;
        }
        if self.state.session.tick() {
            info!("Full running time served");
            self.stop(true, false);
            return;
        }
        if self.state.session.check_ending_soon() {
            self.log(
                LogLevel::Warning,
                format!(
                    "Session ending in {}s",
                    self.state.session.countdown_remaining_secs
                ),
                None,
            );
        }
        self.persist();
    }

    /// Arm the next poll. Backoff requested by a rate limit wins over
    /// `delay`; without either a jittered delay is drawn.
    fn schedule_next(&mut self, delay: Option<Duration>) {
        if self.status() != SessionStatus::Running || self.state.claim_active {
            return;
        }
        let delay = self
            .pending_backoff
            .take()
            .or(delay)
            .unwrap_or_else(|| self.jitter());
        debug!(?delay, "Next action scheduled");
        let tx = self.events_tx.clone();
        self.next_action.arm_after(delay, async move {
            let _ = tx.send(SessionEvent::ActionDue).await;
        });
    }

    fn jitter(&self) -> Duration {
        let config = self.config.snapshot();
        let (min, max) = (config.jitter_min.max(0.0), config.jitter_max.max(0.0));
        let secs = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        Duration::from_secs_f64(secs)
    }

    fn retry_after(&mut self, delay: Duration, command: AgentCommand) {
        let tx = self.events_tx.clone();
        self.retry.arm_after(delay, async move {
            let _ = tx.send(SessionEvent::Retry(command)).await;
        });
    }

    fn on_action_due(&mut self) {
        if self.status() != SessionStatus::Running || self.state.claim_active {
            return;
        }
        self.dispatch(AgentCommand::Poll);
    }

    fn on_retry(&mut self, command: AgentCommand) {
        let relevant = match &command {
            AgentCommand::Poll => {
                self.status() == SessionStatus::Running && !self.state.claim_active
            }
            AgentCommand::Housekeeping => {
                self.state.housekeeping && self.status() == SessionStatus::Paused
            }
            AgentCommand::ReturnToResults { .. } | AgentCommand::CheckDialog => true,
            AgentCommand::InspectPage { claim_active } => {
                *claim_active == self.state.claim_active && self.status().is_active()
            }
            _ => self.state.claim_active && self.status().is_active(),
        };
        if relevant {
            self.dispatch(command);
        } else {
            debug!(command = command.name(), "Dropping stale retry");
        }
    }

    // =========================================================================
    // Agent round trips
    // =========================================================================

    fn dispatch(&mut self, command: AgentCommand) {
        self.in_flight += 1;
        let agent = self.agent.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = agent.request(command.clone()).await;
            let _ = tx.send(SessionEvent::AgentDone { command, result }).await;
        });
    }

    async fn on_agent_done(&mut self, command: AgentCommand, result: Result<AgentReply>) {
        let reply = match result {
            Ok(reply) => {
                self.soft_retried = false;
                reply
            }
            Err(e) => {
                self.on_agent_error(command, e).await;
                return;
            }
        };

        match reply {
            AgentReply::Action(outcome) => self.on_action(outcome),
            AgentReply::HousekeepingDone => {
                debug!("Housekeeping finished");
                self.finish_housekeeping();
            }
            AgentReply::Page(check) => self.on_page_check(check),
            AgentReply::ClaimPlanned(plan) => self.on_claim_planned(plan),
            AgentReply::Navigated => {}
            AgentReply::Returned => self.finish_slot_lost().await,
            AgentReply::DialogChecked { dismissed } => {
                if dismissed {
                    self.log(LogLevel::Info, "Dismissed back-button warning", None);
                    self.persist();
                }
            }
        }
    }

    async fn on_agent_error(&mut self, command: AgentCommand, e: SlotwatchError) {
        if e.is_soft_failure() && !self.soft_retried && self.status().is_active() {
            self.soft_retried = true;
            let delay = Duration::from_secs(self.options.tuning.soft_retry_delay_secs);
            warn!(command = command.name(), "Page not ready ({}); retrying in {:?}", e, delay);
            self.retry_after(delay, command);
            return;
        }
        self.soft_retried = false;

        match (&command, e) {
            (AgentCommand::BeginClaim { .. }, SlotwatchError::ClaimLinkMissing { slot_link, reason }) => {
                self.log(
                    LogLevel::Warning,
                    format!("No claim link for slot: {reason}"),
                    Some(json!({ "slotLink": slot_link })),
                );
                self.alerts
                    .emit(AlertEvent::ClaimLinkMissing { slot_link, reason });
                self.end_claim();
                self.persist();
                self.schedule_next(None);
            }
            (AgentCommand::ReturnToResults { .. }, e) => {
                warn!("Could not return to results: {}", e);
                self.finish_slot_lost().await;
            }
            (AgentCommand::CheckDialog, e) => debug!("Dialog check failed: {}", e),
            (AgentCommand::Housekeeping, e) => {
                self.log(LogLevel::Error, format!("Housekeeping failed: {e}"), None);
                self.finish_housekeeping();
            }
            (command, e) if command.is_claim_step() => {
                self.abandon_claim(&format!("{} failed: {e}", command.name()));
            }
            (command, e) => {
                self.log(
                    LogLevel::Error,
                    format!("{} failed: {e}", command.name()),
                    None,
                );
                self.persist();
                if matches!(command, AgentCommand::Poll) {
                    self.schedule_next(None);
                }
            }
        }
    }

    fn on_action(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Clicked(kind) => {
                let today = Local::now().date_naive();
                let daily = self.state.counters.record(kind, today);
                self.persist();

                let limit = self.config.snapshot().max_clicks_per_day;
                if daily >= limit && self.status().is_active() {
                    self.log(
                        LogLevel::Warning,
                        format!("Daily click limit reached ({daily}/{limit})"),
                        None,
                    );
                    self.alerts.emit(AlertEvent::ClickLimitWarning {
                        clicks: daily,
                        limit,
                    });
                    self.stop(false, false);
                    return;
                }
                self.schedule_next(None);
            }
            ActionOutcome::PeriodUnknown => {
                debug!("Period unknown; trying again later");
                self.schedule_next(None);
            }
            ActionOutcome::ControlMissing(control) => {
                self.log(LogLevel::Warning, format!("Control {control} not on page"), None);
                self.persist();
                self.schedule_next(None);
            }
            ActionOutcome::HousekeepingDue => {
                if self.status() == SessionStatus::Running && !self.state.claim_active {
                    self.log(LogLevel::Info, "Refreshing search filters", None);
                    self.state.housekeeping = true;
                    if let Err(e) = self.pause() {
                        warn!("Could not pause for housekeeping: {}", e);
                    }
                    self.dispatch(AgentCommand::Housekeeping);
                }
            }
        }
    }

    /// Resume after a filter refresh, unless the session ended or an
    /// operator paused it meanwhile.
    fn finish_housekeeping(&mut self) {
        if !std::mem::take(&mut self.state.housekeeping) {
            self.persist();
            return;
        }
        if self.status() == SessionStatus::Paused {
            if let Err(e) = self.resume() {
                warn!("Could not resume after housekeeping: {}", e);
            }
        } else {
            self.persist();
        }
    }

    // =========================================================================
    // Classified responses and page loads
    // =========================================================================

    fn on_classified(&mut self, classification: Classification) {
        match classification {
            Classification::SlotFound {
                claim_link,
                period_start,
            } => {
                if self.status() != SessionStatus::Running {
                    debug!("Slot ignored while {}", self.status());
                    return;
                }
                if self.state.claim_active {
                    debug!("Slot ignored: claim already in progress");
                    return;
                }
                self.log(
                    LogLevel::Success,
                    "Slot found",
                    Some(json!({ "link": claim_link, "periodStart": period_start })),
                );
                self.state.claim_active = true;
                self.state.claim_queue.clear();
                self.panel_waits = 0;
                self.next_action.cancel();
                self.pending_backoff = None;
                self.persist();
                self.dispatch(AgentCommand::BeginClaim {
                    slot_link: claim_link,
                });
            }
            Classification::RateLimited => {
                let backoff = Duration::from_secs(self.options.tuning.rate_limit_backoff_secs);
                self.log(
                    LogLevel::Warning,
                    format!("Rate limited; backing off {}s", backoff.as_secs()),
                    None,
                );
                self.persist();
                self.pending_backoff = Some(backoff);
                if self.next_action.is_armed() {
                    self.schedule_next(None);
                }
            }
            Classification::CaptchaChallenge { sitekey } => {
                if self.state.claim_active {
                    self.on_page_check(PageCheck::Challenge {
                        sitekey,
                        url: "weekly search".to_string(),
                        during_claim: true,
                        repeated: false,
                    });
                    return;
                }
                let now = tokio::time::Instant::now();
                if self
                    .challenges
                    .should_report(sitekey.as_deref(), "weekly search", now)
                {
                    self.log(
                        LogLevel::Warning,
                        "Captcha challenge on weekly search",
                        Some(json!({ "sitekey": sitekey })),
                    );
                    self.persist();
                }
            }
            Classification::FatalSystemError { code } => {
                self.log(
                    LogLevel::Error,
                    format!("Fatal site error (code {code})"),
                    None,
                );
                self.alerts.emit(AlertEvent::FatalError { code });
                self.stop(false, false);
            }
            Classification::NoSlot => {}
        }
    }

    fn on_page_loaded(&mut self, url: &str) {
        if !self.status().is_active() {
            debug!(%url, "Page load ignored while idle");
            return;
        }
        if !self.state.claim_active {
            self.dispatch(AgentCommand::InspectPage {
                claim_active: false,
            });
            return;
        }

        match next_step(&mut self.state.claim_queue) {
            ClaimStep::Visit(link) => {
                info!(
                    remaining = self.state.claim_queue.len(),
                    "Following next claim link"
                );
                self.persist();
                self.dispatch(AgentCommand::Navigate {
                    url: link,
                    delay: Duration::from_millis(self.options.tuning.claim_step_delay_ms),
                });
            }
            ClaimStep::Inspect => self.dispatch(AgentCommand::InspectPage { claim_active: true }),
        }
    }

    fn on_page_check(&mut self, check: PageCheck) {
        match check {
            PageCheck::Ready => {}
            PageCheck::Recovering { reason } => {
                self.log(
                    LogLevel::Warning,
                    format!("Recovering from dead-end page: {reason}"),
                    None,
                );
                if self.state.claim_active {
                    self.abandon_claim("page reset during claim");
                } else {
                    self.persist();
                }
            }
            PageCheck::SignedIn { page } => {
                self.log(LogLevel::Info, format!("Signed in again via {page}"), None);
                if self.state.claim_active {
                    self.abandon_claim("signed out during claim");
                } else {
                    self.persist();
                }
            }
            PageCheck::CredentialsMissing => {
                self.log(
                    LogLevel::Error,
                    "Sign-in required but no credentials are configured",
                    None,
                );
                self.alerts.emit(AlertEvent::CredentialsMissing);
                self.stop(false, false);
            }
            PageCheck::Challenge {
                sitekey,
                url,
                during_claim,
                repeated,
            } => {
                if during_claim {
                    self.log(
                        LogLevel::Error,
                        "Captcha challenge during claim",
                        Some(json!({ "sitekey": sitekey, "url": url })),
                    );
                    self.alerts
                        .emit(AlertEvent::CaptchaDuringClaim { sitekey, url });
                    self.stop(false, false);
                } else if !repeated {
                    self.log(
                        LogLevel::Warning,
                        "Captcha challenge on page",
                        Some(json!({ "sitekey": sitekey, "url": url })),
                    );
                    self.persist();
                }
            }
            PageCheck::Panel(outcome) => self.on_panel(outcome),
        }
    }

    // =========================================================================
    // Claims
    // =========================================================================

    fn on_claim_planned(&mut self, plan: ClaimPlan) {
        if !self.state.claim_active || !self.status().is_active() {
            debug!("Claim plan arrived after the claim ended");
            return;
        }
        let count = plan.count();
        self.alerts.emit(AlertEvent::SlotFound { count });
        self.log(
            LogLevel::Info,
            format!("Claiming {count} slot(s)"),
            Some(json!({ "slotLink": plan.slot_link })),
        );
        self.state.claim_queue.replace(plan.rest);
        self.persist();
        self.dispatch(AgentCommand::Navigate {
            url: plan.first,
            delay: Duration::ZERO,
        });
    }

    fn on_panel(&mut self, outcome: PanelOutcome) {
        if !self.state.claim_active {
            return;
        }
        let retry_delay = Duration::from_secs(self.options.tuning.soft_retry_delay_secs);
        match outcome {
            PanelOutcome::Success(summary) => self.finish_success(summary),
            PanelOutcome::SlotLost { location_info } => self.begin_slot_lost(location_info),
            PanelOutcome::InProgress => {
                debug!("Claim in progress");
                self.panel_waits = 0;
                self.retry_after(retry_delay, AgentCommand::InspectPage { claim_active: true });
            }
            PanelOutcome::NotReady => {
                self.panel_waits += 1;
                if self.panel_waits > MAX_PANEL_WAITS {
                    self.abandon_claim("reservation panel never appeared");
                } else {
                    self.retry_after(retry_delay, AgentCommand::InspectPage { claim_active: true });
                }
            }
        }
    }

    fn finish_success(&mut self, summary: ReservationSummary) {
        self.log(
            LogLevel::Success,
            format!("Reserved {} slot(s) at {}", summary.reserved_count, summary.test_center),
            serde_json::to_value(&summary).ok(),
        );
        self.alerts.emit(AlertEvent::ReservationSuccess {
            test_center: summary.test_center,
            slots: summary.slots,
            minutes_remaining: summary.minutes_remaining,
            reserved_count: summary.reserved_count,
        });
        self.stop(false, false);
    }

    fn begin_slot_lost(&mut self, location_info: String) {
        self.log(
            LogLevel::Warning,
            format!("Slot lost at {location_info}"),
            None,
        );
        self.stop(false, true);
        self.alerts.emit(AlertEvent::SlotLost { location_info });

        self.restart_pending = self.options.tuning.resume_after_slot_lost;
        let delay = Duration::from_millis(rand::thread_rng().gen_range(1000..=2000));
        self.dispatch(AgentCommand::ReturnToResults { delay });
    }

    async fn finish_slot_lost(&mut self) {
        if !std::mem::take(&mut self.restart_pending) {
            return;
        }
        info!("Restarting after lost slot");
        if let Err(e) = self.start_inner(Utc::now(), true).await {
            warn!("Could not restart after lost slot: {}", e);
        }
    }

    fn resume_claim(&mut self) {
        match self.state.claim_queue.dequeue() {
            Some(link) => {
                self.persist();
                self.dispatch(AgentCommand::Navigate {
                    url: link,
                    delay: Duration::ZERO,
                });
            }
            None => self.dispatch(AgentCommand::InspectPage { claim_active: true }),
        }
    }

    fn abandon_claim(&mut self, reason: &str) {
        self.log(LogLevel::Warning, format!("Claim abandoned: {reason}"), None);
        self.end_claim();
        self.persist();
        self.schedule_next(None);
    }

    fn end_claim(&mut self) {
        self.state.claim_active = false;
        self.state.claim_queue.clear();
        self.panel_waits = 0;
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn log(&mut self, level: LogLevel, message: impl Into<String>, data: Option<serde_json::Value>) {
        let message = message.into();
        match level {
            LogLevel::Error => error!("{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Info | LogLevel::Success => info!("{}", message),
        }
        self.state.log.push(level, message, data);
    }

    fn persist(&mut self) {
        if let Err(e) = self.state.save(self.store.as_ref()) {
            warn!("Failed to persist state: {}", e);
        }
    }
}
