//! Page automation agent.
//!
//! The agent is the only task that touches the page. It runs as an actor:
//! the session controller sends it one [`AgentCommand`] at a time over a
//! [`PageChannel`] and gets an [`AgentReply`] back. Commands run to
//! completion in arrival order, so the page never sees two interleaved
//! action sequences.
//!
//! # Poll decision
//!
//! ```text
//! read date range ──unparseable──► PeriodUnknown
//!       │
//!       ├── threshold reached ──► HousekeepingDue (no click)
//!       │
//!       ├── overlaps target ──► click NextAvailable
//!       └── otherwise ────────► click PreviousAvailable
//! ```

pub mod dialog;
pub mod housekeeping;
pub mod period;
pub mod recovery;

pub use dialog::{ChallengeDedup, DialogAction, DialogWatch};
pub use housekeeping::{HousekeepingCounter, HousekeepingTiming, ReloadThreshold};
pub use period::{choose_control, parse_period, target_period, Period};
pub use recovery::{RecoveryReason, SignInPage, SignInStep};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::channel::{PageChannel, PageRequest};
use crate::config::{ConfigHandle, Credentials, SiteConfig, TuningConfig};
use crate::error::{Result, SlotwatchError};
use crate::page::{Control, FormField, PageDriver, PageRegion};
use crate::reservation::{evaluate, ClaimPlan, PanelOutcome, PanelSnapshot, ReservationWorkflow};
use crate::state::ClickKind;

/// Channel type the controller uses to reach the agent.
pub type AgentChannel = PageChannel<AgentCommand, AgentReply>;

/// Request type the agent receives.
pub type AgentRequest = PageRequest<AgentCommand, AgentReply>;

/// Work the controller can ask of the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentCommand {
    /// Make the next navigation click.
    Poll,
    /// Refresh the search filters and wait for the reload.
    Housekeeping,
    /// Look at a freshly loaded page.
    InspectPage { claim_active: bool },
    /// Fetch the day page of a slot and plan the claim.
    BeginClaim { slot_link: String },
    /// Wait, then replace the document with `url`.
    Navigate { url: String, delay: Duration },
    /// Wait, then go back to the weekly results.
    ReturnToResults { delay: Duration },
    /// Dismiss the back-button warning if it is showing.
    CheckDialog,
}

impl AgentCommand {
    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Poll => "poll",
            Self::Housekeeping => "housekeeping",
            Self::InspectPage { .. } => "inspect_page",
            Self::BeginClaim { .. } => "begin_claim",
            Self::Navigate { .. } => "navigate",
            Self::ReturnToResults { .. } => "return_to_results",
            Self::CheckDialog => "check_dialog",
        }
    }

    /// Wait before the command touches the page.
    #[must_use]
    pub fn delay(&self) -> Option<Duration> {
        match self {
            Self::Navigate { delay, .. } | Self::ReturnToResults { delay } => Some(*delay),
            _ => None,
        }
    }

    /// Part of a claim rather than of polling.
    #[must_use]
    pub fn is_claim_step(&self) -> bool {
        matches!(
            self,
            Self::BeginClaim { .. } | Self::Navigate { .. } | Self::InspectPage { claim_active: true }
        )
    }
}

/// Result of a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Clicked(ClickKind),
    /// The date range could not be read or parsed; nothing was clicked.
    PeriodUnknown,
    /// The chosen control is not on the page.
    ControlMissing(Control),
    /// Housekeeping must run before the next click.
    HousekeepingDue,
}

/// What a page inspection found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCheck {
    /// A dead-end page; the agent already navigated to the landing URL.
    Recovering { reason: RecoveryReason },
    /// A sign-in page was submitted.
    SignedIn { page: SignInPage },
    /// The credentials form is showing and no account is configured.
    CredentialsMissing,
    /// A challenge widget is showing.
    Challenge {
        sitekey: Option<String>,
        url: String,
        during_claim: bool,
        /// Same challenge was already reported within the de-dup window.
        repeated: bool,
    },
    /// The reservation panel was judged.
    Panel(PanelOutcome),
    /// Nothing needs attention.
    Ready,
}

/// Answer to an [`AgentCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentReply {
    Action(ActionOutcome),
    HousekeepingDone,
    Page(PageCheck),
    ClaimPlanned(ClaimPlan),
    Navigated,
    Returned,
    DialogChecked { dismissed: bool },
}

/// The page actor.
pub struct PageAgent {
    driver: Arc<dyn PageDriver>,
    config: ConfigHandle,
    site: SiteConfig,
    workflow: ReservationWorkflow,
    housekeeping: HousekeepingCounter,
    timing: HousekeepingTiming,
    dialog: DialogWatch,
    challenges: ChallengeDedup,
    reserved_cap: usize,
    credentials: Option<Credentials>,
}

impl std::fmt::Debug for PageAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageAgent")
            .field("housekeeping", &self.housekeeping)
            .field("reserved_cap", &self.reserved_cap)
            .finish_non_exhaustive()
    }
}

impl PageAgent {
    #[must_use]
    pub fn new(
        driver: Arc<dyn PageDriver>,
        config: ConfigHandle,
        site: SiteConfig,
        tuning: &TuningConfig,
    ) -> Self {
        Self {
            driver,
            config,
            workflow: ReservationWorkflow::new(site.clone()),
            site,
            housekeeping: HousekeepingCounter::new(ReloadThreshold::new(
                tuning.reload_threshold_min,
                tuning.reload_threshold_max,
            )),
            timing: HousekeepingTiming::default(),
            dialog: DialogWatch::default(),
            challenges: ChallengeDedup::new(Duration::from_secs(tuning.captcha_dedup_secs)),
            reserved_cap: tuning.reserved_cap,
            credentials: None,
        }
    }

    /// Account used when the page lands on the credentials form.
    #[must_use]
    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Override housekeeping waits.
    #[must_use]
    pub fn with_timing(mut self, timing: HousekeepingTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Serve requests until every sender is gone.
    ///
    /// A request whose caller already gave up is dropped without touching
    /// the page, including one abandoned during its delay.
    pub async fn run(mut self, mut requests: mpsc::Receiver<AgentRequest>) {
        debug!("Page agent started");
        while let Some(mut request) = requests.recv().await {
            let name = request.command.name();
            if let Some(delay) = request.command.delay() {
                tokio::select! {
                    () = sleep(delay) => {}
                    () = request.abandoned() => {}
                }
            }
            if request.is_abandoned() {
                debug!(command = name, "Caller gave up; command skipped");
                continue;
            }
            let result = self.handle(request.command.clone()).await;
            if let Err(e) = &result {
                debug!(command = request.command.name(), "Agent command failed: {}", e);
            }
            request.respond(result);
        }
        debug!("Page agent stopped");
    }

    /// Execute one command. [`AgentCommand::delay`] is served by [`Self::run`].
    pub async fn handle(&mut self, command: AgentCommand) -> Result<AgentReply> {
        match command {
            AgentCommand::Poll => self.poll().await.map(AgentReply::Action),
            AgentCommand::Housekeeping => {
                housekeeping::run_housekeeping(self.driver.as_ref(), &mut self.dialog, &self.timing)
                    .await?;
                Ok(AgentReply::HousekeepingDone)
            }
            AgentCommand::InspectPage { claim_active } => {
                self.inspect(claim_active).await.map(AgentReply::Page)
            }
            AgentCommand::BeginClaim { slot_link } => self
                .workflow
                .plan(self.driver.as_ref(), &slot_link)
                .await
                .map(AgentReply::ClaimPlanned),
            AgentCommand::Navigate { url, .. } => {
                debug!(%url, "Navigating");
                self.driver.navigate(&url).await?;
                Ok(AgentReply::Navigated)
            }
            AgentCommand::ReturnToResults { .. } => {
                info!("Returning to search results");
                self.driver.trigger(Control::ReturnToResults).await?;
                Ok(AgentReply::Returned)
            }
            AgentCommand::CheckDialog => self
                .check_dialog()
                .await
                .map(|dismissed| AgentReply::DialogChecked { dismissed }),
        }
    }

    /// Make the next navigation click.
    pub async fn poll(&mut self) -> Result<ActionOutcome> {
        self.poll_on(Local::now().date_naive()).await
    }

    async fn poll_on(&mut self, today: NaiveDate) -> Result<ActionOutcome> {
        self.check_dialog().await?;

        let text = self.driver.read_region(PageRegion::DateRange).await?;
        let Some(current) = text.as_deref().and_then(parse_period) else {
            debug!(?text, "Displayed period unknown");
            return Ok(ActionOutcome::PeriodUnknown);
        };

        if self.housekeeping.record() {
            debug!("Housekeeping threshold reached");
            return Ok(ActionOutcome::HousekeepingDue);
        }

        let config = self.config.snapshot();
        let target = target_period(&config, today);
        let (control, kind) = choose_control(&current, &target);

        match self.driver.trigger(control).await {
            Ok(()) => {
                debug!(%control, start = %current.start, "Clicked");
                Ok(ActionOutcome::Clicked(kind))
            }
            Err(SlotwatchError::ControlNotFound { .. }) => {
                warn!("Control {} not found on page", control);
                Ok(ActionOutcome::ControlMissing(control))
            }
            Err(e) => Err(e),
        }
    }

    /// Look at the page after a load.
    pub async fn inspect(&mut self, claim_active: bool) -> Result<PageCheck> {
        let url = self.driver.current_url().await?;

        let heading = if recovery::needs_heading(&url) {
            self.driver.read_region(PageRegion::PageHeading).await?
        } else {
            None
        };
        match recovery::sign_in_step(&url, heading.as_deref()) {
            Some(SignInStep::Restart) => {
                let landing = self.site.landing_url();
                warn!("Login expired, returning to {}", landing);
                self.driver.navigate(&landing).await?;
                return Ok(PageCheck::Recovering {
                    reason: RecoveryReason::LoginExpired,
                });
            }
            Some(SignInStep::Complete(page)) => return self.sign_in(page).await,
            None => {}
        }

        let banner = self.driver.read_region(PageRegion::ErrorBanner).await?;
        let lead = self.driver.read_region(PageRegion::LeadParagraph).await?;

        if let Some(reason) = recovery::detect(&url, banner.as_deref(), lead.as_deref()) {
            let landing = self.site.landing_url();
            warn!(%reason, "Dead-end page, returning to {}", landing);
            self.driver.navigate(&landing).await?;
            return Ok(PageCheck::Recovering { reason });
        }

        if self.driver.count(PageRegion::ChallengeWidget).await? > 0 {
            let sitekey = self.driver.read_region(PageRegion::ChallengeSitekey).await?;
            let repeated = !self
                .challenges
                .should_report(sitekey.as_deref(), &url, Instant::now());
            return Ok(PageCheck::Challenge {
                sitekey,
                url,
                during_claim: claim_active,
                repeated,
            });
        }

        self.check_dialog().await?;

        if claim_active {
            let snapshot = PanelSnapshot::read(self.driver.as_ref()).await?;
            return Ok(PageCheck::Panel(evaluate(&snapshot, self.reserved_cap)));
        }

        Ok(PageCheck::Ready)
    }

    async fn sign_in(&mut self, page: SignInPage) -> Result<PageCheck> {
        match page {
            SignInPage::Credentials => {
                let Some(credentials) = &self.credentials else {
                    warn!("Credentials form showing but no account configured");
                    return Ok(PageCheck::CredentialsMissing);
                };
                info!("Signing in again");
                self.driver
                    .fill(FormField::UserId, &credentials.username)
                    .await?;
                self.driver
                    .fill(FormField::Password, &credentials.password)
                    .await?;
            }
            SignInPage::AlreadySignedIn => {
                info!("Staying signed in on this page");
                self.driver.trigger(Control::StaySignedIn).await?;
            }
        }
        self.driver.trigger(Control::SignIn).await?;
        Ok(PageCheck::SignedIn { page })
    }

    /// Dismiss the back-button warning. Returns true when it was clicked.
    pub async fn check_dialog(&mut self) -> Result<bool> {
        if !self.dialog.should_check(Instant::now()) {
            return Ok(false);
        }
        let present = self.driver.count(PageRegion::WarningDialog).await? > 0;
        let visible = present && self.driver.is_visible(PageRegion::WarningDialog).await?;

        match self.dialog.observe(present, visible) {
            DialogAction::Dismiss => {
                info!("Dismissing back-button warning");
                match self.driver.trigger(Control::DismissWarning).await {
                    Ok(()) => Ok(true),
                    Err(SlotwatchError::ControlNotFound { .. }) => {
                        warn!("Warning dialog has no dismiss button");
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            }
            DialogAction::Ignore => Ok(false),
        }
    }
}
