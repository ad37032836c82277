//! Periodic filter refresh.
//!
//! After a random number of navigation clicks the agent opens the search
//! filter dialog, lingers, and closes it again. Closing reloads the page,
//! so the agent then waits for the weekly view to come back before the
//! next click is allowed.

use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::agent::dialog::DialogWatch;
use crate::error::{Result, SlotwatchError};
use crate::page::{Control, PageDriver, PageRegion};

/// Random click count between two housekeeping passes.
#[derive(Debug, Clone)]
pub struct ReloadThreshold {
    min: u32,
    max: u32,
    value: u32,
}

impl ReloadThreshold {
    /// Draw a first value in `min..=max`. A reversed range is swapped.
    #[must_use]
    pub fn new(min: u32, max: u32) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        let mut threshold = Self { min, max, value: min };
        threshold.regenerate();
        threshold
    }

    #[must_use]
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn regenerate(&mut self) {
        self.value = rand::thread_rng().gen_range(self.min..=self.max);
    }
}

/// Counts clicks and says when housekeeping is due.
#[derive(Debug, Clone)]
pub struct HousekeepingCounter {
    clicks: u32,
    threshold: ReloadThreshold,
}

impl HousekeepingCounter {
    #[must_use]
    pub fn new(threshold: ReloadThreshold) -> Self {
        Self {
            clicks: 0,
            threshold,
        }
    }

    /// Count one click. Returns true, resets and draws a new threshold
    /// when the threshold is reached.
    pub fn record(&mut self) -> bool {
        self.clicks += 1;
        if self.clicks >= self.threshold.value() {
            self.clicks = 0;
            self.threshold.regenerate();
            return true;
        }
        false
    }

    #[must_use]
    pub fn clicks(&self) -> u32 {
        self.clicks
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold.value()
    }
}

/// Waits and polling intervals used by [`run_housekeeping`].
#[derive(Debug, Clone)]
pub struct HousekeepingTiming {
    pub poll: Duration,
    pub dialog_timeout: Duration,
    pub linger_min: Duration,
    pub linger_max: Duration,
    pub ready_timeout: Duration,
    pub settle: Duration,
}

impl Default for HousekeepingTiming {
    fn default() -> Self {
        Self {
            poll: Duration::from_millis(100),
            dialog_timeout: Duration::from_secs(5),
            linger_min: Duration::from_millis(3000),
            linger_max: Duration::from_millis(6000),
            ready_timeout: Duration::from_secs(15),
            settle: Duration::from_secs(1),
        }
    }
}

impl HousekeepingTiming {
    fn linger(&self) -> Duration {
        if self.linger_max <= self.linger_min {
            return self.linger_min;
        }
        rand::thread_rng().gen_range(self.linger_min..=self.linger_max)
    }
}

/// Open the filter dialog, wait, close it and wait for the reload.
pub async fn run_housekeeping(
    driver: &dyn PageDriver,
    watch: &mut DialogWatch,
    timing: &HousekeepingTiming,
) -> Result<()> {
    info!("Refreshing search filters");
    driver.trigger(Control::RefreshFilters).await?;

    let opened = wait_for_dialog(driver, timing).await;
    if !opened {
        warn!(
            "Filter dialog not visible after {:?}; trying to close it anyway",
            timing.dialog_timeout
        );
    }

    let linger = timing.linger();
    debug!(?linger, "Lingering in filter dialog");
    sleep(linger).await;

    watch.closing_started(Instant::now());
    match driver.trigger(Control::CloseDialog).await {
        Ok(()) => {}
        Err(SlotwatchError::ControlNotFound { .. }) if !opened => {
            warn!("No dialog to close; skipping reload wait");
            return Ok(());
        }
        Err(e) => return Err(e),
    }

    wait_for_page_ready(driver, timing).await
}

async fn wait_for_dialog(driver: &dyn PageDriver, timing: &HousekeepingTiming) -> bool {
    let deadline = Instant::now() + timing.dialog_timeout;
    loop {
        if driver
            .is_visible(PageRegion::OpenDialog)
            .await
            .unwrap_or(false)
        {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(timing.poll).await;
    }
}

/// Wait until the weekly view is back: navigation buttons present and a
/// non-empty date range shown.
///
/// Errors while polling are treated as "not yet", since the document is
/// being replaced underneath.
pub async fn wait_for_page_ready(driver: &dyn PageDriver, timing: &HousekeepingTiming) -> Result<()> {
    let deadline = Instant::now() + timing.ready_timeout;
    loop {
        if is_page_ready(driver).await {
            sleep(timing.settle).await;
            debug!("Page ready");
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(SlotwatchError::not_ready(format!(
                "weekly view did not return within {:?}",
                timing.ready_timeout
            )));
        }
        sleep(timing.poll).await;
    }
}

async fn is_page_ready(driver: &dyn PageDriver) -> bool {
    let buttons = driver
        .count(PageRegion::NavigationButtons)
        .await
        .unwrap_or(0);
    if buttons == 0 {
        return false;
    }
    driver
        .read_region(PageRegion::DateRange)
        .await
        .ok()
        .flatten()
        .is_some_and(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPageDriver;

    #[test]
    fn test_threshold_within_range() {
        for _ in 0..200 {
            let mut threshold = ReloadThreshold::new(30, 45);
            assert!((30..=45).contains(&threshold.value()));
            threshold.regenerate();
            assert!((30..=45).contains(&threshold.value()));
        }
    }

    #[test]
    fn test_threshold_reversed_range() {
        let threshold = ReloadThreshold::new(5, 3);
        assert!((3..=5).contains(&threshold.value()));
    }

    #[test]
    fn test_counter_fires_at_threshold() {
        let mut counter = HousekeepingCounter::new(ReloadThreshold::new(3, 3));
        assert!(!counter.record());
        assert!(!counter.record());
        assert!(counter.record());
        assert_eq!(counter.clicks(), 0);
        assert!(!counter.record());
        assert_eq!(counter.clicks(), 1);
    }

    fn ready_page() -> MockPageDriver {
        MockPageDriver::new()
            .with_control(Control::RefreshFilters)
            .with_control(Control::CloseDialog)
            .with_visible(PageRegion::OpenDialog, true)
            .with_count(PageRegion::NavigationButtons, 2)
            .with_region(PageRegion::DateRange, "23rd March 2026 – 29th March 2026")
    }

    #[tokio::test(start_paused = true)]
    async fn test_housekeeping_opens_and_closes() {
        let driver = ready_page();
        let mut watch = DialogWatch::default();

        run_housekeeping(&driver, &mut watch, &HousekeepingTiming::default())
            .await
            .unwrap();

        assert_eq!(
            driver.triggers(),
            vec![Control::RefreshFilters, Control::CloseDialog]
        );
        assert!(watch.is_quiet(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_housekeeping_without_dialog_is_tolerated() {
        let driver = MockPageDriver::new().with_control(Control::RefreshFilters);
        let mut watch = DialogWatch::default();

        run_housekeeping(&driver, &mut watch, &HousekeepingTiming::default())
            .await
            .unwrap();
        assert_eq!(driver.triggers(), vec![Control::RefreshFilters]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_ready_times_out() {
        let driver = MockPageDriver::new().with_count(PageRegion::NavigationButtons, 2);
        let err = wait_for_page_ready(&driver, &HousekeepingTiming::default())
            .await
            .unwrap_err();
        assert!(err.is_soft_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_ready_requires_date_text() {
        let driver = ready_page().with_region(PageRegion::DateRange, "   ");
        assert!(!is_page_ready(&driver).await);
        let driver = ready_page();
        assert!(is_page_ready(&driver).await);
    }
}
