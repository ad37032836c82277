//! Test doubles for the page, the alert backend and the settings backend.
//!
//! Doubles share their state behind an `Arc`, so a test can hand one clone
//! to the code under test and keep another to script and inspect the page.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::alerts::{AlertEvent, AlertSink};
use crate::config::{SessionConfig, SettingsSource};
use crate::error::{Result, SlotwatchError};
use crate::page::{Control, FormField, PageDriver, PageEvent, PageRegion};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Page
// ============================================================================

#[derive(Debug, Default)]
struct MockPage {
    regions: HashMap<PageRegion, Vec<String>>,
    counts: HashMap<PageRegion, usize>,
    visible: HashMap<PageRegion, bool>,
    controls: HashSet<Control>,
    fields: HashSet<FormField>,
    hides: HashMap<Control, Vec<PageRegion>>,
    fetch_bodies: HashMap<String, String>,
    url: String,
    load_on_navigate: bool,
    unavailable: bool,
    triggers: Vec<Control>,
    fills: Vec<(FormField, String)>,
    navigations: Vec<String>,
    fetches: Vec<String>,
    subscribers: Vec<mpsc::Sender<PageEvent>>,
}

/// Scripted [`PageDriver`].
///
/// # Example
///
/// ```
/// use slotwatch::page::{Control, PageDriver, PageRegion};
/// use slotwatch::testing::MockPageDriver;
///
/// # tokio_test_block(async {
/// let page = MockPageDriver::new()
///     .with_region(PageRegion::DateRange, "23rd March 2026 – 29th March 2026")
///     .with_control(Control::NextAvailable);
///
/// page.trigger(Control::NextAvailable).await.unwrap();
/// assert_eq!(page.triggers(), vec![Control::NextAvailable]);
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) {
/// #     tokio::runtime::Runtime::new().unwrap().block_on(f);
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockPageDriver {
    inner: Arc<Mutex<MockPage>>,
}

impl MockPageDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Text of a single-element region.
    #[must_use]
    pub fn with_region(self, region: PageRegion, text: &str) -> Self {
        self.set_region(region, Some(text));
        self
    }

    /// Texts of a multi-element region.
    #[must_use]
    pub fn with_regions(self, region: PageRegion, texts: &[&str]) -> Self {
        lock(&self.inner)
            .regions
            .insert(region, texts.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Element count, overriding the number of scripted texts.
    #[must_use]
    pub fn with_count(self, region: PageRegion, count: usize) -> Self {
        self.set_count(region, count);
        self
    }

    #[must_use]
    pub fn with_visible(self, region: PageRegion, visible: bool) -> Self {
        self.set_visible(region, visible);
        self
    }

    /// Make a control clickable.
    #[must_use]
    pub fn with_control(self, control: Control) -> Self {
        lock(&self.inner).controls.insert(control);
        self
    }

    /// Put a form field on the page.
    #[must_use]
    pub fn with_field(self, field: FormField) -> Self {
        lock(&self.inner).fields.insert(field);
        self
    }

    /// Clicking `control` removes `region` from the page.
    #[must_use]
    pub fn hides_on_trigger(self, control: Control, region: PageRegion) -> Self {
        lock(&self.inner)
            .hides
            .entry(control)
            .or_default()
            .push(region);
        self
    }

    /// Body returned when `url` is fetched.
    #[must_use]
    pub fn with_fetch(self, url: &str, body: &str) -> Self {
        lock(&self.inner)
            .fetch_bodies
            .insert(url.to_string(), body.to_string());
        self
    }

    #[must_use]
    pub fn with_url(self, url: &str) -> Self {
        self.set_url(url);
        self
    }

    /// Emit `Loaded` to subscribers after every navigation.
    #[must_use]
    pub fn loading_on_navigate(self) -> Self {
        lock(&self.inner).load_on_navigate = true;
        self
    }

    pub fn set_region(&self, region: PageRegion, text: Option<&str>) {
        let mut page = lock(&self.inner);
        match text {
            Some(text) => {
                page.regions.insert(region, vec![text.to_string()]);
            }
            None => {
                page.regions.remove(&region);
            }
        }
    }

    pub fn set_count(&self, region: PageRegion, count: usize) {
        lock(&self.inner).counts.insert(region, count);
    }

    pub fn set_visible(&self, region: PageRegion, visible: bool) {
        lock(&self.inner).visible.insert(region, visible);
    }

    pub fn set_url(&self, url: &str) {
        lock(&self.inner).url = url.to_string();
    }

    pub fn remove_control(&self, control: Control) {
        lock(&self.inner).controls.remove(&control);
    }

    /// Make every call fail with `PageNotReady`, as during a reload.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.inner).unavailable = unavailable;
    }

    /// Controls clicked so far, in order.
    #[must_use]
    pub fn triggers(&self) -> Vec<Control> {
        lock(&self.inner).triggers.clone()
    }

    /// Values typed into form fields so far, in order.
    #[must_use]
    pub fn fills(&self) -> Vec<(FormField, String)> {
        lock(&self.inner).fills.clone()
    }

    /// URLs navigated to so far, in order.
    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        lock(&self.inner).navigations.clone()
    }

    /// URLs fetched so far, in order.
    #[must_use]
    pub fn fetches(&self) -> Vec<String> {
        lock(&self.inner).fetches.clone()
    }

    /// Send an event to every live subscriber.
    pub async fn emit(&self, event: PageEvent) {
        let subscribers = lock(&self.inner).subscribers.clone();
        for tx in subscribers {
            let _ = tx.send(event.clone()).await;
        }
    }

    fn check_available(&self) -> Result<()> {
        if lock(&self.inner).unavailable {
            return Err(SlotwatchError::not_ready("page is reloading"));
        }
        Ok(())
    }
}

#[async_trait]
impl PageDriver for MockPageDriver {
    async fn read_region(&self, region: PageRegion) -> Result<Option<String>> {
        self.check_available()?;
        Ok(lock(&self.inner)
            .regions
            .get(&region)
            .and_then(|texts| texts.first().cloned()))
    }

    async fn read_all(&self, region: PageRegion) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(lock(&self.inner)
            .regions
            .get(&region)
            .cloned()
            .unwrap_or_default())
    }

    async fn count(&self, region: PageRegion) -> Result<usize> {
        self.check_available()?;
        let page = lock(&self.inner);
        Ok(page
            .counts
            .get(&region)
            .copied()
            .unwrap_or_else(|| page.regions.get(&region).map_or(0, Vec::len)))
    }

    async fn is_visible(&self, region: PageRegion) -> Result<bool> {
        self.check_available()?;
        Ok(lock(&self.inner)
            .visible
            .get(&region)
            .copied()
            .unwrap_or(false))
    }

    async fn trigger(&self, control: Control) -> Result<()> {
        self.check_available()?;
        let mut page = lock(&self.inner);
        if !page.controls.contains(&control) {
            return Err(SlotwatchError::ControlNotFound {
                control: control.to_string(),
            });
        }
        page.triggers.push(control);
        let hidden = page.hides.get(&control).cloned().unwrap_or_default();
        for region in hidden {
            page.regions.remove(&region);
            page.counts.insert(region, 0);
            page.visible.insert(region, false);
        }
        Ok(())
    }

    async fn fill(&self, field: FormField, value: &str) -> Result<()> {
        self.check_available()?;
        let mut page = lock(&self.inner);
        if !page.fields.contains(&field) {
            return Err(SlotwatchError::ControlNotFound {
                control: field.name().to_string(),
            });
        }
        page.fills.push((field, value.to_string()));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        self.check_available()?;
        let emit = {
            let mut page = lock(&self.inner);
            page.navigations.push(url.to_string());
            page.url = url.to_string();
            page.load_on_navigate
        };
        if emit {
            self.emit(PageEvent::Loaded {
                url: url.to_string(),
            })
            .await;
        }
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        self.check_available()?;
        let mut page = lock(&self.inner);
        page.fetches.push(url.to_string());
        page.fetch_bodies
            .get(url)
            .cloned()
            .ok_or_else(|| SlotwatchError::not_ready(format!("no response scripted for {url}")))
    }

    async fn current_url(&self) -> Result<String> {
        self.check_available()?;
        Ok(lock(&self.inner).url.clone())
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<PageEvent>> {
        let (tx, rx) = mpsc::channel(64);
        lock(&self.inner).subscribers.push(tx);
        Ok(rx)
    }
}

// ============================================================================
// Alerts
// ============================================================================

/// [`AlertSink`] that keeps every event.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    events: Mutex<Vec<AlertEvent>>,
}

impl RecordingAlertSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<AlertEvent> {
        lock(&self.events).clone()
    }

    /// Event names in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        lock(&self.events).iter().map(AlertEvent::name).collect()
    }

    pub fn clear(&self) {
        lock(&self.events).clear();
    }
}

impl AlertSink for RecordingAlertSink {
    fn emit(&self, event: AlertEvent) {
        lock(&self.events).push(event);
    }
}

// ============================================================================
// Settings
// ============================================================================

/// [`SettingsSource`] returning a fixed config, or failing.
#[derive(Debug, Default)]
pub struct StaticSettings {
    config: Mutex<Option<SessionConfig>>,
}

impl StaticSettings {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
        }
    }

    /// A source whose backend is unreachable.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Change what the next fetch returns.
    pub fn set(&self, config: SessionConfig) {
        *lock(&self.config) = Some(config);
    }
}

#[async_trait]
impl SettingsSource for StaticSettings {
    async fn fetch(&self) -> Result<SessionConfig> {
        lock(&self.config)
            .clone()
            .ok_or_else(|| SlotwatchError::config("settings backend unavailable"))
    }
}
