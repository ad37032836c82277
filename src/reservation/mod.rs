//! Claim workflow.
//!
//! When a weekly search turns up a day with free slots, the day page is
//! fetched with the page's cookies and every claim link on it is collected.
//! The links are visited one per page load, last link first, until the queue
//! is empty; the panel shown after the final load decides the outcome.
//!
//! ```text
//! SlotFound ─► plan() ─► navigate(first) ─► load ─► queue? ─yes─► navigate(next)
//!                  │                                  │
//!                  └─ no links ─► ClaimLinkMissing    no
//!                                                     ▼
//!                                              panel::evaluate()
//! ```

pub mod panel;

pub use panel::{evaluate, PanelOutcome, PanelSnapshot, ReservationSummary};

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::classifier::extract::CLAIM_MARKER;
use crate::classifier::{MarkerExtractor, PatternExtractor};
use crate::config::SiteConfig;
use crate::error::{Result, SlotwatchError};
use crate::page::PageDriver;
use crate::state::ClaimLinkQueue;

/// Links to visit for one slot, in visiting order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPlan {
    pub slot_link: String,
    /// Visited right away.
    pub first: String,
    /// Queued, one per page load.
    pub rest: Vec<String>,
}

impl ClaimPlan {
    /// Number of claim links found.
    #[must_use]
    pub fn count(&self) -> usize {
        1 + self.rest.len()
    }
}

/// What to do on a page load while a claim is active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStep {
    Visit(String),
    Inspect,
}

/// Next step: drain the queue first, then look at the panel.
pub fn next_step(queue: &mut ClaimLinkQueue) -> ClaimStep {
    match queue.dequeue() {
        Some(link) => ClaimStep::Visit(link),
        None => ClaimStep::Inspect,
    }
}

/// Builds claim plans from day pages.
#[derive(Clone)]
pub struct ReservationWorkflow {
    site: SiteConfig,
    extractor: Arc<dyn PatternExtractor>,
}

impl std::fmt::Debug for ReservationWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationWorkflow")
            .field("site", &self.site)
            .finish_non_exhaustive()
    }
}

impl ReservationWorkflow {
    #[must_use]
    pub fn new(site: SiteConfig) -> Self {
        Self::with_extractor(site, Arc::new(MarkerExtractor))
    }

    #[must_use]
    pub fn with_extractor(site: SiteConfig, extractor: Arc<dyn PatternExtractor>) -> Self {
        Self { site, extractor }
    }

    /// Fetch the day page behind `slot_link` and plan the claim.
    ///
    /// A failed fetch and a page without claim links both come back as
    /// [`SlotwatchError::ClaimLinkMissing`]; the slot is usually gone.
    pub async fn plan(&self, driver: &dyn PageDriver, slot_link: &str) -> Result<ClaimPlan> {
        let url = self.site.absolutize(slot_link);
        debug!(%url, "Fetching day page");

        let body = match driver.fetch(&url).await {
            Ok(body) => body,
            Err(e) => {
                warn!("Day page fetch failed: {}", e);
                return Err(SlotwatchError::ClaimLinkMissing {
                    slot_link: slot_link.to_string(),
                    reason: format!("Fetch error: {e}"),
                });
            }
        };

        self.plan_from_body(slot_link, &body)
    }

    /// Plan from an already fetched day page.
    pub fn plan_from_body(&self, slot_link: &str, body: &str) -> Result<ClaimPlan> {
        let mut links: Vec<String> = self
            .extractor
            .claim_links(body)
            .iter()
            .map(|link| self.site.absolutize(link))
            .collect();
        links.reverse();

        let mut links = links.into_iter();
        let Some(first) = links.next() else {
            return Err(SlotwatchError::ClaimLinkMissing {
                slot_link: slot_link.to_string(),
                reason: format!("Reserve button ({CLAIM_MARKER}) not found in HTML"),
            });
        };

        let plan = ClaimPlan {
            slot_link: slot_link.to_string(),
            first,
            rest: links.collect(),
        };
        info!("Found {} claim link(s)", plan.count());
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockPageDriver;

    const DAY_PAGE: &str = concat!(
        r#"<a id="reserve_1" href="/obs?_eventId=reserveSlot&amp;slot=1">R</a>"#,
        r#"<a id="reserve_2" href="/obs?_eventId=reserveSlot&amp;slot=2">R</a>"#,
        r#"<a id="reserve_3" href="/obs?_eventId=reserveSlot&amp;slot=3">R</a>"#,
    );

    fn workflow() -> ReservationWorkflow {
        ReservationWorkflow::new(SiteConfig::default())
    }

    fn abs(path: &str) -> String {
        SiteConfig::default().absolutize(path)
    }

    #[test]
    fn test_plan_visits_last_link_first() {
        let plan = workflow().plan_from_body("/day", DAY_PAGE).unwrap();
        assert_eq!(plan.first, abs("/obs?_eventId=reserveSlot&slot=3"));
        assert_eq!(
            plan.rest,
            vec![
                abs("/obs?_eventId=reserveSlot&slot=2"),
                abs("/obs?_eventId=reserveSlot&slot=1"),
            ]
        );
        assert_eq!(plan.count(), 3);
    }

    #[test]
    fn test_queue_order_after_plan() {
        let plan = workflow().plan_from_body("/day", DAY_PAGE).unwrap();
        let mut queue = ClaimLinkQueue::default();
        queue.replace(plan.rest.clone());

        let mut visited = vec![plan.first.clone()];
        while let ClaimStep::Visit(link) = next_step(&mut queue) {
            visited.push(link);
        }
        assert_eq!(
            visited,
            vec![
                abs("/obs?_eventId=reserveSlot&slot=3"),
                abs("/obs?_eventId=reserveSlot&slot=2"),
                abs("/obs?_eventId=reserveSlot&slot=1"),
            ]
        );
        assert_eq!(next_step(&mut queue), ClaimStep::Inspect);
    }

    #[test]
    fn test_no_links_is_claim_link_missing() {
        let err = workflow().plan_from_body("/day", "<p>gone</p>").unwrap_err();
        match err {
            SlotwatchError::ClaimLinkMissing { slot_link, reason } => {
                assert_eq!(slot_link, "/day");
                assert!(reason.contains("_eventId=reserveSlot"));
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[tokio::test]
    async fn test_plan_fetches_absolute_url() {
        let url = abs("/obs?_eventId=searchForDaySlots&d=1");
        let driver = MockPageDriver::new().with_fetch(&url, DAY_PAGE);

        let plan = workflow()
            .plan(&driver, "/obs?_eventId=searchForDaySlots&d=1")
            .await
            .unwrap();
        assert_eq!(plan.count(), 3);
        assert_eq!(driver.fetches(), vec![url]);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_claim_link_missing() {
        let driver = MockPageDriver::new();
        let err = workflow().plan(&driver, "/missing").await.unwrap_err();
        assert!(matches!(
            err,
            SlotwatchError::ClaimLinkMissing { ref reason, .. } if reason.starts_with("Fetch error")
        ));
    }
}
