//! Persistent FIFO of claim links still to visit.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Claim links waiting to be followed, one per page load.
///
/// The queue is filled in one step from a single classified response and
/// drained by the reservation workflow; an empty queue is the steady state.
///
/// # Example
///
/// ```
/// use slotwatch::state::ClaimLinkQueue;
///
/// let mut queue = ClaimLinkQueue::default();
/// queue.replace(vec!["/b".to_string(), "/c".to_string()]);
/// assert_eq!(queue.dequeue().as_deref(), Some("/b"));
/// assert_eq!(queue.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimLinkQueue {
    links: VecDeque<String>,
}

impl ClaimLinkQueue {
    /// Replace the queue contents with `links`, in order.
    pub fn replace(&mut self, links: impl IntoIterator<Item = String>) {
        self.links = links.into_iter().collect();
    }

    /// Take the next link.
    pub fn dequeue(&mut self) -> Option<String> {
        self.links.pop_front()
    }

    /// Next link without consuming it.
    #[must_use]
    pub fn peek(&self) -> Option<&str> {
        self.links.front().map(String::as_str)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn clear(&mut self) {
        self.links.clear();
    }

    /// Iterate without consuming.
    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.links.iter()
    }
}
