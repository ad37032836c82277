//! Cancel-and-replace timer slots.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

/// Holds at most one live background task.
///
/// Arming a slot always aborts whatever was there before, so two code paths
/// racing to schedule the same timer can never leave two copies running.
/// Dropping the slot aborts the task.
#[derive(Debug)]
pub struct TimerSlot {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self { name, handle: None }
    }

    /// A task is held and has not finished.
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Replace the held task with `task`.
    pub fn arm<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        trace!(timer = self.name, "armed");
        self.handle = Some(tokio::spawn(task));
    }

    /// Replace the held task with one that runs `task` after `delay`.
    pub fn arm_after<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.arm(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Abort the held task, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            trace!(timer = self.name, "cancelled");
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}
