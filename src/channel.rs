//! Request/response channel between the session controller and the page
//! agent.
//!
//! Each request carries its own `oneshot` reply slot. A request is delivered
//! at most once: when the agent is gone, the reply slot is dropped, or no
//! answer arrives within the timeout, the caller gets
//! [`SlotwatchError::PageNotReady`] and decides itself whether to retry.
//! A timed-out request stays queued, so the receiving side checks
//! [`PageRequest::is_abandoned`] before acting on it.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use crate::error::{Result, SlotwatchError};

/// One command and the slot its answer goes to.
#[derive(Debug)]
pub struct PageRequest<C, R> {
    pub command: C,
    pub reply: oneshot::Sender<Result<R>>,
}

impl<C, R> PageRequest<C, R> {
    /// Answer the request. A caller that gave up is not an error.
    pub fn respond(self, result: Result<R>) {
        let _ = self.reply.send(result);
    }

    /// The caller stopped waiting, so the command must not run.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.reply.is_closed()
    }

    /// Resolves once the caller stops waiting.
    pub async fn abandoned(&mut self) {
        self.reply.closed().await;
    }
}

/// Sending half held by the controller.
#[derive(Debug)]
pub struct PageChannel<C, R> {
    tx: mpsc::Sender<PageRequest<C, R>>,
    timeout: Duration,
}

impl<C, R> Clone for PageChannel<C, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C, R> PageChannel<C, R>
where
    C: std::fmt::Debug,
{
    /// Create a channel and the receiving half for the agent.
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> (Self, mpsc::Receiver<PageRequest<C, R>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, timeout }, rx)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `command` and wait for the answer.
    pub async fn request(&self, command: C) -> Result<R> {
        trace!(?command, "page request");
        let (reply, answer) = oneshot::channel();
        self.tx
            .send(PageRequest { command, reply })
            .await
            .map_err(|_| SlotwatchError::not_ready("page agent is not running"))?;

        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SlotwatchError::not_ready("page agent dropped the request")),
            Err(_) => Err(SlotwatchError::not_ready(format!(
                "no answer from page within {:?}",
                self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(4, Duration::from_secs(1));
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                let doubled = request.command * 2;
                request.respond(Ok(doubled));
            }
        });

        assert_eq!(channel.request(21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_closed_channel_is_not_ready() {
        let (channel, rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(1));
        drop(rx);
        assert!(channel.request(1).await.unwrap_err().is_soft_failure());
    }

    #[tokio::test]
    async fn test_dropped_reply_is_not_ready() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(1));
        tokio::spawn(async move {
            if let Some(request) = rx.recv().await {
                drop(request);
            }
        });
        assert!(channel.request(1).await.unwrap_err().is_soft_failure());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_not_ready() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(5));
        let _agent = tokio::spawn(async move {
            let _held = rx.recv().await;
            std::future::pending::<()>().await;
        });

        let err = channel.request(1).await.unwrap_err();
        assert!(err.to_string().contains("no answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_request_is_abandoned() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(1));

        let err = channel.request(7).await.unwrap_err();
        assert!(err.is_soft_failure());

        let request = rx.recv().await.unwrap();
        assert_eq!(request.command, 7);
        assert!(request.is_abandoned());
    }

    #[tokio::test]
    async fn test_waiting_request_is_not_abandoned() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(5));
        let caller = tokio::spawn(async move { channel.request(3).await });

        let request = rx.recv().await.unwrap();
        assert!(!request.is_abandoned());
        request.respond(Ok(6));
        assert_eq!(caller.await.unwrap().unwrap(), 6);
    }

    #[tokio::test]
    async fn test_agent_errors_pass_through() {
        let (channel, mut rx) = PageChannel::<u32, u32>::new(1, Duration::from_secs(1));
        tokio::spawn(async move {
            if let Some(request) = rx.recv().await {
                request.respond(Err(SlotwatchError::RateLimited));
            }
        });
        assert!(matches!(
            channel.request(1).await,
            Err(SlotwatchError::RateLimited)
        ));
    }
}
