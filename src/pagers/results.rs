//! Producer/consumer bridge between an enumeration task and its reader
//!
//! The enumerator runs as a spawned task and pushes pages through a
//! [`PageWriter`]; the caller pulls them from [`NextPageResults`]. Reset
//! notifications travel in-band with the pages, and the terminal
//! [`DeltaUpdate`] (or error) is the task's return value.

use crate::error::{PagerError, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of a delta enumeration: the next resumable token and whether the
/// previous one was discarded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaUpdate {
    /// The delta link itself; empty when no resumable token was produced
    pub url: String,
    /// True if the old delta token was invalid, unsupported, or absent
    pub reset: bool,
}

/// How a producer finished, as seen by the consumer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Token produced by the run
    pub delta_update: DeltaUpdate,
    /// True if pages were left unread: the producer quit on a consumer stop,
    /// or pages it sent were drained without being read
    pub stopped_early: bool,
}

/// Unit carried over the bridge
#[derive(Debug)]
struct NextPage<T> {
    items: Vec<T>,
    reset: bool,
}

/// Whether a page reached the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The consumer received the page
    Sent,
    /// The consumer stopped reading; the producer should wind down quietly
    Stopped,
}

impl Delivery {
    /// True when the consumer no longer wants pages
    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

/// Producer half of the bridge, owned by the enumeration task.
///
/// Dropping the writer closes the channel, so returning from the producer
/// on any path is enough to release the consumer.
pub struct PageWriter<T> {
    pages: mpsc::Sender<NextPage<T>>,
    ctx: CancellationToken,
    stop: CancellationToken,
    stopped_early: Arc<AtomicBool>,
}

impl<T> PageWriter<T> {
    /// Send the next page, waiting until the consumer takes it.
    ///
    /// Fails with [`PagerError::Cancelled`] if the caller's context is
    /// cancelled first; reports [`Delivery::Stopped`] if the consumer
    /// cancelled or went away.
    pub async fn write_next_page(&self, items: Vec<T>, reset: bool) -> Result<Delivery> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(PagerError::cancelled("writing next page")),
            _ = self.stop.cancelled() => Ok(self.halt()),
            sent = self.pages.send(NextPage { items, reset }) => match sent {
                Ok(()) => Ok(Delivery::Sent),
                Err(_) => Ok(self.halt()),
            },
        }
    }

    fn halt(&self) -> Delivery {
        self.stopped_early.store(true, Ordering::Release);
        Delivery::Stopped
    }

    /// Context handed to fetches and the request limiter. It is cancelled
    /// by either the caller or the consumer.
    pub fn fetch_ctx(&self) -> &CancellationToken {
        &self.stop
    }

    /// True if the consumer asked the producer to stop while the caller's
    /// context is still live. A producer that sees this and quits is
    /// recorded as having stopped early.
    pub fn stopped_by_consumer(&self) -> bool {
        let stopped = self.stop.is_cancelled() && !self.ctx.is_cancelled();
        if stopped {
            self.halt();
        }
        stopped
    }
}

/// Consumer half of the bridge.
///
/// Only one task may read pages. Dropping it before [`results`] was awaited
/// cancels and aborts the producer task.
///
/// [`results`]: NextPageResults::results
pub struct NextPageResults<T> {
    pages: mpsc::Receiver<NextPage<T>>,
    stop: CancellationToken,
    stopped_early: Arc<AtomicBool>,
    task: Option<JoinHandle<Result<DeltaUpdate>>>,
}

impl<T: Send + 'static> NextPageResults<T> {
    /// Spawn `producer` as a background task feeding a new bridge
    pub fn spawn<F, Fut>(ctx: &CancellationToken, producer: F) -> Self
    where
        F: FnOnce(PageWriter<T>) -> Fut,
        Fut: Future<Output = Result<DeltaUpdate>> + Send + 'static,
    {
        // Capacity 1 is as close to a rendezvous as tokio's mpsc gets.
        let (tx, rx) = mpsc::channel(1);
        let stop = ctx.child_token();
        let stopped_early = Arc::new(AtomicBool::new(false));

        let writer = PageWriter {
            pages: tx,
            ctx: ctx.clone(),
            stop: stop.clone(),
            stopped_early: Arc::clone(&stopped_early),
        };

        Self {
            pages: rx,
            stop,
            stopped_early,
            task: Some(tokio::spawn(producer(writer))),
        }
    }
}

impl<T> NextPageResults<T> {
    /// Receive the next page as `(items, reset, done)`.
    ///
    /// `reset` is true on the page that immediately follows a pager reset;
    /// callers must discard what they accumulated before using `items`.
    /// `done` becomes true once the producer has finished.
    pub async fn next_page(&mut self) -> (Vec<T>, bool, bool) {
        match self.pages.recv().await {
            Some(page) => (page.items, page.reset, false),
            None => (Vec::new(), false, true),
        }
    }

    /// Ask the producer to stop fetching further pages
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Drain unread pages, wait for the producer and return its outcome
    pub async fn results(self) -> Result<DeltaUpdate> {
        self.outcome().await.map(|outcome| outcome.delta_update)
    }

    /// Like [`results`](Self::results), also reporting whether any page
    /// went unread
    pub async fn outcome(mut self) -> Result<Outcome> {
        let mut drained = 0usize;
        while self.pages.recv().await.is_some() {
            drained += 1;
        }

        let Some(task) = self.task.take() else {
            return Err(PagerError::TaskFailed("results already collected".into()));
        };

        let delta_update = match task.await {
            Ok(outcome) => outcome?,
            Err(e) => return Err(PagerError::TaskFailed(e.to_string())),
        };

        Ok(Outcome {
            delta_update,
            stopped_early: drained > 0 || self.stopped_early.load(Ordering::Acquire),
        })
    }
}

impl<T> Drop for NextPageResults<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.stop.cancel();
            task.abort();
        }
    }
}
