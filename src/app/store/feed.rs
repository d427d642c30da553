//! Per-collection change notifications
//!
//! Every committed write produces a [`ChangeEvent`] carrying the document
//! before and after the write. Subscribers receive events over an
//! unbounded channel; a shared backlog counter tracks events that have
//! been emitted but not yet acknowledged, which lets the pipeline detect
//! quiescence without peeking into listener internals.
//!
//! Handlers that fail are retried in place with [`DeliveryRetry`]; the
//! event stays unacknowledged until it succeeds or the attempts run out.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tokio::sync::mpsc;
use tracing::warn;

use crate::app::models::Fields;
use crate::constants::pipeline;
use crate::errors::StoreResult;

/// Kind of change a notification describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

/// One document change
///
/// `event_id` identifies the write, not the delivery: a redelivered
/// notification carries the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub event_id: String,
    pub collection: String,
    pub id: String,
    pub before: Option<Fields>,
    pub after: Option<Fields>,
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match (&self.before, &self.after) {
            (None, Some(_)) => ChangeKind::Created,
            (Some(_), None) => ChangeKind::Deleted,
            _ => ChangeKind::Updated,
        }
    }
}

/// Shared count of emitted-but-unacknowledged events
#[derive(Debug, Clone, Default)]
pub struct BacklogGauge(Arc<AtomicUsize>);

impl BacklogGauge {
    pub fn pending(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn increment(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement(&self) {
        // Saturating: a stray ack must never wrap the counter.
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Store-side half of a subscription
#[derive(Debug, Clone)]
pub struct ChangeSender {
    sender: mpsc::UnboundedSender<ChangeEvent>,
    backlog: BacklogGauge,
}

impl ChangeSender {
    /// Deliver an event; returns `false` once the subscriber is gone
    pub fn send(&self, event: ChangeEvent) -> bool {
        self.backlog.increment();
        if self.sender.send(event).is_err() {
            self.backlog.decrement();
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Subscriber half of a subscription
#[derive(Debug)]
pub struct ChangeFeed {
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
    backlog: BacklogGauge,
}

impl ChangeFeed {
    /// Create a connected sender/feed pair
    pub fn channel() -> (ChangeSender, ChangeFeed) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let backlog = BacklogGauge::default();
        (
            ChangeSender {
                sender,
                backlog: backlog.clone(),
            },
            ChangeFeed { receiver, backlog },
        )
    }

    /// Wait for the next event; `None` once the store is dropped
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.recv().await
    }

    /// Take an already-delivered event without waiting
    pub fn try_recv(&mut self) -> Option<ChangeEvent> {
        self.receiver.try_recv().ok()
    }

    /// Mark one received event as fully handled
    pub fn ack(&self) {
        self.backlog.decrement();
    }

    /// Handle for observing this feed's backlog from elsewhere
    pub fn backlog(&self) -> BacklogGauge {
        self.backlog.clone()
    }
}

/// Bounded retry with exponential backoff for change handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRetry {
    pub max_attempts: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DeliveryRetry {
    fn default() -> Self {
        Self {
            max_attempts: pipeline::LISTENER_MAX_ATTEMPTS,
            min_backoff: pipeline::LISTENER_MIN_BACKOFF,
            max_backoff: pipeline::LISTENER_MAX_BACKOFF,
        }
    }
}

impl DeliveryRetry {
    /// Retry without pausing between attempts
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            min_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Run `handler` until it succeeds or `max_attempts` calls have failed;
    /// the last error is returned
    pub async fn run<T, F, Fut>(&self, mut handler: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.min_backoff)
            .with_max_interval(self.max_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match handler().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or(self.max_backoff)
                        .min(self.max_backoff);
                    warn!(
                        "Change handler failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt, max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
