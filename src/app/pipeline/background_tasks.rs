//! Background task management for the pipeline
//!
//! Change-feed listeners, dispatchers and the periodic progress logger all
//! run as tokio tasks that stop on the shared shutdown broadcast.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::app::aggregate::AggregateMaintainer;
use crate::app::discovery::DiscoveryTrigger;
use crate::app::queue::TaskQueue;
use crate::app::store::{ChangeEvent, ChangeFeed, DeliveryRetry};
use crate::constants::pipeline;
use crate::errors::StoreResult;

/// Reacts to document changes in one collection
#[async_trait]
pub trait ChangeListener: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> String;

    async fn on_change(&self, event: &ChangeEvent) -> StoreResult<usize>;
}

#[async_trait]
impl ChangeListener for DiscoveryTrigger {
    fn name(&self) -> String {
        format!("discovery:{}", self.asset_type())
    }

    async fn on_change(&self, event: &ChangeEvent) -> StoreResult<usize> {
        self.on_ranking_record_written(event).await
    }
}

#[async_trait]
impl ChangeListener for AggregateMaintainer {
    fn name(&self) -> String {
        "aggregates".to_string()
    }

    async fn on_change(&self, event: &ChangeEvent) -> StoreResult<usize> {
        self.on_canonical_record_written(event).await
    }
}

/// Owns every background task of a pipeline run
#[derive(Default)]
pub struct BackgroundTaskManager {
    tasks: Vec<JoinHandle<()>>,
    abandoned_events: Arc<AtomicU64>,
}

impl BackgroundTaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an already spawned task
    pub fn push(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Events a listener gave up on after exhausting its retries
    pub fn abandoned_events(&self) -> u64 {
        self.abandoned_events.load(Ordering::SeqCst)
    }

    /// Feed every change event to `listener` until shutdown
    ///
    /// A failing event is retried per `retry` before the next one is read.
    /// It is acknowledged only once the listener succeeds or gives up, so
    /// the backlog stays non-zero while work for it is outstanding.
    pub fn start_listener(
        &mut self,
        listener: Arc<dyn ChangeListener>,
        mut feed: ChangeFeed,
        retry: DeliveryRetry,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let abandoned = self.abandoned_events.clone();
        let task = tokio::spawn(async move {
            let name = listener.name();
            loop {
                let event = tokio::select! {
                    event = feed.recv() => event,
                    _ = shutdown_rx.recv() => break,
                };
                let Some(event) = event else {
                    debug!("{} feed closed", name);
                    break;
                };

                let handled = {
                    let (listener, event) = (&listener, &event);
                    retry.run(move || listener.on_change(event))
                };
                tokio::select! {
                    result = handled => {
                        if let Err(e) = result {
                            error!(
                                "{} abandoned event {} on {}/{} after {} attempts: {}",
                                name, event.event_id, event.collection, event.id, retry.max_attempts, e
                            );
                            abandoned.fetch_add(1, Ordering::SeqCst);
                        }
                        feed.ack();
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("{} stopping with {} unhandled events", name, feed.backlog().pending());
                        break;
                    }
                }
            }
        });

        self.tasks.push(task);
    }

    /// Log download progress across every source queue until shutdown
    pub fn start_progress_logger(
        &mut self,
        queues: Vec<Arc<TaskQueue>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(pipeline::PROGRESS_LOG_INTERVAL);
            interval.tick().await;
            let mut last_finished = 0u64;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut active = 0;
                        let mut finished = 0;
                        for queue in &queues {
                            let stats = queue.stats().await;
                            active += stats.active_count();
                            finished += stats.finished_count();
                        }
                        if active > 0 {
                            info!(
                                "Download progress: {} finished (+{}), {} active",
                                finished,
                                finished.saturating_sub(last_finished),
                                active
                            );
                        }
                        last_finished = finished;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        self.tasks.push(task);
    }

    /// Join every task and return the number of abandoned events; a task
    /// still running after the grace period is left to the runtime
    pub async fn shutdown_all(self) -> u64 {
        let total = self.tasks.len();
        let mut stuck = 0;
        for task in self.tasks {
            if tokio::time::timeout(pipeline::TASK_SHUTDOWN_TIMEOUT, task)
                .await
                .is_err()
            {
                stuck += 1;
            }
        }

        if stuck > 0 {
            warn!(
                "{} of {} pipeline tasks did not stop within {:?}",
                stuck,
                total,
                pipeline::TASK_SHUTDOWN_TIMEOUT
            );
        } else {
            debug!("Stopped {} pipeline tasks", total);
        }
        self.abandoned_events.load(Ordering::SeqCst)
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}
