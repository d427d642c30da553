//! Task dispatch loop
//!
//! One dispatcher drives one queue. Each iteration takes a concurrency
//! permit, claims the next due task, waits for the rate limiter and hands
//! the task to the handler on its own tokio task. The handler's result
//! decides between completion and a backoff retry.

use std::num::NonZeroU32;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::core::TaskQueue;
use super::types::Task;
use crate::app::models::DownloadUnit;
use crate::app::worker::WorkOutcome;
use crate::constants::{pipeline, queue as queue_defaults};
use crate::errors::DownloadResult;

/// Handler invoked for every delivery of a task
///
/// `Ok` completes the task, including permanent skips; `Err` schedules a
/// retry with backoff.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, unit: &DownloadUnit) -> DownloadResult<WorkOutcome>;
}

/// Rate-limited, concurrency-bounded dispatcher for one queue
pub struct Dispatcher {
    queue: Arc<TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    limiter: DefaultDirectRateLimiter,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(queue: Arc<TaskQueue>, handler: Arc<dyn TaskHandler>) -> Self {
        let config = queue.config();
        let quota = Quota::with_period(config.dispatch_period())
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MAX));
        let permits = Arc::new(Semaphore::new(config.max_concurrent_dispatches));

        Self {
            queue,
            handler,
            limiter: RateLimiter::direct(quota),
            permits,
        }
    }

    /// Run the dispatch loop on a background task
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Dispatch until shutdown, then wait briefly for in-flight handlers
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let asset_type = self.queue.asset_type();
        let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
        let mut idle_wait = queue_defaults::IDLE_POLL_INTERVAL;
        debug!("Dispatcher for {} started", asset_type);

        loop {
            in_flight.retain(|handle| !handle.is_finished());

            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let Some(task) = self.queue.claim_next().await else {
                drop(permit);
                let wait = self
                    .queue
                    .time_until_ready()
                    .await
                    .map_or(idle_wait, |until_ready| until_ready.min(idle_wait));
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = self.queue.notified() => {}
                    _ = tokio::time::sleep(wait) => {}
                }
                idle_wait = (idle_wait * 2).min(queue_defaults::MAX_IDLE_POLL_INTERVAL);
                continue;
            };
            idle_wait = queue_defaults::IDLE_POLL_INTERVAL;

            tokio::select! {
                _ = shutdown.recv() => {
                    if let Err(e) = self.queue.release(task.id).await {
                        warn!("Could not release task {}: {}", task.id, e);
                    }
                    break;
                }
                _ = self.limiter.until_ready() => {}
            }

            in_flight.push(tokio::spawn(deliver(
                self.queue.clone(),
                self.handler.clone(),
                task,
                permit,
            )));
        }

        in_flight.retain(|handle| !handle.is_finished());
        if !in_flight.is_empty() {
            info!(
                "Waiting for {} in-flight {} tasks",
                in_flight.len(),
                asset_type
            );
            let drain = futures::future::join_all(in_flight);
            if tokio::time::timeout(pipeline::TASK_SHUTDOWN_TIMEOUT, drain)
                .await
                .is_err()
            {
                warn!("In-flight {} tasks did not finish before shutdown", asset_type);
            }
        }
        debug!("Dispatcher for {} stopped", asset_type);
    }
}

/// Run the handler for one task and report the result to the queue
async fn deliver(
    queue: Arc<TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    task: Task,
    _permit: OwnedSemaphorePermit,
) {
    let result = AssertUnwindSafe(handler.handle(&task.unit))
        .catch_unwind()
        .await;

    let report = match result {
        Ok(Ok(outcome)) => {
            debug!("Task {} ({}): {}", task.id, task.unit, outcome);
            queue.mark_completed(task.id).await
        }
        Ok(Err(e)) => queue.mark_failed(task.id, &e.to_string()).await.map(|_| ()),
        Err(_) => queue
            .mark_failed(task.id, "handler panicked")
            .await
            .map(|_| ()),
    };

    if let Err(e) = report {
        warn!("Could not record result of task {}: {}", task.id, e);
    }
}
