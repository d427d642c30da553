//! Core task queue implementation
//!
//! The queue only tracks task state; the [`Dispatcher`](super::Dispatcher)
//! decides when to claim. Retry delays grow exponentially from
//! `min_backoff` to `max_backoff` without jitter.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::state::QueueState;
use super::types::{QueueStats, Task, TaskQueueConfig, TaskStatus};
use crate::app::models::{AssetType, DownloadUnit};
use crate::errors::{QueueError, QueueResult};

/// What happened to a task after a failed delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Scheduled again after the given backoff
    Retrying { retry_in: Duration },
    /// Out of attempts
    Abandoned,
}

/// Per-source task queue with at-least-once delivery
#[derive(Debug)]
pub struct TaskQueue {
    asset_type: AssetType,
    config: TaskQueueConfig,
    state: Arc<Mutex<QueueState>>,
    wakeup: Notify,
}

impl TaskQueue {
    /// Create a queue; rejects invalid configuration
    pub fn new(asset_type: AssetType, config: TaskQueueConfig) -> QueueResult<Self> {
        config.validate()?;
        Ok(Self {
            asset_type,
            config,
            state: Arc::new(Mutex::new(QueueState::new())),
            wakeup: Notify::new(),
        })
    }

    pub fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    /// Enqueue with the configured schedule delay and dispatch deadline
    pub async fn enqueue(&self, unit: DownloadUnit) -> u64 {
        self.enqueue_with(unit, self.config.schedule_delay, self.config.dispatch_deadline)
            .await
    }

    /// Enqueue with explicit timing
    ///
    /// The deadline is measured from now, not from the schedule time.
    pub async fn enqueue_with(
        &self,
        unit: DownloadUnit,
        schedule_delay: Duration,
        dispatch_deadline: Option<Duration>,
    ) -> u64 {
        let now = Instant::now();
        let label = unit.to_string();
        let task_id = {
            let mut state = self.state.lock().await;
            state.push(
                unit,
                now + schedule_delay,
                dispatch_deadline.map(|deadline| now + deadline),
            )
        };
        self.wakeup.notify_one();
        debug!("Enqueued {} task {} for {}", self.asset_type, task_id, label);
        task_id
    }

    /// Expire overdue tasks, then claim the first due task
    pub async fn claim_next(&self) -> Option<Task> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        for task in state.expire_overdue(now) {
            warn!(
                "Dropping {} task {} ({}): dispatch deadline passed",
                self.asset_type, task.id, task.unit
            );
        }
        state.claim_due(now)
    }

    /// Return a claimed task unattempted, e.g. on shutdown
    pub async fn release(&self, task_id: u64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        state
            .release(task_id)
            .map(|_| ())
            .ok_or(QueueError::UnknownTask { task_id })?;
        drop(state);
        self.wakeup.notify_one();
        Ok(())
    }

    /// Record a successful delivery
    pub async fn mark_completed(&self, task_id: u64) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let task = state
            .get_mut(task_id)
            .ok_or(QueueError::UnknownTask { task_id })?;
        task.status = TaskStatus::Completed {
            completed_at: Utc::now(),
        };
        debug!("Completed {} task {} ({})", self.asset_type, task_id, task.unit);
        Ok(())
    }

    /// Record a failed delivery and schedule a retry or abandon the task
    pub async fn mark_failed(&self, task_id: u64, error: &str) -> QueueResult<FailureDisposition> {
        let disposition = {
            let mut state = self.state.lock().await;
            let task = state
                .get_mut(task_id)
                .ok_or(QueueError::UnknownTask { task_id })?;

            if task.attempts >= self.config.max_attempts {
                task.status = TaskStatus::Abandoned {
                    failure_count: task.attempts,
                    abandoned_at: Utc::now(),
                    final_error: error.to_string(),
                };
                error!(
                    "Abandoning {} task {} ({}) after {} attempts: {}",
                    self.asset_type, task_id, task.unit, task.attempts, error
                );
                FailureDisposition::Abandoned
            } else {
                let retry_in = self.retry_delay(task.attempts);
                task.ready_at = Instant::now() + retry_in;
                task.status = TaskStatus::Failed {
                    failure_count: task.attempts,
                    last_failure: Utc::now(),
                    error: error.to_string(),
                };
                warn!(
                    "{} task {} ({}) failed (attempt {}/{}), retrying in {:?}: {}",
                    self.asset_type,
                    task_id,
                    task.unit,
                    task.attempts,
                    self.config.max_attempts,
                    retry_in,
                    error
                );
                FailureDisposition::Retrying { retry_in }
            }
        };
        self.wakeup.notify_one();
        Ok(disposition)
    }

    /// Backoff before the retry that follows `failure_count` failures
    pub fn retry_delay(&self, failure_count: u32) -> Duration {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.min_backoff)
            .with_max_interval(self.config.max_backoff)
            .with_multiplier(2.0)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build();

        let mut delay = self.config.min_backoff;
        for _ in 0..failure_count.max(1) {
            delay = backoff.next_backoff().unwrap_or(self.config.max_backoff);
        }
        delay.min(self.config.max_backoff)
    }

    /// Time until the next claimable task is due, zero if one is due now
    pub async fn time_until_ready(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        state
            .next_ready_at()
            .map(|ready_at| ready_at.saturating_duration_since(Instant::now()))
    }

    /// Wait until something is enqueued or released
    pub async fn notified(&self) {
        self.wakeup.notified().await;
    }

    /// Counters for every task the queue still remembers
    pub async fn stats(&self) -> QueueStats {
        self.state.lock().await.stats()
    }

    /// No task is scheduled, running or waiting for a retry
    pub async fn is_idle(&self) -> bool {
        self.stats().await.is_idle()
    }

    pub async fn get_task(&self, task_id: u64) -> Option<Task> {
        self.state.lock().await.get(task_id).cloned()
    }

    pub async fn all_tasks(&self) -> Vec<Task> {
        self.state.lock().await.all()
    }

    /// Forget tasks in a terminal state
    pub async fn cleanup(&self) -> usize {
        let removed = self.state.lock().await.cleanup();
        if removed > 0 {
            info!("Cleaned up {} finished {} tasks", removed, self.asset_type);
        }
        removed
    }
}
