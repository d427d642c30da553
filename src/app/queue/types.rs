//! Core data structures for the task queue
//!
//! A [`Task`] wraps one [`DownloadUnit`] delivery. The queue never merges
//! duplicate units; deduplication belongs to the handler.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::app::models::DownloadUnit;
use crate::constants::queue;
use crate::errors::{QueueError, QueueResult};

/// Status of a task in the queue
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Waiting for its schedule time or for a dispatch slot
    Scheduled,
    /// Claimed by the dispatcher and handed to the handler
    InProgress {
        started_at: DateTime<Utc>,
        attempt: u32,
    },
    /// Handler returned success
    Completed { completed_at: DateTime<Utc> },
    /// Handler failed; eligible again once its backoff elapses
    Failed {
        failure_count: u32,
        last_failure: DateTime<Utc>,
        error: String,
    },
    /// Failed on every allowed attempt
    Abandoned {
        failure_count: u32,
        abandoned_at: DateTime<Utc>,
        final_error: String,
    },
    /// Dispatch deadline passed before the first dispatch
    Expired { expired_at: DateTime<Utc> },
}

impl TaskStatus {
    /// Whether the dispatcher may claim this task once it is due
    pub fn is_claimable(&self) -> bool {
        matches!(self, TaskStatus::Scheduled | TaskStatus::Failed { .. })
    }

    /// Whether the task still has work ahead of it
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Scheduled | TaskStatus::InProgress { .. } | TaskStatus::Failed { .. }
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, TaskStatus::InProgress { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskStatus::Completed { .. })
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, TaskStatus::Abandoned { .. })
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, TaskStatus::Expired { .. })
    }
}

/// One delivery of a download unit
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u64,
    pub unit: DownloadUnit,
    pub status: TaskStatus,
    /// Dispatch attempts so far
    pub attempts: u32,
    pub enqueued_at: Instant,
    /// Earliest time the task may be dispatched
    pub ready_at: Instant,
    /// Dropped if still undispatched at this time
    pub deadline: Option<Instant>,
}

impl Task {
    pub fn new(id: u64, unit: DownloadUnit, ready_at: Instant, deadline: Option<Instant>) -> Self {
        Self {
            id,
            unit,
            status: TaskStatus::Scheduled,
            attempts: 0,
            enqueued_at: Instant::now(),
            ready_at,
            deadline,
        }
    }

    /// Claimable and due at `now`
    pub fn is_due(&self, now: Instant) -> bool {
        self.status.is_claimable() && self.ready_at <= now
    }

    /// Never dispatched and past its deadline at `now`
    pub fn is_past_deadline(&self, now: Instant) -> bool {
        self.attempts == 0
            && matches!(self.status, TaskStatus::Scheduled)
            && self.deadline.is_some_and(|deadline| deadline <= now)
    }
}

/// Configuration for one source's task queue, the `[queue]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Handlers running at once
    pub max_concurrent_dispatches: usize,
    /// Dispatch rate ceiling
    pub max_dispatches_per_second: f64,
    /// Total deliveries before a task is abandoned
    pub max_attempts: u32,
    /// Backoff after the first failure
    #[serde(with = "humantime_serde")]
    pub min_backoff: Duration,
    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Delay between enqueue and first eligibility
    #[serde(with = "humantime_serde")]
    pub schedule_delay: Duration,
    /// Undispatched tasks are dropped after this long; unset keeps them
    #[serde(with = "humantime_serde")]
    pub dispatch_deadline: Option<Duration>,
    /// Upper bound on one asset fetch inside the handler
    #[serde(with = "humantime_serde")]
    pub download_timeout: Duration,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_dispatches: queue::MAX_CONCURRENT_DISPATCHES,
            max_dispatches_per_second: queue::MAX_DISPATCHES_PER_SECOND,
            max_attempts: queue::MAX_ATTEMPTS,
            min_backoff: queue::MIN_BACKOFF,
            max_backoff: queue::MAX_BACKOFF,
            schedule_delay: queue::SCHEDULE_DELAY,
            dispatch_deadline: Some(queue::DISPATCH_DEADLINE),
            download_timeout: queue::DOWNLOAD_TIMEOUT,
        }
    }
}

impl TaskQueueConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> QueueResult<()> {
        let invalid = |reason: &str| {
            Err(QueueError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if self.max_concurrent_dispatches == 0 {
            return invalid("max_concurrent_dispatches must be greater than 0");
        }
        if !(self.max_dispatches_per_second.is_finite() && self.max_dispatches_per_second > 0.0) {
            return invalid("max_dispatches_per_second must be a positive number");
        }
        if self.max_attempts == 0 {
            return invalid("max_attempts must be greater than 0");
        }
        if self.min_backoff > self.max_backoff {
            return invalid("min_backoff must not exceed max_backoff");
        }
        if self.download_timeout.is_zero() {
            return invalid("download_timeout must be greater than 0");
        }
        Ok(())
    }

    /// Minimum spacing between two dispatches
    pub fn dispatch_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.max_dispatches_per_second)
    }
}

/// Snapshot of queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub total_enqueued: u64,
    pub scheduled_count: u64,
    pub in_progress_count: u64,
    /// Failed and waiting for a retry
    pub retrying_count: u64,
    pub completed_count: u64,
    pub abandoned_count: u64,
    pub expired_count: u64,
    /// Handler invocations, including retries
    pub total_attempts: u64,
}

impl QueueStats {
    /// Tasks with work still ahead of them
    pub fn active_count(&self) -> u64 {
        self.scheduled_count + self.in_progress_count + self.retrying_count
    }

    /// Tasks that reached a terminal state
    pub fn finished_count(&self) -> u64 {
        self.completed_count + self.abandoned_count + self.expired_count
    }

    pub fn is_idle(&self) -> bool {
        self.active_count() == 0
    }

    /// Completed tasks as a percentage of finished tasks
    pub fn success_rate(&self) -> f64 {
        let finished = self.finished_count();
        if finished == 0 {
            0.0
        } else {
            (self.completed_count as f64 / finished as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(TaskStatus::Scheduled.is_claimable());
        assert!(TaskStatus::Scheduled.is_active());

        let failed = TaskStatus::Failed {
            failure_count: 1,
            last_failure: Utc::now(),
            error: "boom".to_string(),
        };
        assert!(failed.is_claimable());
        assert!(failed.is_active());

        let expired = TaskStatus::Expired {
            expired_at: Utc::now(),
        };
        assert!(!expired.is_claimable());
        assert!(!expired.is_active());
        assert!(expired.is_expired());
    }

    #[tokio::test]
    async fn test_deadline_applies_before_first_dispatch_only() {
        let now = Instant::now();
        let mut task = Task::new(
            1,
            DownloadUnit::single(7, "2024-05-01"),
            now,
            Some(now),
        );
        assert!(task.is_past_deadline(now));

        task.attempts = 1;
        task.status = TaskStatus::Failed {
            failure_count: 1,
            last_failure: Utc::now(),
            error: "boom".to_string(),
        };
        assert!(!task.is_past_deadline(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_config_validation() {
        assert!(TaskQueueConfig::default().validate().is_ok());

        let zero_rate = TaskQueueConfig {
            max_dispatches_per_second: 0.0,
            ..Default::default()
        };
        assert!(zero_rate.validate().is_err());

        let inverted = TaskQueueConfig {
            min_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());

        assert_eq!(
            TaskQueueConfig::default().dispatch_period(),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_queue_stats_calculations() {
        let stats = QueueStats {
            total_enqueued: 10,
            scheduled_count: 1,
            in_progress_count: 1,
            retrying_count: 1,
            completed_count: 6,
            abandoned_count: 1,
            expired_count: 0,
            total_attempts: 12,
        };
        assert_eq!(stats.active_count(), 3);
        assert!(!stats.is_idle());
        assert!((stats.success_rate() - 85.714).abs() < 0.01);
    }
}
