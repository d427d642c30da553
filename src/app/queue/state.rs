//! Internal state management for the task queue
//!
//! Tasks are kept in id order, which is also enqueue order, so claiming
//! the first due task gives FIFO dispatch among tasks that are ready.

use std::collections::BTreeMap;

use chrono::Utc;
use tokio::time::Instant;
use tracing::debug;

use super::types::{QueueStats, Task, TaskStatus};
use crate::app::models::DownloadUnit;

/// Internal state of the task queue
#[derive(Debug, Default)]
pub struct QueueState {
    tasks: BTreeMap<u64, Task>,
    next_task_id: u64,
    total_enqueued: u64,
    total_attempts: u64,
}

impl QueueState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new scheduled task and return its id
    pub fn push(&mut self, unit: DownloadUnit, ready_at: Instant, deadline: Option<Instant>) -> u64 {
        self.next_task_id += 1;
        let id = self.next_task_id;
        self.tasks.insert(id, Task::new(id, unit, ready_at, deadline));
        self.total_enqueued += 1;
        id
    }

    /// Mark every undispatched task past its deadline as expired
    pub fn expire_overdue(&mut self, now: Instant) -> Vec<Task> {
        let mut expired = Vec::new();
        for task in self.tasks.values_mut() {
            if task.is_past_deadline(now) {
                task.status = TaskStatus::Expired {
                    expired_at: Utc::now(),
                };
                expired.push(task.clone());
            }
        }
        expired
    }

    /// Claim the first due task, marking it in progress
    pub fn claim_due(&mut self, now: Instant) -> Option<Task> {
        let task = self.tasks.values_mut().find(|task| task.is_due(now))?;
        task.attempts += 1;
        task.status = TaskStatus::InProgress {
            started_at: Utc::now(),
            attempt: task.attempts,
        };
        self.total_attempts += 1;
        debug!("Claimed task {} ({}), attempt {}", task.id, task.unit, task.attempts);
        Some(task.clone())
    }

    /// Return a claimed task to the schedule without counting the attempt
    pub fn release(&mut self, task_id: u64) -> Option<&Task> {
        let task = self.tasks.get_mut(&task_id)?;
        if task.status.is_in_progress() {
            task.attempts = task.attempts.saturating_sub(1);
            self.total_attempts = self.total_attempts.saturating_sub(1);
            task.status = TaskStatus::Scheduled;
        }
        Some(task)
    }

    /// Earliest `ready_at` among claimable tasks
    pub fn next_ready_at(&self) -> Option<Instant> {
        self.tasks
            .values()
            .filter(|task| task.status.is_claimable())
            .map(|task| task.ready_at)
            .min()
    }

    pub fn get(&self, task_id: u64) -> Option<&Task> {
        self.tasks.get(&task_id)
    }

    pub fn get_mut(&mut self, task_id: u64) -> Option<&mut Task> {
        self.tasks.get_mut(&task_id)
    }

    pub fn all(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    /// Drop tasks in a terminal state
    pub fn cleanup(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|_, task| task.status.is_active());
        before - self.tasks.len()
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = QueueStats {
            total_enqueued: self.total_enqueued,
            total_attempts: self.total_attempts,
            ..QueueStats::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Scheduled => stats.scheduled_count += 1,
                TaskStatus::InProgress { .. } => stats.in_progress_count += 1,
                TaskStatus::Failed { .. } => stats.retrying_count += 1,
                TaskStatus::Completed { .. } => stats.completed_count += 1,
                TaskStatus::Abandoned { .. } => stats.abandoned_count += 1,
                TaskStatus::Expired { .. } => stats.expired_count += 1,
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_claim_in_enqueue_order() {
        let mut state = QueueState::new();
        let now = Instant::now();
        let first = state.push(DownloadUnit::paged(42, 0, "2024-05-01"), now, None);
        let second = state.push(DownloadUnit::paged(42, 1, "2024-05-01"), now, None);

        assert_eq!(state.claim_due(now).map(|t| t.id), Some(first));
        assert_eq!(state.claim_due(now).map(|t| t.id), Some(second));
        assert!(state.claim_due(now).is_none());
        assert_eq!(state.stats().in_progress_count, 2);
    }

    #[tokio::test]
    async fn test_future_tasks_are_not_due() {
        let mut state = QueueState::new();
        let now = Instant::now();
        let later = now + Duration::from_secs(5);
        state.push(DownloadUnit::single(7, "2024-05-01"), later, None);

        assert!(state.claim_due(now).is_none());
        assert_eq!(state.next_ready_at(), Some(later));
        assert!(state.claim_due(later).is_some());
    }

    #[tokio::test]
    async fn test_release_restores_attempt_budget() {
        let mut state = QueueState::new();
        let now = Instant::now();
        let id = state.push(DownloadUnit::single(7, "2024-05-01"), now, Some(now));

        state.claim_due(now).unwrap();
        let task = state.release(id).unwrap();
        assert_eq!(task.attempts, 0);
        assert_eq!(task.status, TaskStatus::Scheduled);

        // Released tasks are undispatched again, so the deadline applies.
        let expired = state.expire_overdue(now);
        assert_eq!(expired.len(), 1);
        assert_eq!(state.stats().expired_count, 1);
        assert_eq!(state.cleanup(), 1);
    }
}
