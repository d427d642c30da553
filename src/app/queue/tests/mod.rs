//! Dispatcher tests with scripted handlers
//!
//! These exercise the queue and dispatcher together: retries with
//! backoff, abandonment, deadlines, pacing and concurrency bounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::*;
use crate::app::models::{AssetType, DownloadUnit};
use crate::app::worker::WorkOutcome;
use crate::errors::{DownloadError, DownloadResult};

/// Handler that fails each unit a scripted number of times
#[derive(Default)]
struct ScriptedHandler {
    failures: Mutex<HashMap<u64, u32>>,
    calls: Mutex<Vec<DownloadUnit>>,
    running: AtomicUsize,
    max_running: AtomicUsize,
    work_time: Duration,
}

impl ScriptedHandler {
    fn failing(source_id: u64, times: u32) -> Self {
        let handler = Self::default();
        handler.failures.lock().unwrap().insert(source_id, times);
        handler
    }

    fn slow(work_time: Duration) -> Self {
        Self {
            work_time,
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<DownloadUnit> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskHandler for ScriptedHandler {
    async fn handle(&self, unit: &DownloadUnit) -> DownloadResult<WorkOutcome> {
        self.calls.lock().unwrap().push(unit.clone());
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);
        if !self.work_time.is_zero() {
            tokio::time::sleep(self.work_time).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let mut failures = self.failures.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&unit.source_id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(DownloadError::Timeout { seconds: 1 });
            }
        }
        Ok(WorkOutcome::AlreadyPresent)
    }
}

async fn wait_idle(queue: &TaskQueue) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_idle().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("queue did not become idle");
}

fn start(
    config: TaskQueueConfig,
    handler: Arc<ScriptedHandler>,
) -> (
    Arc<TaskQueue>,
    broadcast::Sender<()>,
    tokio::task::JoinHandle<()>,
) {
    let queue = Arc::new(TaskQueue::new(AssetType::Danbooru, config).unwrap());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = Dispatcher::new(queue.clone(), handler).spawn(shutdown_rx);
    (queue, shutdown_tx, handle)
}

/// Test end-to-end dispatch
///
/// Verifies that every enqueued unit is handed to the handler once and
/// completed.
#[tokio::test]
async fn test_dispatches_every_task() {
    let handler = Arc::new(ScriptedHandler::default());
    let (queue, shutdown, handle) = start(ConfigPresets::testing(), handler.clone());

    for id in 1..=3 {
        queue.enqueue(DownloadUnit::single(id, "2024-05-01")).await;
    }
    wait_idle(&queue).await;

    let stats = queue.stats().await;
    assert_eq!(stats.completed_count, 3);
    assert_eq!(stats.total_attempts, 3);
    let ids: Vec<u64> = handler.calls().iter().map(|u| u.source_id).collect();
    assert_eq!(ids, vec![1, 2, 3]);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

/// Test retry with backoff
///
/// Verifies that a handler error schedules another delivery and that the
/// task completes once the handler succeeds.
#[tokio::test]
async fn test_failed_tasks_are_retried() {
    let handler = Arc::new(ScriptedHandler::failing(7, 2));
    let (queue, shutdown, handle) = start(ConfigPresets::testing(), handler.clone());

    let task_id = queue.enqueue(DownloadUnit::single(7, "2024-05-01")).await;
    wait_idle(&queue).await;

    let task = queue.get_task(task_id).await.unwrap();
    assert!(task.status.is_completed());
    assert_eq!(task.attempts, 3);
    assert_eq!(handler.calls().len(), 3);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

/// Test abandonment after the attempt budget
#[tokio::test]
async fn test_tasks_abandoned_after_max_attempts() {
    let handler = Arc::new(ScriptedHandler::failing(7, u32::MAX));
    let (queue, shutdown, handle) = start(ConfigPresets::testing(), handler.clone());

    let task_id = queue.enqueue(DownloadUnit::single(7, "2024-05-01")).await;
    wait_idle(&queue).await;

    let task = queue.get_task(task_id).await.unwrap();
    assert!(task.status.is_abandoned());
    assert_eq!(handler.calls().len(), 3);
    assert_eq!(queue.stats().await.abandoned_count, 1);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

/// Test dispatch deadline
///
/// Verifies that a task whose deadline passes before it becomes due is
/// dropped without reaching the handler.
#[tokio::test]
async fn test_expired_tasks_are_dropped() {
    let handler = Arc::new(ScriptedHandler::default());
    let (queue, shutdown, handle) = start(ConfigPresets::testing(), handler.clone());

    let task_id = queue
        .enqueue_with(
            DownloadUnit::single(7, "2024-05-01"),
            Duration::from_millis(30),
            Some(Duration::from_millis(10)),
        )
        .await;
    wait_idle(&queue).await;

    assert!(queue.get_task(task_id).await.unwrap().status.is_expired());
    assert!(handler.calls().is_empty());

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

/// Test serialized dispatch
///
/// With one dispatch slot, slow handlers never overlap.
#[tokio::test]
async fn test_concurrency_bound() {
    let handler = Arc::new(ScriptedHandler::slow(Duration::from_millis(20)));
    let (queue, shutdown, handle) = start(ConfigPresets::testing(), handler.clone());

    for id in 1..=4 {
        queue.enqueue(DownloadUnit::single(id, "2024-05-01")).await;
    }
    wait_idle(&queue).await;

    assert_eq!(handler.calls().len(), 4);
    assert_eq!(handler.max_running.load(Ordering::SeqCst), 1);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}

/// Test dispatch pacing
///
/// At 20 dispatches per second, three tasks need at least two periods.
#[tokio::test]
async fn test_dispatch_rate_limit() {
    let handler = Arc::new(ScriptedHandler::default());
    let config = TaskQueueConfigBuilder::new()
        .max_concurrent_dispatches(4)
        .max_dispatches_per_second(20.0)
        .schedule_delay(Duration::ZERO)
        .build();
    let (queue, shutdown, handle) = start(config, handler.clone());

    let started = Instant::now();
    for id in 1..=3 {
        queue.enqueue(DownloadUnit::single(id, "2024-05-01")).await;
    }
    wait_idle(&queue).await;

    assert!(started.elapsed() >= Duration::from_millis(90));
    assert_eq!(handler.calls().len(), 3);

    shutdown.send(()).unwrap();
    handle.await.unwrap();
}
