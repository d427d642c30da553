//! Ingestion pipeline orchestration
//!
//! The [`Pipeline`] is the composition root. For every source it wires
//!
//! - a [`SourceAdapter`] writing ranking records,
//! - a [`DiscoveryTrigger`] listening to that source's rankings collection,
//! - a [`TaskQueue`] with its [`Dispatcher`] and [`DownloadWorker`],
//!
//! plus one [`AggregateMaintainer`] listening to the canonical records.
//! Components only talk to each other through the document store's change
//! feeds and the queues.
//!
//! # Architecture
//!
//! - [`signals`] - Ctrl+C / SIGTERM handling
//! - [`background_tasks`] - listener, dispatcher and progress tasks
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chrono::NaiveDate;
//! use ranking_ingest::app::models::AssetType;
//! use ranking_ingest::app::pipeline::Pipeline;
//! use ranking_ingest::app::queue::ConfigPresets;
//! use ranking_ingest::app::sources::{FixtureSource, SourceSettings};
//! use ranking_ingest::app::store::{FsBlobStore, MemoryDocumentStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryDocumentStore::new());
//! let blobs = Arc::new(FsBlobStore::new("/tmp/blobs", None).await?);
//!
//! let mut pipeline = Pipeline::new(store, blobs, ConfigPresets::production());
//! let source = Arc::new(FixtureSource::new(AssetType::Danbooru, "day"));
//! pipeline.add_source(source, &SourceSettings::default())?;
//!
//! let summary = pipeline
//!     .run(NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(), None)
//!     .await?;
//! println!("Downloaded {} assets", summary.workers.downloaded);
//! # Ok(())
//! # }
//! ```

pub mod background_tasks;
pub mod signals;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use futures::future::join_all;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::app::aggregate::{prune_applied_events, AggregateMaintainer};
use crate::app::discovery::DiscoveryTrigger;
use crate::app::models::AssetType;
use crate::app::queue::{Dispatcher, QueueStats, TaskQueue, TaskQueueConfig};
use crate::app::sources::{FetchReport, SourceAdapter, SourceApi, SourceSettings};
use crate::app::store::{BacklogGauge, BlobStore, DeliveryRetry, DocumentStore};
use crate::app::worker::{DownloadWorker, WorkerStatsSnapshot};
use crate::constants::{pipeline, storage};
use crate::errors::{AppError, QueueResult, Result};

pub use background_tasks::{BackgroundTaskManager, ChangeListener};
pub use signals::{create_shutdown_channel, SignalHandler};

/// How waiting for quiescence ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quiescence {
    /// No queued work and no unhandled notifications
    Idle,
    /// The wait timed out with work still outstanding
    TimedOut,
    /// A shutdown was requested
    Interrupted,
}

/// Per-source result of one run
#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub asset_type: AssetType,
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub records_written: usize,
    pub queue: QueueStats,
    pub workers: WorkerStatsSnapshot,
}

/// Result of a full pipeline run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub sources: Vec<SourceSummary>,
    /// Worker counters summed over every source
    pub workers: WorkerStatsSnapshot,
    pub quiescence: Quiescence,
    /// Change events a listener gave up on; aggregates may have drifted
    pub abandoned_events: u64,
    pub duration: Duration,
}

impl RunSummary {
    pub fn is_complete(&self) -> bool {
        self.quiescence == Quiescence::Idle && self.abandoned_events == 0
    }
}

/// Live counters for progress display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineProgress {
    pub enqueued: u64,
    pub active: u64,
    pub finished: u64,
    pub pending_events: usize,
}

struct SourceLane {
    adapter: SourceAdapter,
    queue: Arc<TaskQueue>,
    worker: Arc<DownloadWorker>,
}

/// Wires adapters, triggers, queues and workers together
pub struct Pipeline {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    queue_config: TaskQueueConfig,
    lanes: Vec<SourceLane>,
    shutdown_tx: broadcast::Sender<()>,
    background: Option<BackgroundTaskManager>,
    listener_retry: DeliveryRetry,
    backlogs: Vec<BacklogGauge>,
    reports: BTreeMap<AssetType, FetchReport>,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        queue_config: TaskQueueConfig,
    ) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();
        Self {
            store,
            blobs,
            queue_config,
            lanes: Vec::new(),
            shutdown_tx,
            background: None,
            listener_retry: DeliveryRetry::default(),
            backlogs: Vec::new(),
            reports: BTreeMap::new(),
        }
    }

    /// Retry policy for change listeners whose handler fails
    pub fn with_listener_retry(mut self, retry: DeliveryRetry) -> Self {
        self.listener_retry = retry;
        self
    }

    /// Register a source; must happen before [`Pipeline::start`]
    pub fn add_source(
        &mut self,
        api: Arc<dyn SourceApi>,
        settings: &SourceSettings,
    ) -> QueueResult<()> {
        let asset_type = api.asset_type();
        let queue = Arc::new(TaskQueue::new(asset_type, self.queue_config.clone())?);
        let worker = Arc::new(DownloadWorker::new(
            api.clone(),
            self.store.clone(),
            self.blobs.clone(),
            self.queue_config.download_timeout,
        ));
        let adapter = SourceAdapter::new(
            api,
            self.store.clone(),
            settings.max_pages,
            settings.inter_page_delay,
        );

        debug!("Registered source {}", asset_type);
        self.lanes.push(SourceLane {
            adapter,
            queue,
            worker,
        });
        Ok(())
    }

    pub fn sources(&self) -> Vec<AssetType> {
        self.lanes.iter().map(|lane| lane.adapter.asset_type()).collect()
    }

    /// Sender that stops the pipeline when broadcast on
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Subscribe listeners and spawn dispatchers
    ///
    /// Subscriptions are taken before any adapter writes, so no ranking or
    /// canonical record written afterwards is missed. Calling it twice is a
    /// no-op.
    pub fn start(&mut self) {
        if self.background.is_some() {
            return;
        }
        let mut background = BackgroundTaskManager::new();

        for lane in &self.lanes {
            let asset_type = lane.adapter.asset_type();
            let feed = self.store.subscribe(&asset_type.rankings_collection());
            self.backlogs.push(feed.backlog());
            let trigger = DiscoveryTrigger::new(self.store.clone(), lane.queue.clone());
            background.start_listener(
                Arc::new(trigger),
                feed,
                self.listener_retry,
                self.shutdown_tx.subscribe(),
            );

            let dispatcher = Dispatcher::new(lane.queue.clone(), lane.worker.clone());
            background.push(dispatcher.spawn(self.shutdown_tx.subscribe()));
        }

        let feed = self.store.subscribe(storage::ASSETS_COLLECTION);
        self.backlogs.push(feed.backlog());
        background.start_listener(
            Arc::new(AggregateMaintainer::new(self.store.clone())),
            feed,
            self.listener_retry,
            self.shutdown_tx.subscribe(),
        );

        background.start_progress_logger(
            self.lanes.iter().map(|lane| lane.queue.clone()).collect(),
            self.shutdown_tx.subscribe(),
        );

        info!("Pipeline started with {} sources", self.lanes.len());
        self.background = Some(background);
    }

    /// Run every adapter once for `date`, concurrently
    pub async fn run_cycle(&mut self, date: NaiveDate) -> BTreeMap<AssetType, FetchReport> {
        self.start();

        let runs = self
            .lanes
            .iter()
            .map(|lane| async move { (lane.adapter.asset_type(), lane.adapter.fetch_and_store(date).await) });
        let reports: BTreeMap<AssetType, FetchReport> = join_all(runs).await.into_iter().collect();

        for (asset_type, report) in &reports {
            let total = self.reports.entry(*asset_type).or_default();
            total.pages_ok += report.pages_ok;
            total.pages_failed += report.pages_failed;
            total.records_written += report.records_written;
        }
        reports
    }

    /// Current queue and notification counters
    pub async fn progress(&self) -> PipelineProgress {
        let mut progress = PipelineProgress {
            pending_events: self.backlogs.iter().map(BacklogGauge::pending).sum(),
            ..PipelineProgress::default()
        };
        for lane in &self.lanes {
            let stats = lane.queue.stats().await;
            progress.enqueued += stats.total_enqueued;
            progress.active += stats.active_count();
            progress.finished += stats.finished_count();
        }
        progress
    }

    /// Wait until no work is queued and every notification is handled
    ///
    /// Idleness must be observed several times in a row, since a handled
    /// notification may enqueue work between two checks.
    pub async fn wait_until_idle(&self, timeout: Option<Duration>) -> Quiescence {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let started = Instant::now();
        let mut confirmations = 0;

        loop {
            let progress = self.progress().await;
            if progress.active == 0 && progress.pending_events == 0 {
                confirmations += 1;
                if confirmations >= pipeline::IDLE_CONFIRMATIONS {
                    debug!("Pipeline idle after {:?}", started.elapsed());
                    return Quiescence::Idle;
                }
            } else {
                confirmations = 0;
            }

            if let Some(limit) = timeout {
                if started.elapsed() >= limit {
                    warn!(
                        "Pipeline still busy after {:?}: {} active tasks, {} pending events",
                        limit, progress.active, progress.pending_events
                    );
                    return Quiescence::TimedOut;
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => return Quiescence::Interrupted,
                _ = tokio::time::sleep(pipeline::IDLE_CHECK_INTERVAL) => {}
            }
        }
    }

    /// Stop every background task and collect the summary
    pub async fn shutdown(mut self, quiescence: Quiescence, duration: Duration) -> RunSummary {
        let _ = self.shutdown_tx.send(());
        let abandoned_events = match self.background.take() {
            Some(background) => background.shutdown_all().await,
            None => 0,
        };
        if abandoned_events > 0 {
            warn!(
                "{} change events were abandoned; run `stats --verify` to check aggregates",
                abandoned_events
            );
        }
        if let Err(e) =
            prune_applied_events(self.store.as_ref(), pipeline::APPLIED_EVENT_RETENTION).await
        {
            warn!("Failed to prune applied-event markers: {}", e);
        }

        let mut sources = Vec::with_capacity(self.lanes.len());
        let mut workers = WorkerStatsSnapshot::default();
        for lane in &self.lanes {
            let asset_type = lane.adapter.asset_type();
            let report = self.reports.get(&asset_type).cloned().unwrap_or_default();
            let worker_stats = lane.worker.stats();
            workers = workers.merge(&worker_stats);
            sources.push(SourceSummary {
                asset_type,
                pages_ok: report.pages_ok,
                pages_failed: report.pages_failed,
                records_written: report.records_written,
                queue: lane.queue.stats().await,
                workers: worker_stats,
            });
        }

        info!(
            "Run finished in {:?}: {} downloaded, {} already present, {} skipped, {} failed deliveries",
            duration, workers.downloaded, workers.already_present, workers.skipped, workers.failed
        );
        RunSummary {
            sources,
            workers,
            quiescence,
            abandoned_events,
            duration,
        }
    }

    /// One full run: start, fetch, wait for quiescence, shut down
    ///
    /// Ctrl+C or SIGTERM interrupts the wait and shuts down gracefully.
    pub async fn run(mut self, date: NaiveDate, timeout: Option<Duration>) -> Result<RunSummary> {
        if self.lanes.is_empty() {
            return Err(AppError::generic("no sources enabled"));
        }
        let started = Instant::now();
        let signals = SignalHandler::new(self.shutdown_tx.clone()).setup();

        self.run_cycle(date).await;
        let quiescence = self.wait_until_idle(timeout).await;
        if quiescence == Quiescence::Interrupted {
            info!("Shutdown requested before the pipeline went idle");
        }

        let summary = self.shutdown(quiescence, started.elapsed()).await;
        signals.abort();
        Ok(summary)
    }
}
