//! Rate-limited task queue with at-least-once delivery
//!
//! Each source gets its own [`TaskQueue`] and [`Dispatcher`]. The queue
//! provides:
//!
//! - **At-least-once delivery**: duplicate units are separate tasks, and a
//!   failed delivery is retried until `max_attempts` is reached
//! - **Exponential backoff**: retry delays double from `min_backoff` up to
//!   `max_backoff`
//! - **Dispatch deadline**: a task still undispatched when its deadline
//!   passes is dropped; a later discovery pass re-enqueues the gap
//! - **Pacing**: a `governor` limiter caps dispatches per second and a
//!   semaphore caps concurrent handlers
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use ranking_ingest::app::models::{AssetType, DownloadUnit};
//! use ranking_ingest::app::queue::{ConfigPresets, Dispatcher, TaskHandler, TaskQueue};
//! use ranking_ingest::app::worker::{SkipReason, WorkOutcome};
//! use ranking_ingest::errors::DownloadResult;
//!
//! struct Noop;
//!
//! #[async_trait]
//! impl TaskHandler for Noop {
//!     async fn handle(&self, _unit: &DownloadUnit) -> DownloadResult<WorkOutcome> {
//!         Ok(WorkOutcome::Skipped { reason: SkipReason::NoDownloadUrl })
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = Arc::new(TaskQueue::new(AssetType::Danbooru, ConfigPresets::production())?);
//! queue.enqueue(DownloadUnit::single(7, "2024-05-01")).await;
//!
//! let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
//! let handle = Dispatcher::new(queue.clone(), Arc::new(Noop)).spawn(shutdown_rx);
//! // ... later
//! let _ = shutdown_tx.send(());
//! handle.await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod dispatcher;
pub mod state;
pub mod types;

#[cfg(test)]
mod tests;

pub use config::{ConfigPresets, TaskQueueConfigBuilder};
pub use core::{FailureDisposition, TaskQueue};
pub use dispatcher::{Dispatcher, TaskHandler};
pub use types::{QueueStats, Task, TaskQueueConfig, TaskStatus};
