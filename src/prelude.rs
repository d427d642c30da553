//! Prelude module for ranking-ingest
//!
//! Re-exports the items most integrations need, so a single
//! `use ranking_ingest::prelude::*;` is enough to assemble a pipeline.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ranking_ingest::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = AppConfig::load(None).await?;
//!     let store = Arc::new(MemoryDocumentStore::open(config.storage.snapshot_path()).await?);
//!     let blobs = Arc::new(FsBlobStore::new(config.storage.blobs_dir(), None).await?);
//!
//!     let mut pipeline = Pipeline::new(store.clone(), blobs, config.queue.clone());
//!     let settings = config.sources.get(AssetType::Danbooru);
//!     pipeline.add_source(build_source(AssetType::Danbooru, settings, &config.client)?, settings)?;
//!
//!     let summary = pipeline.run(chrono::Utc::now().date_naive(), None).await?;
//!     println!("{} downloaded", summary.workers.downloaded);
//!     store.save().await?;
//!     Ok(())
//! }
//! ```

// Core result types
pub use crate::errors::{AppError, Result};

// Configuration
pub use crate::config::AppConfig;

// Pipeline components
pub use crate::app::aggregate::AggregateMaintainer;
pub use crate::app::discovery::DiscoveryTrigger;
pub use crate::app::models::{AssetType, CanonicalAssetRecord, DownloadUnit, RankingRecord};
pub use crate::app::pipeline::{Pipeline, Quiescence, RunSummary};
pub use crate::app::queue::{ConfigPresets, TaskQueue, TaskQueueConfig};
pub use crate::app::sources::{build_source, SourceAdapter, SourceApi};
pub use crate::app::store::{BlobStore, DocumentStore, FsBlobStore, MemoryDocumentStore};
pub use crate::app::worker::DownloadWorker;

// Standard library re-exports that are commonly needed
pub use std::path::{Path, PathBuf};
pub use std::sync::Arc;

pub use tokio;
