//! Startup helpers shared by the command handlers
//!
//! Resolves the effective configuration from the config file plus global
//! flags, and opens the persistent stores under the data directory.

use std::sync::Arc;

use tracing::{debug, info};

use crate::app::models::AssetType;
use crate::app::pipeline::Pipeline;
use crate::app::sources::build_source;
use crate::app::store::{FsBlobStore, MemoryDocumentStore};
use crate::cli::args::GlobalArgs;
use crate::config::AppConfig;
use crate::errors::{AppError, Result};

/// Persistent stores opened from the data directory
#[derive(Debug, Clone)]
pub struct Stores {
    pub documents: Arc<MemoryDocumentStore>,
    pub blobs: Arc<FsBlobStore>,
}

impl Stores {
    /// Write the document snapshot back to disk
    pub async fn save(&self) -> Result<()> {
        self.documents.save().await?;
        Ok(())
    }
}

/// Load the configuration and apply global flag overrides
pub async fn load_config(global: &GlobalArgs) -> Result<AppConfig> {
    let mut config = AppConfig::load(global.config.clone()).await?;
    if let Some(data_dir) = &global.data_dir {
        config.storage.data_dir = Some(data_dir.clone());
    }
    Ok(config)
}

/// Open the snapshot-backed document store and the blob store
pub async fn open_stores(config: &AppConfig) -> Result<Stores> {
    let data_dir = config.storage.resolved_data_dir();
    tokio::fs::create_dir_all(&data_dir).await?;
    debug!("Using data directory {}", data_dir.display());

    let documents = MemoryDocumentStore::open(config.storage.snapshot_path()).await?;
    let blobs = FsBlobStore::new(
        config.storage.blobs_dir(),
        config.storage.public_base_url()?,
    )
    .await?;

    Ok(Stores {
        documents: Arc::new(documents),
        blobs: Arc::new(blobs),
    })
}

/// Sources to poll: the requested ones, or every enabled one
pub fn select_sources(config: &AppConfig, requested: &[AssetType]) -> Result<Vec<AssetType>> {
    let mut selected: Vec<AssetType> = if requested.is_empty() {
        config.sources.enabled()
    } else {
        requested.to_vec()
    };
    selected.sort();
    selected.dedup();

    if selected.is_empty() {
        return Err(AppError::generic(
            "no sources selected; enable one in the config or pass --source",
        ));
    }
    Ok(selected)
}

/// Build a pipeline over `stores` with one lane per selected source
pub fn build_pipeline(
    config: &AppConfig,
    stores: &Stores,
    sources: &[AssetType],
) -> Result<Pipeline> {
    let mut pipeline = Pipeline::new(
        stores.documents.clone(),
        stores.blobs.clone(),
        config.queue.clone(),
    );
    for asset_type in sources {
        let settings = config.sources.get(*asset_type);
        let api = build_source(*asset_type, settings, &config.client)?;
        pipeline.add_source(api, settings)?;
        info!(
            "Source {} ready (mode {}, {} pages)",
            asset_type,
            settings.resolved_mode(*asset_type),
            settings.max_pages
        );
    }
    Ok(pipeline)
}
