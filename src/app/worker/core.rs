//! Download worker implementation
//!
//! Handles one [`DownloadUnit`] per delivery. Every step is safe to repeat:
//!
//! 1. Dedup fast path: return if a canonical record already exists
//! 2. Resolve page metadata, cached per artwork for paged sources
//! 3. Skip permanently when the URL or extension is unusable
//! 4. Fetch the bytes; failures go back to the queue for retry
//! 5. Store the blob, then create the canonical record if absent
//!
//! Two deliveries racing past step 1 both write the same blob key with the
//! same bytes, and only one of them creates the record.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::types::{SkipReason, WorkOutcome, WorkerStats, WorkerStatsSnapshot};
use crate::app::keys;
use crate::app::models::{
    AssetIdentity, AssetPage, AssetType, CanonicalAssetRecord, DownloadUnit, PageMetadataRecord,
};
use crate::app::queue::TaskHandler;
use crate::app::sources::SourceApi;
use crate::app::store::{to_fields, BlobStore, DocumentStore, Query};
use crate::constants::storage;
use crate::errors::{DownloadError, DownloadResult, StoreResult};

/// Whether a canonical record exists for this asset identity
pub async fn asset_exists(
    store: &dyn DocumentStore,
    identity: &AssetIdentity,
) -> StoreResult<bool> {
    let mut query = Query::new()
        .where_eq("type", identity.asset_type.as_str())
        .where_eq("sourceId", identity.source_id);
    if let Some(page) = identity.page {
        query = query.where_eq("page", page);
    }
    store.exists(storage::ASSETS_COLLECTION, query).await
}

/// Queue handler that downloads one asset per unit
#[derive(Debug)]
pub struct DownloadWorker {
    api: Arc<dyn SourceApi>,
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    download_timeout: Duration,
    stats: WorkerStats,
}

impl DownloadWorker {
    pub fn new(
        api: Arc<dyn SourceApi>,
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        download_timeout: Duration,
    ) -> Self {
        Self {
            api,
            store,
            blobs,
            download_timeout,
            stats: WorkerStats::new(),
        }
    }

    pub fn asset_type(&self) -> AssetType {
        self.api.asset_type()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Process one unit without touching the counters
    pub async fn process(&self, unit: &DownloadUnit) -> DownloadResult<WorkOutcome> {
        let asset_type = self.asset_type();
        let identity = AssetIdentity::from_unit(asset_type, unit);

        if asset_exists(self.store.as_ref(), &identity).await? {
            debug!("{} already has a canonical record", identity);
            return Ok(WorkOutcome::AlreadyPresent);
        }

        let pages = if asset_type.is_paged() {
            self.cached_pages(unit.source_id).await?
        } else {
            self.api.fetch_asset_pages(unit.source_id).await?
        };

        let index = identity.page.unwrap_or(0);
        let Some(page) = pages.get(index as usize) else {
            return Ok(self.skip(
                &identity,
                SkipReason::PageOutOfRange {
                    page: index,
                    available: pages.len(),
                },
            ));
        };
        let Some(url) = page.original_url.as_deref() else {
            return Ok(self.skip(&identity, SkipReason::NoDownloadUrl));
        };

        let extension = match keys::extension_of(url) {
            Some(ext) if keys::is_supported_extension(&ext) => ext,
            other => {
                return Ok(self.skip(
                    &identity,
                    SkipReason::UnsupportedExtension(other.unwrap_or_default()),
                ))
            }
        };

        let bytes = tokio::time::timeout(self.download_timeout, self.api.fetch_asset(url))
            .await
            .map_err(|_| DownloadError::Timeout {
                seconds: self.download_timeout.as_secs(),
            })??;

        let key = identity.storage_key(&extension);
        let object = self
            .blobs
            .put(&key, &bytes, keys::content_type_for(&extension))
            .await?;
        self.stats.add_bytes(object.size);

        let record = CanonicalAssetRecord::pending(identity, unit.date.clone(), url, key.clone());
        let outcome = self
            .store
            .create_if_absent(
                storage::ASSETS_COLLECTION,
                &record.document_id(),
                to_fields(&record)?,
                &["downloadedAt"],
            )
            .await?;

        if outcome.was_created() {
            info!("Downloaded {} -> {} ({} bytes)", identity, key, object.size);
            Ok(WorkOutcome::Downloaded { key })
        } else {
            debug!("{} was created by a concurrent delivery", identity);
            Ok(WorkOutcome::AlreadyPresent)
        }
    }

    /// Read page metadata from the cache, or fetch and cache it
    async fn cached_pages(&self, source_id: u64) -> DownloadResult<Vec<AssetPage>> {
        let asset_type = self.asset_type();
        let doc_id = keys::page_metadata_document_id(asset_type, source_id);

        if let Some(doc) = self
            .store
            .get(storage::PAGE_METADATA_COLLECTION, &doc_id)
            .await?
        {
            match doc.decode::<PageMetadataRecord>() {
                Ok(record) => return Ok(record.pages),
                Err(e) => warn!("Ignoring unreadable page metadata {}: {}", doc_id, e),
            }
        }

        let pages = self.api.fetch_asset_pages(source_id).await?;
        let record = PageMetadataRecord {
            asset_type,
            source_id,
            pages,
            fetched_at: None,
        };
        let outcome = self
            .store
            .create_if_absent(
                storage::PAGE_METADATA_COLLECTION,
                &doc_id,
                to_fields(&record)?,
                &["fetchedAt"],
            )
            .await?;

        match outcome.document().decode::<PageMetadataRecord>() {
            Ok(cached) => Ok(cached.pages),
            Err(_) => Ok(record.pages),
        }
    }

    fn skip(&self, identity: &AssetIdentity, reason: SkipReason) -> WorkOutcome {
        warn!("Skipping {}: {}", identity, reason);
        WorkOutcome::Skipped { reason }
    }
}

#[async_trait]
impl TaskHandler for DownloadWorker {
    async fn handle(&self, unit: &DownloadUnit) -> DownloadResult<WorkOutcome> {
        let started = Utc::now();
        let result = self.process(unit).await;
        match &result {
            Ok(outcome) => self.stats.record(outcome),
            Err(e) => {
                self.stats.record_failure();
                warn!(
                    "{} unit {} failed after {}ms: {}",
                    self.asset_type(),
                    unit,
                    (Utc::now() - started).num_milliseconds(),
                    e
                );
            }
        }
        result
    }
}
