//! Discovery trigger
//!
//! Reacts to ranking record writes by enqueueing the download units that do
//! not yet have a canonical record. Running it again for the same record
//! only fills gaps, so duplicate notifications and overlapping listing runs
//! are harmless.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::app::models::{AssetIdentity, AssetType, DownloadUnit, RankingRecord};
use crate::app::queue::TaskQueue;
use crate::app::store::{decode_fields, ChangeEvent, DocumentStore};
use crate::app::worker::asset_exists;
use crate::errors::StoreResult;

/// Enqueues missing download units for one source
#[derive(Debug)]
pub struct DiscoveryTrigger {
    store: Arc<dyn DocumentStore>,
    queue: Arc<TaskQueue>,
}

impl DiscoveryTrigger {
    pub fn new(store: Arc<dyn DocumentStore>, queue: Arc<TaskQueue>) -> Self {
        Self { store, queue }
    }

    pub fn asset_type(&self) -> AssetType {
        self.queue.asset_type()
    }

    /// Handle one change notification from the rankings collection
    ///
    /// Returns the number of units enqueued. Deletes and undecodable records
    /// enqueue nothing.
    pub async fn on_ranking_record_written(&self, event: &ChangeEvent) -> StoreResult<usize> {
        let Some(after) = event.after.as_ref() else {
            return Ok(0);
        };

        let record: RankingRecord = match decode_fields(after) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    "Skipping undecodable ranking record {}/{}: {}",
                    event.collection, event.id, e
                );
                return Ok(0);
            }
        };

        self.discover(&record).await
    }

    /// Enqueue every unit of `record` that has no canonical record
    pub async fn discover(&self, record: &RankingRecord) -> StoreResult<usize> {
        let asset_type = self.asset_type();
        let units = candidate_units(asset_type, record);

        let mut enqueued = 0;
        for unit in units {
            let identity = AssetIdentity::from_unit(asset_type, &unit);
            if asset_exists(self.store.as_ref(), &identity).await? {
                debug!("{} already downloaded", identity);
                continue;
            }
            let task_id = self.queue.enqueue(unit).await;
            debug!("Enqueued {} as task {}", identity, task_id);
            enqueued += 1;
        }
        Ok(enqueued)
    }
}

/// Every download unit a ranking record refers to
fn candidate_units(asset_type: AssetType, record: &RankingRecord) -> Vec<DownloadUnit> {
    if asset_type.is_paged() {
        let page_count = record.page_count.unwrap_or(1).max(1);
        (0..page_count)
            .map(|page| DownloadUnit::paged(record.source_id, page, record.date.clone()))
            .collect()
    } else {
        vec![DownloadUnit::single(record.source_id, record.date.clone())]
    }
}
