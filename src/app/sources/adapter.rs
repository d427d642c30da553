//! Source adapter: listing pages to ranking records
//!
//! One adapter per source. A run walks pages `1..=max_pages`, pausing
//! between pages, and upserts each successful page as a single atomic batch
//! keyed by `(date, mode, sourceId)`. A failing page is logged and skipped;
//! it never aborts the run. The adapter only writes ranking records, and
//! downloads are discovered from those writes.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use super::{ListingPage, SourceApi};
use crate::app::models::{AssetType, RankingRecord};
use crate::app::store::{to_fields, DocumentStore, DocumentWrite};
use crate::errors::{SourceError, SourceResult};

/// Outcome of one `fetch_and_store` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub pages_ok: u32,
    pub pages_failed: u32,
    pub records_written: usize,
}

impl FetchReport {
    pub fn pages_attempted(&self) -> u32 {
        self.pages_ok + self.pages_failed
    }
}

/// Polls one source and persists its listings
#[derive(Debug, Clone)]
pub struct SourceAdapter {
    api: Arc<dyn SourceApi>,
    store: Arc<dyn DocumentStore>,
    max_pages: u32,
    inter_page_delay: Duration,
}

impl SourceAdapter {
    pub fn new(
        api: Arc<dyn SourceApi>,
        store: Arc<dyn DocumentStore>,
        max_pages: u32,
        inter_page_delay: Duration,
    ) -> Self {
        Self {
            api,
            store,
            max_pages,
            inter_page_delay,
        }
    }

    pub fn asset_type(&self) -> AssetType {
        self.api.asset_type()
    }

    pub fn api(&self) -> &Arc<dyn SourceApi> {
        &self.api
    }

    /// Fetch every listing page for `date` and upsert its records
    pub async fn fetch_and_store(&self, date: NaiveDate) -> FetchReport {
        let asset_type = self.asset_type();
        let mut report = FetchReport::default();
        info!(
            "Fetching {} listings for {} ({} pages)",
            asset_type, date, self.max_pages
        );

        for page in 1..=self.max_pages {
            if page > 1 && !self.inter_page_delay.is_zero() {
                tokio::time::sleep(self.inter_page_delay).await;
            }

            match self.store_page(date, page).await {
                Ok(written) => {
                    report.pages_ok += 1;
                    report.records_written += written;
                    debug!("{} page {}: {} records", asset_type, page, written);
                }
                Err(e) => {
                    report.pages_failed += 1;
                    warn!("Skipping {} listing page {}: {}", asset_type, page, e);
                }
            }
        }

        info!(
            "{} listings for {}: {} pages ok, {} failed, {} records written",
            asset_type, date, report.pages_ok, report.pages_failed, report.records_written
        );
        report
    }

    async fn store_page(&self, date: NaiveDate, page: u32) -> SourceResult<usize> {
        let listing = self.api.fetch_listing(date, page).await?;
        let writes = self.page_writes(&listing, page)?;
        let written = writes.len();
        self.store.commit(writes).await.map_err(SourceError::from)?;
        Ok(written)
    }

    /// Normalize one page into upserts
    fn page_writes(&self, listing: &ListingPage, page: u32) -> SourceResult<Vec<DocumentWrite>> {
        let asset_type = self.asset_type();
        let collection = asset_type.rankings_collection();

        listing
            .entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let record = RankingRecord {
                    asset_type,
                    source_id: entry.source_id,
                    date: listing.date.clone(),
                    mode: self.api.mode().to_string(),
                    page,
                    index: index as u32,
                    page_count: if asset_type.is_paged() {
                        Some(entry.page_count.unwrap_or(1).max(1))
                    } else {
                        None
                    },
                    payload: entry.payload.clone(),
                };
                Ok(
                    DocumentWrite::set(collection.clone(), record.document_id(), to_fields(&record)?)
                        .with_server_timestamp("fetchedAt"),
                )
            })
            .collect()
    }
}
