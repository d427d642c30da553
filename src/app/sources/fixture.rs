//! In-memory source for tests and offline runs
//!
//! A [`FixtureSource`] serves scripted listing pages, page metadata and
//! blob bytes. It can also be loaded from a JSON file so that `run` works
//! without network access:
//!
//! ```json
//! {
//!   "mode": "daily",
//!   "listings": { "1": [ { "sourceId": 42, "pageCount": 3 } ] },
//!   "assets": { "42": [ { "originalUrl": "https://img.example/42_p0.png" } ] },
//!   "blobs": { "https://img.example/42_p0.png": "raw bytes as text" }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{ListingEntry, ListingPage, SourceApi};
use crate::app::models::{AssetPage, AssetType, Fields};
use crate::errors::{DownloadResult, HttpError, SourceError, SourceResult};

/// One listing entry as written in a fixture file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureEntry {
    pub source_id: u64,
    #[serde(default)]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub payload: Fields,
}

/// On-disk fixture format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureData {
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub listings: BTreeMap<u32, Vec<FixtureEntry>>,
    #[serde(default)]
    pub assets: BTreeMap<u64, Vec<AssetPage>>,
    #[serde(default)]
    pub blobs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct FixtureState {
    /// Listing pages; `Err` holds the HTTP status to fail with
    listings: HashMap<u32, Result<Vec<ListingEntry>, u16>>,
    asset_pages: HashMap<u64, Vec<AssetPage>>,
    blobs: HashMap<String, Vec<u8>>,
    /// Remaining transient failures per blob URL
    asset_failures: HashMap<String, u32>,
    fetch_delay: Duration,
}

/// Scripted [`SourceApi`]
#[derive(Debug)]
pub struct FixtureSource {
    asset_type: AssetType,
    mode: String,
    state: Mutex<FixtureState>,
    listing_calls: AtomicUsize,
    asset_page_calls: AtomicUsize,
    asset_calls: AtomicUsize,
}

impl FixtureSource {
    pub fn new(asset_type: AssetType, mode: impl Into<String>) -> Self {
        Self {
            asset_type,
            mode: mode.into(),
            state: Mutex::new(FixtureState::default()),
            listing_calls: AtomicUsize::new(0),
            asset_page_calls: AtomicUsize::new(0),
            asset_calls: AtomicUsize::new(0),
        }
    }

    /// Build a source from parsed fixture data
    pub fn from_data(asset_type: AssetType, data: FixtureData) -> Self {
        let mode = data
            .mode
            .unwrap_or_else(|| format!("{}-fixture", asset_type));
        let source = Self::new(asset_type, mode);
        for (page, entries) in data.listings {
            source.set_listing_page(
                page,
                entries
                    .into_iter()
                    .map(|entry| ListingEntry {
                        source_id: entry.source_id,
                        page_count: entry.page_count,
                        payload: entry.payload,
                    })
                    .collect(),
            );
        }
        for (source_id, pages) in data.assets {
            source.set_asset_pages(source_id, pages);
        }
        for (url, body) in data.blobs {
            source.set_blob(url, body.into_bytes());
        }
        source
    }

    /// Load a JSON fixture file
    pub fn from_file(asset_type: AssetType, path: &Path) -> SourceResult<Self> {
        let fixture_error = |reason: String| SourceError::Fixture {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| fixture_error(e.to_string()))?;
        let data: FixtureData =
            serde_json::from_str(&content).map_err(|e| fixture_error(e.to_string()))?;
        Ok(Self::from_data(asset_type, data))
    }

    pub fn set_listing_page(&self, page: u32, entries: Vec<ListingEntry>) {
        self.state().listings.insert(page, Ok(entries));
    }

    /// Make a listing page answer with an HTTP error status
    pub fn fail_listing_page(&self, page: u32, status: u16) {
        self.state().listings.insert(page, Err(status));
    }

    pub fn set_asset_pages(&self, source_id: u64, pages: Vec<AssetPage>) {
        self.state().asset_pages.insert(source_id, pages);
    }

    pub fn set_blob(&self, url: impl Into<String>, bytes: Vec<u8>) {
        self.state().blobs.insert(url.into(), bytes);
    }

    /// Make the next `times` fetches of `url` fail with a 503
    pub fn fail_asset(&self, url: impl Into<String>, times: u32) {
        self.state().asset_failures.insert(url.into(), times);
    }

    /// Delay every asset fetch, widening race windows in tests
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.state().fetch_delay = delay;
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::Relaxed)
    }

    pub fn asset_page_calls(&self) -> usize {
        self.asset_page_calls.load(Ordering::Relaxed)
    }

    pub fn asset_calls(&self) -> usize {
        self.asset_calls.load(Ordering::Relaxed)
    }

    fn state(&self) -> MutexGuard<'_, FixtureState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fixture_url(&self, path: impl std::fmt::Display) -> String {
        format!("fixture://{}/{}", self.asset_type, path)
    }
}

#[async_trait]
impl SourceApi for FixtureSource {
    fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    async fn fetch_listing(&self, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
        self.listing_calls.fetch_add(1, Ordering::Relaxed);
        let listing = self.state().listings.get(&page).cloned();
        match listing {
            Some(Ok(entries)) if !entries.is_empty() => Ok(ListingPage {
                date: date.format("%Y-%m-%d").to_string(),
                entries,
            }),
            Some(Err(status)) => Err(HttpError::Status {
                status,
                url: self.fixture_url(format!("listing/{}", page)),
            }
            .into()),
            _ => Err(SourceError::EmptyPage {
                source_name: self.asset_type.to_string(),
                page,
            }),
        }
    }

    async fn fetch_asset_pages(&self, source_id: u64) -> SourceResult<Vec<AssetPage>> {
        self.asset_page_calls.fetch_add(1, Ordering::Relaxed);
        let pages = self.state().asset_pages.get(&source_id).cloned();
        pages.ok_or_else(|| {
            HttpError::Status {
                status: 404,
                url: self.fixture_url(format!("posts/{}", source_id)),
            }
            .into()
        })
    }

    async fn fetch_asset(&self, url: &str) -> DownloadResult<Vec<u8>> {
        self.asset_calls.fetch_add(1, Ordering::Relaxed);
        let delay = self.state().fetch_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if let Some(remaining) = state.asset_failures.get_mut(url) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(HttpError::ServerOverloaded {
                    attempts: 1,
                    url: url.to_string(),
                }
                .into());
            }
        }
        state.blobs.get(url).cloned().ok_or_else(|| {
            HttpError::Status {
                status: 404,
                url: url.to_string(),
            }
            .into()
        })
    }
}
