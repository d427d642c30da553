//! External ranking sources
//!
//! Every provider implements [`SourceApi`]: fetch one listing page, resolve
//! the downloadable pages of one post, and fetch raw asset bytes. The
//! [`SourceAdapter`] drives the listing side and persists ranking records;
//! the download worker drives the other two calls.
//!
//! - `pixiv`: multi-page artworks, one download unit per page
//! - `danbooru`, `sankaku`: one asset per post
//! - `fixture`: in-memory source for tests and offline runs

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use url::Url;

use crate::app::client::ClientConfig;
use crate::app::models::{AssetPage, AssetType, Fields};
use crate::errors::{DownloadResult, HttpError, SourceError, SourceResult};

pub mod adapter;
pub mod config;
pub mod danbooru;
pub mod fixture;
pub mod pixiv;
pub mod sankaku;

pub use adapter::{FetchReport, SourceAdapter};
pub use config::{SourceSettings, SourcesConfig};
pub use danbooru::DanbooruApi;
pub use fixture::FixtureSource;
pub use pixiv::PixivApi;
pub use sankaku::SankakuApi;

/// One entry of a listing page, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ListingEntry {
    pub source_id: u64,
    /// Number of assets in the post, multi-page sources only
    pub page_count: Option<u32>,
    /// Opaque pass-through data stored with the ranking record
    pub payload: Fields,
}

impl ListingEntry {
    pub fn new(source_id: u64) -> Self {
        Self {
            source_id,
            page_count: None,
            payload: Fields::new(),
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }
}

/// One parsed listing page
#[derive(Debug, Clone, PartialEq)]
pub struct ListingPage {
    /// Bucket date the entries belong to, `YYYY-MM-DD`
    pub date: String,
    pub entries: Vec<ListingEntry>,
}

/// Capability set of one external source
#[async_trait]
pub trait SourceApi: Send + Sync + Debug {
    /// Source these calls talk to
    fn asset_type(&self) -> AssetType;

    /// Ranking mode recorded on every listing entry
    fn mode(&self) -> &str;

    /// Fetch and parse one listing page (1-based)
    async fn fetch_listing(&self, date: NaiveDate, page: u32) -> SourceResult<ListingPage>;

    /// Resolve the downloadable pages of one post
    ///
    /// Single-asset sources return exactly one page.
    async fn fetch_asset_pages(&self, source_id: u64) -> SourceResult<Vec<AssetPage>>;

    /// Fetch the raw bytes behind an original URL
    async fn fetch_asset(&self, url: &str) -> DownloadResult<Vec<u8>>;
}

/// Build the API client for one source
///
/// A configured fixture file takes precedence over the HTTP client.
pub fn build_source(
    asset_type: AssetType,
    settings: &SourceSettings,
    client_config: &ClientConfig,
) -> SourceResult<Arc<dyn SourceApi>> {
    if let Some(path) = &settings.fixture {
        let source = FixtureSource::from_file(asset_type, path)?;
        return Ok(Arc::new(source));
    }

    let http = client_config.source_handler(settings.rate_limit_rps)?;
    let base_url = settings.resolved_base_url(asset_type);
    let mode = settings.resolved_mode(asset_type);

    let source: Arc<dyn SourceApi> = match asset_type {
        AssetType::Pixiv => Arc::new(PixivApi::new(
            http,
            base_url,
            mode,
            std::env::var(crate::constants::env::PIXIV_SESSION).ok(),
        )?),
        AssetType::Danbooru => Arc::new(DanbooruApi::new(http, base_url, mode)?),
        AssetType::Sankaku => Arc::new(SankakuApi::new(
            http,
            base_url,
            mode,
            settings.resolved_limit(),
        )?),
    };
    Ok(source)
}

/// Resolve `path` relative to a base URL, treating the base as a directory
pub(crate) fn join_url(base: &Url, path: &str) -> SourceResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let directory = format!("{}/", base.path());
        base.set_path(&directory);
    }
    base.join(path).map_err(|e| {
        SourceError::Http(HttpError::InvalidUrl {
            url: format!("{}{}", base, path),
            error: e.to_string(),
        })
    })
}

/// Decode a JSON response body
pub(crate) fn parse_body(source_name: &str, bytes: &[u8]) -> SourceResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| SourceError::malformed(source_name, format!("invalid JSON: {}", e)))
}

/// Read an identifier that may be encoded as a number or a numeric string
pub(crate) fn as_id(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a small count that may be encoded as a number or a numeric string
pub(crate) fn as_count(value: Option<&Value>) -> Option<u32> {
    as_id(value).and_then(|n| u32::try_from(n).ok())
}

/// Copy the listed keys from `source` into a payload, skipping nulls
pub(crate) fn pick_payload(source: &Value, keys: &[&str]) -> Fields {
    let mut payload = Fields::new();
    for key in keys {
        match source.get(*key) {
            Some(Value::Null) | None => {}
            Some(value) => {
                payload.insert((*key).to_string(), value.clone());
            }
        }
    }
    payload
}
