//! Data models for the ingestion pipeline
//!
//! These types mirror the JSON documents kept in the document store. Field
//! names are camelCase on the wire so records stay readable by the
//! labeling processes and the browsing UI that share the store.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::keys;
use crate::constants::storage;

/// Schemaless document body
pub type Fields = Map<String, Value>;

/// External content source an asset was discovered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    /// Multi-page artworks; one download unit per page
    Pixiv,
    /// One asset per post
    Danbooru,
    /// One asset per post
    Sankaku,
}

impl AssetType {
    /// Every known source, in display order
    pub const ALL: [AssetType; 3] = [AssetType::Pixiv, AssetType::Danbooru, AssetType::Sankaku];

    /// Stable lowercase name used in keys and collection names
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Pixiv => "pixiv",
            AssetType::Danbooru => "danbooru",
            AssetType::Sankaku => "sankaku",
        }
    }

    /// Whether posts from this source can carry several pages
    pub fn is_paged(&self) -> bool {
        matches!(self, AssetType::Pixiv)
    }

    /// Collection holding this source's ranking records
    pub fn rankings_collection(&self) -> String {
        format!("{}{}", storage::RANKINGS_COLLECTION_PREFIX, self.as_str())
    }

    /// Inverse of [`AssetType::rankings_collection`]
    pub fn from_rankings_collection(collection: &str) -> Option<Self> {
        collection
            .strip_prefix(storage::RANKINGS_COLLECTION_PREFIX)
            .and_then(|name| name.parse().ok())
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixiv" => Ok(AssetType::Pixiv),
            "danbooru" => Ok(AssetType::Danbooru),
            "sankaku" => Ok(AssetType::Sankaku),
            other => Err(format!(
                "unknown source '{}' (expected pixiv, danbooru or sankaku)",
                other
            )),
        }
    }
}

/// One listing entry discovered during a scheduled fetch
///
/// Keyed by `(date, mode, sourceId)`; re-fetching a page overwrites the
/// same document instead of appending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingRecord {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub source_id: u64,
    /// Bucket date, `YYYY-MM-DD`
    pub date: String,
    pub mode: String,
    /// Listing page the entry was found on (1-based)
    pub page: u32,
    /// Position within that page (0-based)
    pub index: u32,
    /// Number of assets in the post, multi-asset sources only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    /// Opaque pass-through data such as dimensions
    #[serde(default)]
    pub payload: Fields,
}

impl RankingRecord {
    /// Deterministic document id for this record's key
    pub fn document_id(&self) -> String {
        keys::ranking_document_id(&self.date, &self.mode, self.source_id)
    }
}

/// Work item carried by the download queue
///
/// The date travels with the unit so the worker never has to look the
/// ranking record back up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadUnit {
    pub source_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub date: String,
}

impl DownloadUnit {
    /// Unit for a single-asset post
    pub fn single(source_id: u64, date: impl Into<String>) -> Self {
        Self {
            source_id,
            page: None,
            date: date.into(),
        }
    }

    /// Unit for one page of a multi-asset post
    pub fn paged(source_id: u64, page: u32, date: impl Into<String>) -> Self {
        Self {
            source_id,
            page: Some(page),
            date: date.into(),
        }
    }
}

impl fmt::Display for DownloadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}#p{} ({})", self.source_id, page, self.date),
            None => write!(f, "{} ({})", self.source_id, self.date),
        }
    }
}

/// Identity of one downloadable asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AssetIdentity {
    pub asset_type: AssetType,
    pub source_id: u64,
    pub page: Option<u32>,
}

impl AssetIdentity {
    pub fn new(asset_type: AssetType, source_id: u64, page: Option<u32>) -> Self {
        Self {
            asset_type,
            source_id,
            page,
        }
    }

    /// Identity addressed by a queue unit
    ///
    /// A paged source always has a page, defaulting to the first; a
    /// single-asset source never has one.
    pub fn from_unit(asset_type: AssetType, unit: &DownloadUnit) -> Self {
        let page = if asset_type.is_paged() {
            Some(unit.page.unwrap_or(0))
        } else {
            None
        };
        Self::new(asset_type, unit.source_id, page)
    }

    /// Blob store key for this asset with the given extension
    pub fn storage_key(&self, extension: &str) -> String {
        keys::storage_key(self.asset_type, self.source_id, self.page, extension)
    }
}

impl fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{}/{}#p{}", self.asset_type, self.source_id, page),
            None => write!(f, "{}/{}", self.asset_type, self.source_id),
        }
    }
}

/// One record per downloaded asset
///
/// `downloadedAt` is assigned by the store on creation and `scores` is
/// owned by external labelers, so both are optional when reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAssetRecord {
    pub status: String,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub source_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub date: String,
    pub original_url: String,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<String>,
    #[serde(default)]
    pub scores: BTreeMap<String, Value>,
}

impl CanonicalAssetRecord {
    /// Fresh `pending` record for a just-stored asset
    pub fn pending(
        identity: AssetIdentity,
        date: impl Into<String>,
        original_url: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            status: storage::STATUS_PENDING.to_string(),
            asset_type: identity.asset_type,
            source_id: identity.source_id,
            page: identity.page,
            date: date.into(),
            original_url: original_url.into(),
            key: key.into(),
            downloaded_at: None,
            scores: BTreeMap::new(),
        }
    }

    /// Document id: the escaped storage key
    pub fn document_id(&self) -> String {
        keys::escape_key(&self.key)
    }

    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity::new(self.asset_type, self.source_id, self.page)
    }
}

/// Running count and sum of one provider's scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateStatRecord {
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub sum: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Set once a delta would have pushed `sum` past `f64` range; `count`
    /// stays exact but `sum` stops tracking
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sum_overflow: bool,
}

impl AggregateStatRecord {
    /// Mean score, if any values have been counted and the sum is exact
    pub fn mean(&self) -> Option<f64> {
        if self.count > 0 && !self.sum_overflow {
            Some(self.sum / self.count as f64)
        } else {
            None
        }
    }
}

/// Page metadata for one asset of a multi-page post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
}

impl AssetPage {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            original_url: Some(url.into()),
            width: None,
            height: None,
        }
    }
}

/// Cached page metadata document for paged sources
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadataRecord {
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub source_id: u64,
    pub pages: Vec<AssetPage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
}
