//! Per-source settings

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::models::AssetType;
use crate::constants::{limits, sources};

/// Settings for one source, the `[sources.<name>]` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    /// Whether `run` polls this source by default
    pub enabled: bool,
    /// API origin; the source's public endpoint when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Ranking mode; the source's default mode when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    /// Listing pages fetched per run
    pub max_pages: u32,
    /// Pause between listing pages
    #[serde(with = "humantime_serde")]
    pub inter_page_delay: Duration,
    /// Outbound requests per second
    pub rate_limit_rps: u32,
    /// Listing page size, sankaku only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Serve this source from a JSON fixture instead of the network
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixture: Option<PathBuf>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            mode: None,
            max_pages: sources::DEFAULT_MAX_PAGES,
            inter_page_delay: sources::DEFAULT_INTER_PAGE_DELAY,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            limit: None,
            fixture: None,
        }
    }
}

impl SourceSettings {
    pub fn resolved_base_url(&self, asset_type: AssetType) -> &str {
        self.base_url.as_deref().unwrap_or(match asset_type {
            AssetType::Pixiv => sources::PIXIV_BASE_URL,
            AssetType::Danbooru => sources::DANBOORU_BASE_URL,
            AssetType::Sankaku => sources::SANKAKU_BASE_URL,
        })
    }

    pub fn resolved_mode(&self, asset_type: AssetType) -> &str {
        self.mode.as_deref().unwrap_or(match asset_type {
            AssetType::Pixiv => sources::PIXIV_MODE,
            AssetType::Danbooru => sources::DANBOORU_MODE,
            AssetType::Sankaku => sources::SANKAKU_MODE,
        })
    }

    pub fn resolved_limit(&self) -> u32 {
        self.limit.unwrap_or(sources::SANKAKU_PAGE_LIMIT)
    }
}

/// The `[sources]` table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub pixiv: SourceSettings,
    pub danbooru: SourceSettings,
    pub sankaku: SourceSettings,
}

impl SourcesConfig {
    pub fn get(&self, asset_type: AssetType) -> &SourceSettings {
        match asset_type {
            AssetType::Pixiv => &self.pixiv,
            AssetType::Danbooru => &self.danbooru,
            AssetType::Sankaku => &self.sankaku,
        }
    }

    pub fn get_mut(&mut self, asset_type: AssetType) -> &mut SourceSettings {
        match asset_type {
            AssetType::Pixiv => &mut self.pixiv,
            AssetType::Danbooru => &mut self.danbooru,
            AssetType::Sankaku => &mut self.sankaku,
        }
    }

    /// Sources with `enabled = true`, in display order
    pub fn enabled(&self) -> Vec<AssetType> {
        AssetType::ALL
            .into_iter()
            .filter(|asset_type| self.get(*asset_type).enabled)
            .collect()
    }
}
