//! Danbooru popular-posts source

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{as_id, join_url, parse_body, pick_payload, ListingEntry, ListingPage, SourceApi};
use crate::app::client::{parse_url, HttpHandler};
use crate::app::models::{AssetPage, AssetType};
use crate::errors::{DownloadResult, SourceError, SourceResult};

const SOURCE_NAME: &str = "danbooru";

const PAYLOAD_FIELDS: &[&str] = &["image_width", "image_height", "score", "rating", "file_ext"];

/// Danbooru API client
#[derive(Debug)]
pub struct DanbooruApi {
    http: HttpHandler,
    base_url: Url,
    mode: String,
}

impl DanbooruApi {
    pub fn new(http: HttpHandler, base_url: &str, mode: &str) -> SourceResult<Self> {
        Ok(Self {
            http,
            base_url: parse_url(base_url)?,
            mode: mode.to_string(),
        })
    }

    fn listing_url(&self, date: NaiveDate, page: u32) -> SourceResult<Url> {
        let mut url = join_url(&self.base_url, "explore/posts/popular.json")?;
        url.query_pairs_mut()
            .append_pair("date", &date.format("%Y-%m-%d").to_string())
            .append_pair("scale", &self.mode)
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    fn post_url(&self, source_id: u64) -> SourceResult<Url> {
        join_url(&self.base_url, &format!("posts/{}.json", source_id))
    }
}

#[async_trait]
impl SourceApi for DanbooruApi {
    fn asset_type(&self) -> AssetType {
        AssetType::Danbooru
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    async fn fetch_listing(&self, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
        let url = self.listing_url(date, page)?;
        debug!("Fetching danbooru popular page {}: {}", page, url);
        let body = self.http.get_bytes(&url, &HeaderMap::new()).await?;
        parse_listing(&parse_body(SOURCE_NAME, &body)?, date, page)
    }

    async fn fetch_asset_pages(&self, source_id: u64) -> SourceResult<Vec<AssetPage>> {
        let url = self.post_url(source_id)?;
        let body = self.http.get_bytes(&url, &HeaderMap::new()).await?;
        Ok(vec![parse_post(&parse_body(SOURCE_NAME, &body)?)?])
    }

    async fn fetch_asset(&self, url: &str) -> DownloadResult<Vec<u8>> {
        let url = parse_url(url)?;
        Ok(self.http.get_bytes(&url, &HeaderMap::new()).await?)
    }
}

/// Parse a `popular.json` body: a bare array of posts
pub fn parse_listing(body: &Value, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
    let posts = body
        .as_array()
        .ok_or_else(|| SourceError::malformed(SOURCE_NAME, "expected an array of posts"))?;

    let entries: Vec<_> = posts
        .iter()
        .filter_map(|post| match as_id(post.get("id")) {
            Some(source_id) => Some(ListingEntry {
                source_id,
                page_count: None,
                payload: pick_payload(post, PAYLOAD_FIELDS),
            }),
            None => {
                warn!("Dropping danbooru post without id on page {}", page);
                None
            }
        })
        .collect();

    if entries.is_empty() {
        return Err(SourceError::EmptyPage {
            source_name: SOURCE_NAME.to_string(),
            page,
        });
    }

    Ok(ListingPage {
        date: date.format("%Y-%m-%d").to_string(),
        entries,
    })
}

/// Parse a `posts/{id}.json` body
///
/// Restricted posts omit `file_url`; that surfaces as a page without a URL.
pub fn parse_post(body: &Value) -> SourceResult<AssetPage> {
    if !body.is_object() {
        return Err(SourceError::malformed(SOURCE_NAME, "expected a post object"));
    }
    Ok(AssetPage {
        original_url: body
            .get("file_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        width: body.get("image_width").and_then(Value::as_u64),
        height: body.get("image_height").and_then(Value::as_u64),
    })
}
