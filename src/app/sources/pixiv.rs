//! Pixiv ranking source
//!
//! Listings come from `ranking.php` in JSON mode; page metadata comes from
//! the `ajax/illust/{id}/pages` endpoint. The image CDN rejects requests
//! without a pixiv Referer, so every call carries one.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::{
    as_count, as_id, join_url, parse_body, pick_payload, ListingEntry, ListingPage, SourceApi,
};
use crate::app::client::{parse_url, HttpHandler};
use crate::app::models::{AssetPage, AssetType};
use crate::constants::sources;
use crate::errors::{DownloadResult, SourceError, SourceResult};

const SOURCE_NAME: &str = "pixiv";

/// Fields copied from each ranking entry into the record payload
const PAYLOAD_FIELDS: &[&str] = &["width", "height", "rank", "title", "user_id"];

/// Pixiv ranking and artwork client
#[derive(Debug)]
pub struct PixivApi {
    http: HttpHandler,
    base_url: Url,
    mode: String,
    headers: HeaderMap,
}

impl PixivApi {
    /// Create a client; `session` is the optional PHPSESSID cookie value
    pub fn new(
        http: HttpHandler,
        base_url: &str,
        mode: &str,
        session: Option<String>,
    ) -> SourceResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static(sources::PIXIV_REFERER));
        if let Some(session) = session.filter(|s| !s.trim().is_empty()) {
            let cookie = HeaderValue::from_str(&format!("PHPSESSID={}", session.trim()))
                .map_err(|e| SourceError::malformed(SOURCE_NAME, format!("session cookie: {}", e)))?;
            headers.insert(COOKIE, cookie);
        }

        Ok(Self {
            http,
            base_url: parse_url(base_url)?,
            mode: mode.to_string(),
            headers,
        })
    }

    fn listing_url(&self, date: NaiveDate, page: u32) -> SourceResult<Url> {
        let mut url = join_url(&self.base_url, "ranking.php")?;
        url.query_pairs_mut()
            .append_pair("mode", &self.mode)
            .append_pair("content", "illust")
            .append_pair("format", "json")
            .append_pair("p", &page.to_string())
            .append_pair("date", &date.format("%Y%m%d").to_string());
        Ok(url)
    }

    fn pages_url(&self, source_id: u64) -> SourceResult<Url> {
        join_url(&self.base_url, &format!("ajax/illust/{}/pages", source_id))
    }
}

#[async_trait]
impl SourceApi for PixivApi {
    fn asset_type(&self) -> AssetType {
        AssetType::Pixiv
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    async fn fetch_listing(&self, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
        let url = self.listing_url(date, page)?;
        debug!("Fetching pixiv ranking page {}: {}", page, url);
        let body = self.http.get_bytes(&url, &self.headers).await?;
        parse_listing(&parse_body(SOURCE_NAME, &body)?, date, page)
    }

    async fn fetch_asset_pages(&self, source_id: u64) -> SourceResult<Vec<AssetPage>> {
        let url = self.pages_url(source_id)?;
        let body = self.http.get_bytes(&url, &self.headers).await?;
        parse_pages(&parse_body(SOURCE_NAME, &body)?)
    }

    async fn fetch_asset(&self, url: &str) -> DownloadResult<Vec<u8>> {
        let url = parse_url(url)?;
        Ok(self.http.get_bytes(&url, &self.headers).await?)
    }
}

/// Parse a `ranking.php` JSON body
///
/// The bucket date is the ranking's own `date` field when present, falling
/// back to the requested date. Entries without a usable id are dropped.
pub fn parse_listing(body: &Value, requested: NaiveDate, page: u32) -> SourceResult<ListingPage> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(SourceError::malformed(SOURCE_NAME, error));
    }

    let contents = body
        .get("contents")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::malformed(SOURCE_NAME, "missing contents array"))?;

    let date = body
        .get("date")
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y%m%d").ok())
        .unwrap_or(requested);

    let mut entries = Vec::with_capacity(contents.len());
    for item in contents {
        let Some(source_id) = as_id(item.get("illust_id")) else {
            warn!("Dropping pixiv ranking entry without illust_id on page {}", page);
            continue;
        };
        let page_count = as_count(item.get("illust_page_count")).unwrap_or(1).max(1);
        entries.push(ListingEntry {
            source_id,
            page_count: Some(page_count),
            payload: pick_payload(item, PAYLOAD_FIELDS),
        });
    }

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

/// Parse an `ajax/illust/{id}/pages` JSON body
pub fn parse_pages(body: &Value) -> SourceResult<Vec<AssetPage>> {
    if body.get("error").and_then(Value::as_bool).unwrap_or(false) {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("pixiv reported an error");
        return Err(SourceError::malformed(SOURCE_NAME, message));
    }

    let pages = body
        .get("body")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::malformed(SOURCE_NAME, "missing pages body"))?;

    Ok(pages
        .iter()
        .map(|page| AssetPage {
            original_url: page
                .pointer("/urls/original")
                .and_then(Value::as_str)
                .map(str::to_string),
            width: page.get("width").and_then(Value::as_u64),
            height: page.get("height").and_then(Value::as_u64),
        })
        .collect())
}
