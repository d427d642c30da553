//! Sankaku popularity source

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

const SOURCE_NAME: &str = "sankaku";

const PAYLOAD_FIELDS: &[&str] = &["width", "height", "total_score", "fav_count", "rating"];

/// Sankaku API client
#[derive(Debug)]
pub struct SankakuApi {
    http: HttpHandler,
    base_url: Url,
    mode: String,
    limit: u32,
}

impl SankakuApi {
    pub fn new(http: HttpHandler, base_url: &str, mode: &str, limit: u32) -> SourceResult<Self> {
        Ok(Self {
            http,
            base_url: parse_url(base_url)?,
            mode: mode.to_string(),
            limit,
        })
    }

    fn listing_url(&self, date: NaiveDate, page: u32) -> SourceResult<Url> {
        let mut url = join_url(&self.base_url, "posts")?;
        let tags = format!("order:{} date:{}", self.mode, date.format("%Y-%m-%d"));
        url.query_pairs_mut()
            .append_pair("tags", &tags)
            .append_pair("page", &page.to_string())
            .append_pair("limit", &self.limit.to_string());
        Ok(url)
    }

    fn post_url(&self, source_id: u64) -> SourceResult<Url> {
        join_url(&self.base_url, &format!("posts/{}", source_id))
    }
}

#[async_trait]
impl SourceApi for SankakuApi {
    fn asset_type(&self) -> AssetType {
        AssetType::Sankaku
    }

    fn mode(&self) -> &str {
        &self.mode
    }

    async fn fetch_listing(&self, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
        let url = self.listing_url(date, page)?;
        debug!("Fetching sankaku listing page {}: {}", page, url);
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

/// Parse a `posts` listing body
///
/// Accepts both the bare array and the `{"data": [...]}` envelope.
pub fn parse_listing(body: &Value, date: NaiveDate, page: u32) -> SourceResult<ListingPage> {
    let posts = body
        .as_array()
        .or_else(|| body.get("data").and_then(Value::as_array))
        .ok_or_else(|| SourceError::malformed(SOURCE_NAME, "expected an array of posts"))?;

    let mut entries = Vec::with_capacity(posts.len());
    for post in posts {
        match as_id(post.get("id")) {
            Some(source_id) => entries.push(ListingEntry {
                source_id,
                page_count: None,
                payload: pick_payload(post, PAYLOAD_FIELDS),
            }),
            None => warn!("Dropping sankaku post without numeric id on page {}", page),
        }
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

/// Parse a `posts/{id}` body, either an object or a one-element array
pub fn parse_post(body: &Value) -> SourceResult<AssetPage> {
    let post = match body {
        Value::Array(items) => items.first(),
        Value::Object(_) => Some(body),
        _ => None,
    }
    .ok_or_else(|| SourceError::malformed(SOURCE_NAME, "expected a post object"))?;

    Ok(AssetPage {
        original_url: post
            .get("file_url")
            .and_then(Value::as_str)
            .map(str::to_string),
        width: post.get("width").and_then(Value::as_u64),
        height: post.get("height").and_then(Value::as_u64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_listing_envelopes() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let bare = json!([{"id": 9, "width": 640, "height": 480, "total_score": 55}]);
        let page = parse_listing(&bare, date, 1).unwrap();
        assert_eq!(page.entries[0].source_id, 9);
        assert_eq!(page.entries[0].payload["total_score"], 55);

        let wrapped = json!({"data": [{"id": "10"}, {"id": "abc"}]});
        let page = parse_listing(&wrapped, date, 2).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.entries[0].source_id, 10);
    }

    #[test]
    fn test_parse_post_shapes() {
        let object = json!({"id": 9, "file_url": "https://s.sankakucomplex.com/data/9.webp"});
        assert_eq!(
            parse_post(&object).unwrap().original_url.as_deref(),
            Some("https://s.sankakucomplex.com/data/9.webp")
        );

        let array = json!([{"id": 9, "file_url": null}]);
        assert_eq!(parse_post(&array).unwrap().original_url, None);

        assert!(parse_post(&json!([])).is_err());
        assert!(parse_post(&json!("oops")).is_err());
    }
}
