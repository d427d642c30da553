//! Download worker tests against a fixture source and temporary stores

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::app::keys;
use crate::app::models::{AssetIdentity, AssetPage, AssetType, CanonicalAssetRecord, DownloadUnit};
use crate::app::queue::TaskHandler;
use crate::app::sources::FixtureSource;
use crate::app::store::{DocumentStore, FsBlobStore, MemoryDocumentStore};
use crate::constants::storage;
use crate::errors::DownloadError;

struct Harness {
    source: Arc<FixtureSource>,
    store: Arc<MemoryDocumentStore>,
    blobs: Arc<FsBlobStore>,
    _temp_dir: TempDir,
}

impl Harness {
    async fn new(asset_type: AssetType) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let blobs = FsBlobStore::new(temp_dir.path(), None).await.unwrap();
        Self {
            source: Arc::new(FixtureSource::new(asset_type, "daily")),
            store: Arc::new(MemoryDocumentStore::new()),
            blobs: Arc::new(blobs),
            _temp_dir: temp_dir,
        }
    }

    fn worker(&self, timeout: Duration) -> DownloadWorker {
        DownloadWorker::new(
            self.source.clone(),
            self.store.clone(),
            self.blobs.clone(),
            timeout,
        )
    }

    /// Script a three-page pixiv artwork with bytes behind every page
    fn script_artwork(&self, source_id: u64) {
        let pages = (0..3)
            .map(|p| AssetPage::with_url(page_url(source_id, p)))
            .collect();
        self.source.set_asset_pages(source_id, pages);
        for p in 0..3 {
            self.source
                .set_blob(page_url(source_id, p), format!("page {}", p).into_bytes());
        }
    }
}

fn page_url(source_id: u64, page: u32) -> String {
    format!("https://i.example/img/{}_p{}.png", source_id, page)
}

const TIMEOUT: Duration = Duration::from_secs(5);

/// Test the paged happy path
///
/// Verifies that each page lands under its own key with one canonical
/// record, and that page metadata is fetched once and cached.
#[tokio::test]
async fn test_paged_artwork_downloads_every_page() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    let worker = harness.worker(TIMEOUT);

    for page in 0..3 {
        let outcome = worker
            .handle(&DownloadUnit::paged(42, page, "2024-05-01"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            WorkOutcome::Downloaded {
                key: format!("pixiv/42_p{}.png", page)
            }
        );
    }

    assert_eq!(harness.source.asset_page_calls(), 1);
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 3);
    assert_eq!(
        harness.store.count(storage::PAGE_METADATA_COLLECTION).await,
        1
    );
    assert_eq!(
        harness.blobs.read("pixiv/42_p1.png").await.unwrap(),
        Some(b"page 1".to_vec())
    );

    let stats = worker.stats();
    assert_eq!(stats.downloaded, 3);
    assert_eq!(stats.bytes_downloaded, 18);
}

/// Test the dedup fast path
///
/// A second delivery for an asset that already has a canonical record
/// fetches nothing.
#[tokio::test]
async fn test_existing_record_short_circuits() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    let worker = harness.worker(TIMEOUT);
    let unit = DownloadUnit::paged(42, 0, "2024-05-01");

    worker.process(&unit).await.unwrap();
    let again = worker.process(&unit).await.unwrap();

    assert_eq!(again, WorkOutcome::AlreadyPresent);
    assert_eq!(harness.source.asset_calls(), 1);
    assert!(asset_exists(
        harness.store.as_ref(),
        &AssetIdentity::new(AssetType::Pixiv, 42, Some(0))
    )
    .await
    .unwrap());
    assert!(!asset_exists(
        harness.store.as_ref(),
        &AssetIdentity::new(AssetType::Pixiv, 42, Some(1))
    )
    .await
    .unwrap());
}

/// Test a paged unit without a page
///
/// Verifies that it is treated as the first page, so it shares that page's
/// key and canonical record instead of creating a page-less duplicate.
#[tokio::test]
async fn test_paged_unit_without_page_is_first_page() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    let worker = harness.worker(TIMEOUT);
    let bare = DownloadUnit {
        source_id: 42,
        page: None,
        date: "2024-05-01".to_string(),
    };

    let outcome = worker.process(&bare).await.unwrap();
    assert_eq!(
        outcome,
        WorkOutcome::Downloaded {
            key: "pixiv/42_p0.png".to_string()
        }
    );

    let first = worker
        .process(&DownloadUnit::paged(42, 0, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(first, WorkOutcome::AlreadyPresent);
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 1);
}

/// Test single-asset sources
///
/// Verifies the key has no page suffix and the canonical record carries a
/// store-assigned `downloadedAt`.
#[tokio::test]
async fn test_single_asset_record() {
    let harness = Harness::new(AssetType::Danbooru).await;
    let url = "https://cdn.example/original/ab/7.JPG";
    harness
        .source
        .set_asset_pages(7, vec![AssetPage::with_url(url)]);
    harness.source.set_blob(url, b"jpeg".to_vec());
    let worker = harness.worker(TIMEOUT);

    let outcome = worker
        .process(&DownloadUnit::single(7, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        WorkOutcome::Downloaded {
            key: "danbooru/7.jpg".to_string()
        }
    );

    let doc = harness
        .store
        .get(
            storage::ASSETS_COLLECTION,
            &keys::escape_key("danbooru/7.jpg"),
        )
        .await
        .unwrap()
        .unwrap();
    let record: CanonicalAssetRecord = doc.decode().unwrap();
    assert_eq!(record.status, "pending");
    assert_eq!(record.page, None);
    assert_eq!(record.original_url, url);
    assert_eq!(record.date, "2024-05-01");
    assert!(record.downloaded_at.is_some());
    assert!(record.scores.is_empty());
    assert_eq!(
        harness.store.count(storage::PAGE_METADATA_COLLECTION).await,
        0
    );
}

/// Test permanent skips
///
/// Unsupported extensions, missing URLs and out-of-range pages complete
/// without fetching bytes or writing records.
#[tokio::test]
async fn test_permanent_skips() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.source.set_asset_pages(
        42,
        vec![
            AssetPage::with_url("https://i.example/img/42_p0.zip"),
            AssetPage {
                original_url: None,
                width: Some(10),
                height: Some(10),
            },
            AssetPage::with_url("https://i.example/img/42_p2"),
        ],
    );
    let worker = harness.worker(TIMEOUT);

    let zip = worker
        .handle(&DownloadUnit::paged(42, 0, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(
        zip,
        WorkOutcome::Skipped {
            reason: SkipReason::UnsupportedExtension(".zip".to_string())
        }
    );

    let no_url = worker
        .handle(&DownloadUnit::paged(42, 1, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(
        no_url,
        WorkOutcome::Skipped {
            reason: SkipReason::NoDownloadUrl
        }
    );

    let no_ext = worker
        .handle(&DownloadUnit::paged(42, 2, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(
        no_ext,
        WorkOutcome::Skipped {
            reason: SkipReason::UnsupportedExtension(String::new())
        }
    );

    let out_of_range = worker
        .handle(&DownloadUnit::paged(42, 5, "2024-05-01"))
        .await
        .unwrap();
    assert_eq!(
        out_of_range,
        WorkOutcome::Skipped {
            reason: SkipReason::PageOutOfRange {
                page: 5,
                available: 3
            }
        }
    );

    assert_eq!(harness.source.asset_calls(), 0);
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 0);
    assert_eq!(worker.stats().skipped, 4);
}

/// Test transient fetch failures
///
/// A failed fetch is returned to the caller for retry and the next
/// delivery succeeds.
#[tokio::test]
async fn test_fetch_failure_then_retry() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    harness.source.fail_asset(page_url(42, 0), 1);
    let worker = harness.worker(TIMEOUT);
    let unit = DownloadUnit::paged(42, 0, "2024-05-01");

    let first = worker.handle(&unit).await;
    assert!(matches!(first, Err(DownloadError::Http(_))));
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 0);

    let second = worker.handle(&unit).await.unwrap();
    assert!(matches!(second, WorkOutcome::Downloaded { .. }));

    let stats = worker.stats();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.downloaded, 1);
}

/// Test the download timeout
#[tokio::test]
async fn test_slow_fetch_times_out() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    harness.source.set_fetch_delay(Duration::from_millis(300));
    let worker = harness.worker(Duration::from_millis(20));

    let result = worker
        .process(&DownloadUnit::paged(42, 0, "2024-05-01"))
        .await;
    assert!(matches!(result, Err(DownloadError::Timeout { .. })));
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 0);
}

/// Test concurrent duplicate deliveries
///
/// Two workers racing on the same unit both pass the fast path, but only
/// one creates the record and a single blob object remains.
#[tokio::test]
async fn test_concurrent_duplicate_deliveries() {
    let harness = Harness::new(AssetType::Pixiv).await;
    harness.script_artwork(42);
    harness.source.set_fetch_delay(Duration::from_millis(50));
    let first = harness.worker(TIMEOUT);
    let second = harness.worker(TIMEOUT);
    let unit = DownloadUnit::paged(42, 0, "2024-05-01");

    let (a, b) = tokio::join!(first.process(&unit), second.process(&unit));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| matches!(o, WorkOutcome::AlreadyPresent));

    assert_eq!(
        outcomes,
        vec![
            WorkOutcome::Downloaded {
                key: "pixiv/42_p0.png".to_string()
            },
            WorkOutcome::AlreadyPresent,
        ]
    );
    assert_eq!(harness.store.count(storage::ASSETS_COLLECTION).await, 1);
    assert_eq!(
        harness.blobs.list_keys().await.unwrap(),
        vec!["pixiv/42_p0.png".to_string()]
    );
}
