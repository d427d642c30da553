//! Shared helpers for pipeline integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use tempfile::TempDir;

use ranking_ingest::app::models::{AssetPage, AssetType};
use ranking_ingest::app::pipeline::{Pipeline, RunSummary};
use ranking_ingest::app::queue::ConfigPresets;
use ranking_ingest::app::sources::{FixtureSource, ListingEntry, SourceSettings};
use ranking_ingest::app::store::{FsBlobStore, MemoryDocumentStore};

pub const RUN_TIMEOUT: Duration = Duration::from_secs(10);

pub fn ranking_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

/// One listing page, no pause between pages
pub fn single_page_settings() -> SourceSettings {
    SourceSettings {
        max_pages: 1,
        inter_page_delay: Duration::ZERO,
        ..SourceSettings::default()
    }
}

pub fn pixiv_page_url(source_id: u64, page: u32) -> String {
    format!("https://i.pximg.example/img-original/{}_p{}.png", source_id, page)
}

/// Pixiv source listing artwork 42 with three pages, each with bytes
pub fn pixiv_fixture() -> Arc<FixtureSource> {
    let source = Arc::new(FixtureSource::new(AssetType::Pixiv, "daily"));
    source.set_listing_page(1, vec![ListingEntry::new(42).with_page_count(3)]);
    source.set_asset_pages(
        42,
        (0..3)
            .map(|page| AssetPage::with_url(pixiv_page_url(42, page)))
            .collect(),
    );
    for page in 0..3 {
        source.set_blob(
            pixiv_page_url(42, page),
            format!("artwork 42 page {}", page).into_bytes(),
        );
    }
    source
}

/// Danbooru source listing post 7
pub fn danbooru_fixture() -> Arc<FixtureSource> {
    let source = Arc::new(FixtureSource::new(AssetType::Danbooru, "day"));
    let url = "https://cdn.donmai.example/original/aa/bb/7.jpg";
    source.set_listing_page(1, vec![ListingEntry::new(7)]);
    source.set_asset_pages(7, vec![AssetPage::with_url(url)]);
    source.set_blob(url, b"post 7".to_vec());
    source
}

/// Stores under a temporary data directory
pub struct TestEnv {
    pub store: Arc<MemoryDocumentStore>,
    pub blobs: Arc<FsBlobStore>,
    pub temp_dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = MemoryDocumentStore::open(temp_dir.path().join("documents.json"))
            .await
            .unwrap();
        let blobs = FsBlobStore::new(temp_dir.path().join("blobs"), None)
            .await
            .unwrap();
        Self {
            store: Arc::new(store),
            blobs: Arc::new(blobs),
            temp_dir,
        }
    }

    /// Pipeline over this environment's stores with fast queue settings
    pub fn pipeline(&self, sources: &[Arc<FixtureSource>]) -> Pipeline {
        let mut pipeline = Pipeline::new(
            self.store.clone(),
            self.blobs.clone(),
            ConfigPresets::testing(),
        );
        for source in sources {
            pipeline
                .add_source(source.clone(), &single_page_settings())
                .unwrap();
        }
        pipeline
    }

    /// One full run that must settle
    pub async fn run(&self, sources: &[Arc<FixtureSource>]) -> RunSummary {
        let summary = self
            .pipeline(sources)
            .run(ranking_date(), Some(RUN_TIMEOUT))
            .await
            .unwrap();
        assert!(summary.is_complete(), "run did not settle: {:?}", summary);
        summary
    }

    /// Reload the store from its snapshot, as a new process would
    pub async fn reopen(self) -> Self {
        self.store.save().await.unwrap();
        let store = MemoryDocumentStore::open(self.temp_dir.path().join("documents.json"))
            .await
            .unwrap();
        Self {
            store: Arc::new(store),
            ..self
        }
    }
}
