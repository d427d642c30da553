//! Application constants for the ranking ingestion pipeline
//!
//! Constants are grouped by functional domain. Runtime-tunable values
//! appear here only as defaults for the configuration layer.

use std::time::Duration;

/// Environment variable names
pub mod env {
    /// Optional pixiv session cookie value (PHPSESSID)
    pub const PIXIV_SESSION: &str = "PIXIV_SESSION";
}

/// HTTP client configuration constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "ranking-ingest/0.1.0 (+https://github.com/ranking-ingest)";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 4;

    /// Jitter added before each rate-limited request
    pub const RATE_LIMIT_JITTER: Duration = Duration::from_millis(100);
}

/// Outbound retry policy shared by every source client
pub mod limits {
    use super::Duration;

    /// Default outbound requests per second for each source
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 2;

    /// Retries after an HTTP 429/503 or transport failure
    pub const MAX_RETRIES: u32 = 3;

    /// Fixed delay between those retries
    pub const RETRY_DELAY: Duration = Duration::from_secs(5);
}

/// Source endpoints and listing defaults
pub mod sources {
    use super::Duration;

    /// Pixiv web origin
    pub const PIXIV_BASE_URL: &str = "https://www.pixiv.net";

    /// Referer required by the pixiv image CDN
    pub const PIXIV_REFERER: &str = "https://www.pixiv.net/";

    /// Danbooru API origin
    pub const DANBOORU_BASE_URL: &str = "https://danbooru.donmai.us";

    /// Sankaku API origin
    pub const SANKAKU_BASE_URL: &str = "https://capi-v2.sankakucomplex.com";

    /// Default ranking mode for pixiv
    pub const PIXIV_MODE: &str = "daily";

    /// Default popularity scale for danbooru
    pub const DANBOORU_MODE: &str = "day";

    /// Default ordering for sankaku
    pub const SANKAKU_MODE: &str = "popularity";

    /// Default number of listing pages fetched per run
    pub const DEFAULT_MAX_PAGES: u32 = 10;

    /// Sankaku page size
    pub const SANKAKU_PAGE_LIMIT: u32 = 40;

    /// Default pause between listing pages
    pub const DEFAULT_INTER_PAGE_DELAY: Duration = Duration::from_secs(10);
}

/// Document store collections, field names and asset rules
pub mod storage {
    /// Canonical asset records
    pub const ASSETS_COLLECTION: &str = "images";

    /// Per-provider aggregate records
    pub const STATS_COLLECTION: &str = "score_stats";

    /// Ids of change events whose score deltas have been applied
    pub const APPLIED_EVENTS_COLLECTION: &str = "score_events";

    /// Cached per-artwork page metadata for paged sources
    pub const PAGE_METADATA_COLLECTION: &str = "asset_pages";

    /// Prefix of the per-source ranking collections
    pub const RANKINGS_COLLECTION_PREFIX: &str = "rankings_";

    /// Status written on canonical record creation
    pub const STATUS_PENDING: &str = "pending";

    /// Field holding the provider score map
    pub const SCORES_FIELD: &str = "scores";

    /// Extensions accepted by the download worker (lowercase, with dot)
    pub const SUPPORTED_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp"];

    /// Snapshot file name inside the data directory
    pub const SNAPSHOT_FILE_NAME: &str = "documents.json";

    /// Blob objects directory inside the data directory
    pub const BLOBS_DIR_NAME: &str = "blobs";

    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";
}

/// Task queue defaults
pub mod queue {
    use super::Duration;

    /// Maximum concurrent dispatches per source queue
    pub const MAX_CONCURRENT_DISPATCHES: usize = 1;

    /// Dispatch rate per source queue
    pub const MAX_DISPATCHES_PER_SECOND: f64 = 0.1;

    /// Delivery attempts before a task is abandoned
    pub const MAX_ATTEMPTS: u32 = 5;

    /// First retry delay
    pub const MIN_BACKOFF: Duration = Duration::from_secs(10);

    /// Retry delay ceiling
    pub const MAX_BACKOFF: Duration = Duration::from_secs(600);

    /// Delay between enqueue and first eligibility
    pub const SCHEDULE_DELAY: Duration = Duration::from_secs(1);

    /// Undispatched tasks older than this are dropped
    pub const DISPATCH_DEADLINE: Duration = Duration::from_secs(30 * 60);

    /// Upper bound on a single asset fetch
    pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

    /// Sleep between polls when nothing is eligible
    pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Ceiling for the idle poll backoff
    pub const MAX_IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1000);
}

/// Pipeline orchestration constants
pub mod pipeline {
    use super::Duration;

    /// Poll interval while waiting for quiescence
    pub const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(50);

    /// Consecutive idle observations required before declaring quiescence
    pub const IDLE_CONFIRMATIONS: u32 = 3;

    /// Interval for periodic progress logging
    pub const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(60);

    /// Timeout for background task shutdown
    pub const TASK_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

    /// Attempts a change listener makes on one event before giving up
    pub const LISTENER_MAX_ATTEMPTS: u32 = 5;

    /// First pause between listener attempts; doubles up to the maximum
    pub const LISTENER_MIN_BACKOFF: Duration = Duration::from_millis(100);

    /// Longest pause between listener attempts
    pub const LISTENER_MAX_BACKOFF: Duration = Duration::from_secs(5);

    /// How long applied-event markers are kept for redelivery checks
    pub const APPLIED_EVENT_RETENTION: Duration = Duration::from_secs(60 * 60);
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use http::USER_AGENT;
pub use limits::{DEFAULT_RATE_LIMIT_RPS, MAX_RETRIES};
pub use storage::{ASSETS_COLLECTION, STATS_COLLECTION, SUPPORTED_EXTENSIONS};
