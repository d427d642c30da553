//! Error types for the ranking ingestion pipeline
//!
//! Each subsystem owns a focused error enum so that callers can decide
//! between "skip and continue", "retry later" and "abort" without string
//! matching. [`AppError`] ties them together for the CLI.

use std::path::PathBuf;
use thiserror::Error;

/// Outbound HTTP errors shared by every source client
#[derive(Error, Debug)]
pub enum HttpError {
    /// Transport-level failure (DNS, TLS, connection reset, body read)
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// Server kept answering 429 after the retry budget was spent
    #[error("Rate limit exceeded after {attempts} attempts: {url}")]
    RateLimitExceeded { attempts: u32, url: String },

    /// Server kept answering 503 after the retry budget was spent
    #[error("Server overloaded after {attempts} attempts: {url}")]
    ServerOverloaded { attempts: u32, url: String },

    /// URL could not be parsed or joined
    #[error("Invalid URL: {url} - {error}")]
    InvalidUrl { url: String, error: String },
}

impl HttpError {
    /// HTTP status carried by the error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            HttpError::Status { status, .. } => Some(*status),
            HttpError::RateLimitExceeded { .. } => Some(429),
            HttpError::ServerOverloaded { .. } => Some(503),
            HttpError::Request(e) => e.status().map(|s| s.as_u16()),
            HttpError::InvalidUrl { .. } => None,
        }
    }
}

/// Errors raised while reading a source listing or asset metadata
#[derive(Error, Debug)]
pub enum SourceError {
    /// Outbound HTTP failure
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Response body did not have the expected shape
    #[error("Malformed response from {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },

    /// Listing page parsed fine but contained no entries
    #[error("Listing page {page} from {source_name} is empty")]
    EmptyPage { source_name: String, page: u32 },

    /// Store failure while persisting listing results
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Offline fixture file could not be loaded
    #[error("Cannot load fixture {path}: {reason}")]
    Fixture { path: PathBuf, reason: String },
}

impl SourceError {
    /// Build a malformed-body error
    pub fn malformed(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}

/// Download worker errors; every variant is surfaced to the queue for retry
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Outbound HTTP failure while fetching bytes
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Metadata lookup failed
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Download did not finish in time
    #[error("Download timed out after {seconds} seconds")]
    Timeout { seconds: u64 },

    /// Document store failure
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Blob store failure
    #[error(transparent)]
    Blob(#[from] BlobError),
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Update targeted a document that does not exist
    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Create targeted a document that already exists
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// Increment produced a value JSON cannot represent (NaN or infinity)
    #[error("Field {path} in {collection}/{id} would become non-finite")]
    NonFinite {
        collection: String,
        id: String,
        path: String,
    },

    /// Dotted field path is empty or traverses a non-object value
    #[error("Invalid field path: {path}")]
    InvalidPath { path: String },

    /// Value could not be converted to or from JSON
    #[error("Document serialization failed")]
    Serialization(#[from] serde_json::Error),

    /// Snapshot file could not be read or written
    #[error("Snapshot I/O failed: {path}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Blob store errors
#[derive(Error, Debug)]
pub enum BlobError {
    /// Key is empty, absolute, or escapes the store root
    #[error("Invalid blob key: {key}")]
    InvalidKey { key: String },

    /// Filesystem failure
    #[error("Blob I/O error")]
    Io(#[from] std::io::Error),

    /// Metadata sidecar could not be encoded or decoded
    #[error("Blob metadata corrupted: {key}")]
    Metadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Temporary object could not be moved into place
    #[error("Atomic file operation failed: could not rename {temp_path} to {final_path}")]
    AtomicOperationFailed {
        temp_path: PathBuf,
        final_path: PathBuf,
    },
}

/// Task queue errors
#[derive(Error, Debug)]
pub enum QueueError {
    /// Completion reported for a task the queue does not track
    #[error("Unknown task: {task_id}")]
    UnknownTask { task_id: u64 },

    /// Queue configuration rejected
    #[error("Invalid queue configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be rendered as TOML
    #[error("Configuration could not be serialized")]
    Serialize(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Platform configuration directory is unknown
    #[error("Could not determine user config directory")]
    NoConfigDir,
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Outbound HTTP error
    #[error(transparent)]
    Http(#[from] HttpError),

    /// Source listing error
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Download error
    #[error(transparent)]
    Download(#[from] DownloadError),

    /// Document store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Blob store error
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is recoverable (transient)
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Http(e)
            | AppError::Source(SourceError::Http(e))
            | AppError::Download(DownloadError::Http(e)) => is_transient_http(e),
            AppError::Download(DownloadError::Timeout { .. })
            | AppError::Download(DownloadError::Blob(BlobError::Io(_)))
            | AppError::Blob(BlobError::Io(_)) => true,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Http(_) => "http",
            AppError::Source(_) => "source",
            AppError::Download(_) => "download",
            AppError::Store(_) => "store",
            AppError::Blob(_) => "blob",
            AppError::Queue(_) => "queue",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

fn is_transient_http(error: &HttpError) -> bool {
    match error {
        HttpError::Request(_)
        | HttpError::RateLimitExceeded { .. }
        | HttpError::ServerOverloaded { .. } => true,
        HttpError::Status { status, .. } => *status >= 500,
        HttpError::InvalidUrl { .. } => false,
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// HTTP result type alias
pub type HttpResult<T> = std::result::Result<T, HttpError>;

/// Source result type alias
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Download result type alias
pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Blob result type alias
pub type BlobResult<T> = std::result::Result<T, BlobError>;

/// Queue result type alias
pub type QueueResult<T> = std::result::Result<T, QueueError>;

/// Config result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
