//! Storage abstractions for documents and blobs
//!
//! The pipeline talks to its persistence layer exclusively through the
//! [`DocumentStore`] and [`BlobStore`] traits. The document store offers the
//! primitives the ingestion flow depends on:
//!
//! - keyed upsert (`Set`, optionally merging)
//! - dotted-path field updates
//! - field-level atomic increments that create the document if needed
//! - atomic multi-document batches via [`DocumentStore::commit`]
//! - create-if-absent for idempotent record creation
//! - per-collection change notifications with before/after images
//!
//! # Example
//!
//! ```rust,no_run
//! use ranking_ingest::app::store::{DocumentStore, DocumentWrite, MemoryDocumentStore, Query};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryDocumentStore::new();
//! let data = json!({"status": "pending", "type": "danbooru", "sourceId": 7});
//! store
//!     .commit(vec![DocumentWrite::set("images", "danbooru%2F7%2Ejpg", data.as_object().cloned().unwrap_or_default())])
//!     .await?;
//!
//! let found = store
//!     .exists("images", Query::new().where_eq("type", "danbooru").where_eq("sourceId", 7))
//!     .await?;
//! assert!(found);
//! # Ok(())
//! # }
//! ```

pub mod blob;
pub mod feed;
pub mod memory;
pub mod query;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::app::models::Fields;
use crate::errors::{BlobResult, StoreError, StoreResult};

pub use blob::FsBlobStore;
pub use feed::{BacklogGauge, ChangeEvent, ChangeFeed, ChangeKind, ChangeSender, DeliveryRetry};
pub use memory::MemoryDocumentStore;
pub use query::{get_path, FieldFilter, FilterOp, Query};

/// A stored document
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    /// Deserialize the body into a typed record
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<T> {
        decode_fields(&self.data)
    }
}

/// Serialize a record into a document body
pub fn to_fields<T: Serialize>(value: &T) -> StoreResult<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(StoreError::Serialization(<serde_json::Error as serde::ser::Error>::custom(
            "document body must serialize to a JSON object",
        ))),
    }
}

/// Deserialize a document body into a typed record
pub fn decode_fields<T: DeserializeOwned>(data: &Fields) -> StoreResult<T> {
    Ok(serde_json::from_value(Value::Object(data.clone()))?)
}

/// Numeric amount for an atomic increment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Increment {
    Int(i64),
    Float(f64),
}

/// Mutation applied to one document inside a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the body, or deep-merge it into the existing one
    Set { data: Fields, merge: bool },
    /// Insert a new document; the whole batch fails if it already exists
    Create { data: Fields },
    /// Set (`Some`) or remove (`None`) dotted paths on an existing document
    Update { fields: Vec<(String, Option<Value>)> },
    /// Add to numeric fields; missing fields and documents start at zero
    Increment { deltas: Vec<(String, Increment)> },
    /// Remove the document; a no-op if it does not exist
    Delete,
}

/// One write inside an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentWrite {
    pub collection: String,
    pub id: String,
    pub op: WriteOp,
    /// Dotted paths set to the commit time
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    fn new(collection: impl Into<String>, id: impl Into<String>, op: WriteOp) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
            op,
            server_timestamps: Vec::new(),
        }
    }

    pub fn set(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        Self::new(collection, id, WriteOp::Set { data, merge: false })
    }

    pub fn create(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        Self::new(collection, id, WriteOp::Create { data })
    }

    pub fn merge(collection: impl Into<String>, id: impl Into<String>, data: Fields) -> Self {
        Self::new(collection, id, WriteOp::Set { data, merge: true })
    }

    pub fn update(
        collection: impl Into<String>,
        id: impl Into<String>,
        fields: Vec<(String, Option<Value>)>,
    ) -> Self {
        Self::new(collection, id, WriteOp::Update { fields })
    }

    pub fn increment(
        collection: impl Into<String>,
        id: impl Into<String>,
        deltas: Vec<(String, Increment)>,
    ) -> Self {
        Self::new(collection, id, WriteOp::Increment { deltas })
    }

    pub fn delete(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::new(collection, id, WriteOp::Delete)
    }

    /// Stamp `path` with the commit time
    pub fn with_server_timestamp(mut self, path: impl Into<String>) -> Self {
        self.server_timestamps.push(path.into());
        self
    }
}

/// Result of [`DocumentStore::create_if_absent`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// This call created the document
    Created(Document),
    /// A document already existed; it is returned untouched
    Existing(Document),
}

impl CreateOutcome {
    pub fn was_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }

    pub fn document(&self) -> &Document {
        match self {
            CreateOutcome::Created(doc) | CreateOutcome::Existing(doc) => doc,
        }
    }
}

/// Schemaless document store with change notifications
#[async_trait]
pub trait DocumentStore: Send + Sync + fmt::Debug {
    /// Fetch one document by id
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// All documents matching `query`, ordered by id
    async fn query(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>>;

    /// Apply every write or none of them
    async fn commit(&self, writes: Vec<DocumentWrite>) -> StoreResult<()>;

    /// Create `collection/id` unless it already exists, atomically
    async fn create_if_absent(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
        server_timestamps: &[&str],
    ) -> StoreResult<CreateOutcome>;

    /// Subscribe to changes in one collection
    fn subscribe(&self, collection: &str) -> ChangeFeed;

    /// Whether at least one document matches `query`
    async fn exists(&self, collection: &str, query: Query) -> StoreResult<bool> {
        let query = query.limit(1);
        Ok(!self.query(collection, &query).await?.is_empty())
    }
}

/// Metadata recorded for every stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobObject {
    pub key: String,
    pub content_type: String,
    pub size: u64,
    pub md5: String,
}

/// Content store keyed by deterministic path-like strings
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Store `bytes` under `key`; rewriting identical content is a no-op
    async fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> BlobResult<BlobObject>;

    /// Metadata for `key`, if stored
    async fn head(&self, key: &str) -> BlobResult<Option<BlobObject>>;

    /// Public URL for `key`
    fn url_for(&self, key: &str) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::models::{AssetIdentity, AssetType, CanonicalAssetRecord};

    #[test]
    fn test_to_fields_rejects_scalars() {
        assert!(to_fields(&42).is_err());
        assert!(to_fields(&vec![1, 2]).is_err());
    }

    #[test]
    fn test_record_round_trip_through_fields() {
        let identity = AssetIdentity::new(AssetType::Danbooru, 7, None);
        let record = CanonicalAssetRecord::pending(
            identity,
            "2024-05-01",
            "https://cdn.donmai.us/original/aa/bb/7.jpg",
            identity.storage_key(".jpg"),
        );

        let fields = to_fields(&record).unwrap();
        let doc = Document {
            id: record.document_id(),
            data: fields,
        };
        let decoded: CanonicalAssetRecord = doc.decode().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_write_builders() {
        let write = DocumentWrite::increment(
            "score_stats",
            "providerA",
            vec![("count".to_string(), Increment::Int(1))],
        )
        .with_server_timestamp("updatedAt");

        assert_eq!(write.collection, "score_stats");
        assert_eq!(write.server_timestamps, vec!["updatedAt".to_string()]);
        assert!(matches!(write.op, WriteOp::Increment { .. }));
    }
}
