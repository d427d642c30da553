//! Core ingestion pipeline
//!
//! Data flows one way through these modules:
//!
//! 1. [`sources`] adapters list a source's ranking and write ranking records
//! 2. [`discovery`] turns each ranking record write into download tasks
//! 3. [`queue`] paces, retries and delivers those tasks
//! 4. [`worker`] fetches asset bytes and creates canonical records
//! 5. [`aggregate`] folds score changes on canonical records into
//!    per-provider statistics
//!
//! [`pipeline`] wires the stages together over the change feeds of a
//! [`store::DocumentStore`].

pub mod aggregate;
pub mod client;
pub mod discovery;
pub mod keys;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod sources;
pub mod store;
pub mod worker;

pub use aggregate::{AggregateMaintainer, ScoreDelta};
pub use discovery::DiscoveryTrigger;
pub use models::{AssetIdentity, AssetType, CanonicalAssetRecord, DownloadUnit, RankingRecord};
pub use pipeline::{Pipeline, Quiescence, RunSummary};
pub use store::{DocumentStore, FsBlobStore, MemoryDocumentStore};
pub use worker::DownloadWorker;
