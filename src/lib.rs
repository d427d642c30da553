//! ranking-ingest library
//!
//! Idempotent ingestion of daily artwork rankings: listing records are
//! written per source, each listed asset is downloaded at most once into
//! content storage, and per-provider score aggregates converge under
//! at-least-once change delivery.

pub mod app;
pub mod cli;
pub mod config;
pub mod constants;
pub mod errors;
pub mod prelude;

pub use errors::{AppError, Result};
