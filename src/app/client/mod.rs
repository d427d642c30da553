//! Shared HTTP plumbing for source clients
//!
//! - `config`: client settings and reqwest client construction
//! - `http`: rate-limited GET with bounded retries

pub mod config;
pub mod http;

pub use config::ClientConfig;
pub use http::{parse_url, HttpHandler, RetryPolicy};
