//! Download worker
//!
//! The worker is the queue's [`TaskHandler`](crate::app::queue::TaskHandler)
//! for one source. It turns a [`DownloadUnit`](crate::app::models::DownloadUnit)
//! into a stored blob plus a canonical `images` record, and is safe to run
//! any number of times for the same unit.
//!
//! # Outcomes
//!
//! - [`WorkOutcome::Downloaded`]: this delivery created the canonical record
//! - [`WorkOutcome::AlreadyPresent`]: the record existed, nothing was fetched
//!   or a concurrent delivery won the create
//! - [`WorkOutcome::Skipped`]: permanent problem such as a missing URL or an
//!   unsupported extension; the queue completes the task without retrying
//!
//! Any `Err` goes back to the queue for a retry with backoff.

pub mod core;
pub mod types;

#[cfg(test)]
mod tests;

pub use core::{asset_exists, DownloadWorker};
pub use types::{SkipReason, WorkOutcome, WorkerStats, WorkerStatsSnapshot};
