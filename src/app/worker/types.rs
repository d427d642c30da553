//! Worker outcome and statistics types

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Why a unit was permanently skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Source returned no original URL for the asset
    NoDownloadUrl,
    /// Unit names a page the post does not have
    PageOutOfRange { page: u32, available: usize },
    /// File extension outside the supported image set
    UnsupportedExtension(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoDownloadUrl => f.write_str("no download URL"),
            SkipReason::PageOutOfRange { page, available } => {
                write!(f, "page {} out of range ({} available)", page, available)
            }
            SkipReason::UnsupportedExtension(ext) if ext.is_empty() => {
                f.write_str("missing file extension")
            }
            SkipReason::UnsupportedExtension(ext) => write!(f, "unsupported extension {}", ext),
        }
    }
}

/// Successful result of handling one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum WorkOutcome {
    /// Bytes stored and canonical record created by this delivery
    Downloaded { key: String },
    /// A canonical record already existed
    AlreadyPresent,
    /// Permanent skip; the queue must not retry
    Skipped { reason: SkipReason },
}

impl fmt::Display for WorkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkOutcome::Downloaded { key } => write!(f, "downloaded {}", key),
            WorkOutcome::AlreadyPresent => f.write_str("already present"),
            WorkOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
        }
    }
}

/// Running counters for one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    downloaded: AtomicU64,
    already_present: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    bytes_downloaded: AtomicU64,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a successful delivery
    pub fn record(&self, outcome: &WorkOutcome) {
        let counter = match outcome {
            WorkOutcome::Downloaded { .. } => &self.downloaded,
            WorkOutcome::AlreadyPresent => &self.already_present,
            WorkOutcome::Skipped { .. } => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            downloaded: self.downloaded.load(Ordering::Relaxed),
            already_present: self.already_present.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub downloaded: u64,
    pub already_present: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_downloaded: u64,
}

impl WorkerStatsSnapshot {
    /// Deliveries that ended in success, skips included
    pub fn handled(&self) -> u64 {
        self.downloaded + self.already_present + self.skipped
    }

    /// Combine counters across sources
    pub fn merge(&self, other: &WorkerStatsSnapshot) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            downloaded: self.downloaded + other.downloaded,
            already_present: self.already_present + other.already_present,
            skipped: self.skipped + other.skipped,
            failed: self.failed + other.failed,
            bytes_downloaded: self.bytes_downloaded + other.bytes_downloaded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            WorkOutcome::Downloaded {
                key: "pixiv/42_p0.png".to_string()
            }
            .to_string(),
            "downloaded pixiv/42_p0.png"
        );
        assert_eq!(
            WorkOutcome::Skipped {
                reason: SkipReason::UnsupportedExtension(".zip".to_string())
            }
            .to_string(),
            "skipped: unsupported extension .zip"
        );
    }

    #[test]
    fn test_stats_counters() {
        let stats = WorkerStats::new();
        stats.record(&WorkOutcome::AlreadyPresent);
        stats.record(&WorkOutcome::Skipped {
            reason: SkipReason::NoDownloadUrl,
        });
        stats.record_failure();
        stats.add_bytes(10);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.handled(), 2);
        assert_eq!(snapshot.failed, 1);

        let total = snapshot.merge(&snapshot);
        assert_eq!(total.bytes_downloaded, 20);
    }
}
