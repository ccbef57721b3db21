//! Run statistics.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters of one stage, or of a whole run when merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Records fetched and mapped.
    #[serde(default)]
    pub processed: u64,
    #[serde(default)]
    pub inserted: u64,
    #[serde(default)]
    pub updated: u64,
    /// Not newer than the stored row, or collapsed as an in-page duplicate.
    #[serde(default)]
    pub skipped: u64,
    /// Per-record write failures.
    #[serde(default)]
    pub failed: u64,
    /// Records of a matched collection without a canonical id.
    #[serde(default)]
    pub unmatched: u64,
    /// Items the source returned without a usable id.
    #[serde(default)]
    pub dropped: u64,
    /// Pages committed.
    #[serde(default)]
    pub pages: u64,
}

impl StageCounts {
    /// Create zeroed counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add another set of counts.
    pub fn merge(&mut self, other: &StageCounts) {
        self.processed += other.processed;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.unmatched += other.unmatched;
        self.dropped += other.dropped;
        self.pages += other.pages;
    }

    /// Rows actually changed.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    /// Whether any record failed or was dropped by the source.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.dropped > 0
    }
}

/// Thread-safe accumulator for the pages committed by the current process.
///
/// Concurrent stages record into one tracker; the checkpoint keeps the
/// authoritative per-stage counts.
#[derive(Debug)]
pub struct RunTracker {
    processed: AtomicU64,
    inserted: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    unmatched: AtomicU64,
    dropped: AtomicU64,
    pages: AtomicU64,
    start_time: Instant,
}

impl Default for RunTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RunTracker {
    /// Create a new tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            inserted: AtomicU64::new(0),
            updated: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            unmatched: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            pages: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one committed page.
    pub fn record_page(&self, counts: &StageCounts) {
        self.processed.fetch_add(counts.processed, Ordering::SeqCst);
        self.inserted.fetch_add(counts.inserted, Ordering::SeqCst);
        self.updated.fetch_add(counts.updated, Ordering::SeqCst);
        self.skipped.fetch_add(counts.skipped, Ordering::SeqCst);
        self.failed.fetch_add(counts.failed, Ordering::SeqCst);
        self.unmatched.fetch_add(counts.unmatched, Ordering::SeqCst);
        self.dropped.fetch_add(counts.dropped, Ordering::SeqCst);
        self.pages.fetch_add(counts.pages, Ordering::SeqCst);
    }

    /// Elapsed time since the tracker was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current counts.
    #[must_use]
    pub fn snapshot(&self) -> StageCounts {
        StageCounts {
            processed: self.processed.load(Ordering::SeqCst),
            inserted: self.inserted.load(Ordering::SeqCst),
            updated: self.updated.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            unmatched: self.unmatched.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            pages: self.pages.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn page(inserted: u64, skipped: u64) -> StageCounts {
        StageCounts {
            processed: inserted + skipped,
            inserted,
            skipped,
            pages: 1,
            ..StageCounts::default()
        }
    }

    #[test]
    fn test_stage_counts_merge() {
        let mut total = StageCounts::new();
        total.merge(&page(3, 1));
        total.merge(&page(2, 0));

        assert_eq!(total.processed, 6);
        assert_eq!(total.inserted, 5);
        assert_eq!(total.skipped, 1);
        assert_eq!(total.pages, 2);
        assert_eq!(total.written(), 5);
        assert!(!total.has_failures());
    }

    #[test]
    fn test_dropped_items_count_as_failures() {
        let mut total = StageCounts::new();
        total.merge(&StageCounts {
            processed: 1,
            inserted: 1,
            dropped: 2,
            pages: 1,
            ..StageCounts::default()
        });

        assert_eq!(total.dropped, 2);
        assert!(total.has_failures());
    }

    #[test]
    fn test_stage_counts_deserialize_partial() {
        let counts: StageCounts = serde_json::from_str(r#"{"processed": 4}"#).unwrap();
        assert_eq!(counts.processed, 4);
        assert_eq!(counts.pages, 0);
        assert_eq!(counts.dropped, 0);
    }

    #[tokio::test]
    async fn test_tracker_concurrent_pages() {
        let tracker = Arc::new(RunTracker::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.record_page(&page(10, 0)) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.inserted, 80);
        assert_eq!(snapshot.pages, 8);
    }
}
