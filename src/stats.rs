//! # Statistics Module
//!
//! Counters describing what a crawl run did.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every stage of a run and updated with
//! atomic operations only, so recording a metric never contends with the
//! pipeline itself. Reporting goes through a `StatsSnapshot`, which is the
//! single source for the JSON export and the `Display` report.
//!
//! ## Key Metrics Tracked
//!
//! - **Requests**: enqueued, and dropped as duplicate, beyond the depth limit
//!   or out of the crawl's domain
//! - **Downloads**: succeeded, failed, bytes and status code distribution
//! - **Analysis**: responses analyzed and items scraped
//! - **Items**: items that completed the item pipeline
//! - **Errors**: errors delivered to the error queue and errors dropped
//!   because their run's error queue was closed before they got in

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

use crate::error::EngineError;

/// A consistent copy of the counters, used for reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub requests_enqueued: usize,
    pub requests_duplicate: usize,
    pub requests_beyond_depth: usize,
    pub requests_out_of_scope: usize,
    pub downloads_succeeded: usize,
    pub downloads_failed: usize,
    pub bytes_downloaded: usize,
    pub status_counts: BTreeMap<u16, usize>,
    pub responses_analyzed: usize,
    pub items_scraped: usize,
    pub items_processed: usize,
    pub errors_reported: usize,
    pub errors_dropped: usize,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    fn per_second(&self, count: usize) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { count as f64 / secs } else { 0.0 }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        let bytes = self.bytes_downloaded;
        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

/// Collects statistics about one crawl run.
#[derive(Debug)]
pub struct StatCollector {
    start_time: Instant,
    requests_enqueued: AtomicUsize,
    requests_duplicate: AtomicUsize,
    requests_beyond_depth: AtomicUsize,
    requests_out_of_scope: AtomicUsize,
    downloads_succeeded: AtomicUsize,
    downloads_failed: AtomicUsize,
    bytes_downloaded: AtomicUsize,
    status_counts: DashMap<u16, usize>,
    responses_analyzed: AtomicUsize,
    items_scraped: AtomicUsize,
    items_processed: AtomicUsize,
    errors_reported: AtomicUsize,
    errors_dropped: AtomicUsize,
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            requests_duplicate: AtomicUsize::new(0),
            requests_beyond_depth: AtomicUsize::new(0),
            requests_out_of_scope: AtomicUsize::new(0),
            downloads_succeeded: AtomicUsize::new(0),
            downloads_failed: AtomicUsize::new(0),
            bytes_downloaded: AtomicUsize::new(0),
            status_counts: DashMap::new(),
            responses_analyzed: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_processed: AtomicUsize::new(0),
            errors_reported: AtomicUsize::new(0),
            errors_dropped: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            requests_duplicate: self.requests_duplicate.load(Ordering::SeqCst),
            requests_beyond_depth: self.requests_beyond_depth.load(Ordering::SeqCst),
            requests_out_of_scope: self.requests_out_of_scope.load(Ordering::SeqCst),
            downloads_succeeded: self.downloads_succeeded.load(Ordering::SeqCst),
            downloads_failed: self.downloads_failed.load(Ordering::SeqCst),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::SeqCst),
            status_counts: self
                .status_counts
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
            responses_analyzed: self.responses_analyzed.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_processed: self.items_processed.load(Ordering::SeqCst),
            errors_reported: self.errors_reported.load(Ordering::SeqCst),
            errors_dropped: self.errors_dropped.load(Ordering::SeqCst),
            elapsed: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_duplicate(&self) {
        self.requests_duplicate.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_beyond_depth(&self) {
        self.requests_beyond_depth.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_out_of_scope(&self) {
        self.requests_out_of_scope.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a finished download with its status code and body size.
    pub(crate) fn record_download(&self, status: u16, bytes: usize) {
        self.downloads_succeeded.fetch_add(1, Ordering::SeqCst);
        self.bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
        *self.status_counts.entry(status).or_insert(0) += 1;
    }

    pub(crate) fn increment_downloads_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_responses_analyzed(&self) {
        self.responses_analyzed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_scraped(&self) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_processed(&self) {
        self.items_processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_errors_reported(&self) {
        self.errors_reported.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_errors_dropped(&self) {
        self.errors_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn to_json_string(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, EngineError> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }
}

impl fmt::Display for StatCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration  : {:?}", snapshot.elapsed)?;
        writeln!(
            f,
            "  speed     : download/s: {:.2}, item/s: {:.2}",
            snapshot.per_second(snapshot.downloads_succeeded),
            snapshot.per_second(snapshot.items_scraped)
        )?;
        writeln!(
            f,
            "  requests  : enqueued: {}, duplicate: {}, too deep: {}, out of scope: {}",
            snapshot.requests_enqueued,
            snapshot.requests_duplicate,
            snapshot.requests_beyond_depth,
            snapshot.requests_out_of_scope
        )?;
        writeln!(
            f,
            "  downloads : ok: {}, fail: {}, downloaded: {}",
            snapshot.downloads_succeeded,
            snapshot.downloads_failed,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  items     : analyzed responses: {}, scraped: {}, processed: {}",
            snapshot.responses_analyzed, snapshot.items_scraped, snapshot.items_processed
        )?;
        writeln!(
            f,
            "  errors    : reported: {}, dropped: {}",
            snapshot.errors_reported, snapshot.errors_dropped
        )?;

        let status_string = if snapshot.status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot
                .status_counts
                .iter()
                .map(|(code, count)| format!("{}: {}", code, count))
                .collect::<Vec<String>>()
                .join(", ")
        };

        writeln!(f, "  status    : {}\n", status_string)
    }
}
