//! Item processing chain.
//!
//! Every item pulled off the item queue goes through `ItemPipeline::send`,
//! which hands it to each configured `ItemProcessor` in order. A processor may
//! replace the item, pass it through untouched (`Ok(None)`), or fail. Failures
//! either stop the chain (`fail_fast`) or are collected while the remaining
//! processors still run.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{CrawlerError, Origin};
use crate::item::Item;

/// One step of the item chain.
#[async_trait]
pub trait ItemProcessor: Send + Sync + 'static {
    /// Returns the replacement item, or `None` to pass `item` through unchanged.
    async fn process(&self, item: &Item) -> anyhow::Result<Option<Item>>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<F> ItemProcessor for F
where
    F: Fn(&Item) -> anyhow::Result<Option<Item>> + Send + Sync + 'static,
{
    async fn process(&self, item: &Item) -> anyhow::Result<Option<Item>> {
        (self)(item)
    }
}

#[derive(Default)]
pub struct ItemPipeline {
    processors: Vec<Arc<dyn ItemProcessor>>,
    fail_fast: AtomicBool,
    sent: AtomicU64,
    accepted: AtomicU64,
    processed: AtomicU64,
    processing: AtomicU64,
}

impl ItemPipeline {
    pub fn new(processors: Vec<Arc<dyn ItemProcessor>>) -> Self {
        Self {
            processors,
            ..Self::default()
        }
    }

    pub fn with_fail_fast(self, fail_fast: bool) -> Self {
        self.set_fail_fast(fail_fast);
        self
    }

    pub fn fail_fast(&self) -> bool {
        self.fail_fast.load(Ordering::SeqCst)
    }

    pub fn set_fail_fast(&self, fail_fast: bool) {
        self.fail_fast.store(fail_fast, Ordering::SeqCst);
    }

    pub fn processors(&self) -> &[Arc<dyn ItemProcessor>] {
        &self.processors
    }

    /// Runs `item` through the chain and returns every failure, tagged with the
    /// pipeline origin. An item without fields is still a valid item.
    pub async fn send(&self, item: Item) -> Vec<CrawlerError> {
        let _in_flight = InFlight::enter(&self.processing);
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.accepted.fetch_add(1, Ordering::SeqCst);

        let fail_fast = self.fail_fast();
        let mut errors = Vec::new();
        let mut current = item;
        for processor in &self.processors {
            match processor.process(&current).await {
                Ok(Some(next)) => current = next,
                Ok(None) => {}
                Err(e) => {
                    debug!("Item processor '{}' failed: {:#}", processor.name(), e);
                    errors.push(CrawlerError::from_origin(
                        Origin::ItemPipeline,
                        format!("{}: {:#}", processor.name(), e),
                    ));
                    if fail_fast {
                        break;
                    }
                }
            }
        }

        self.processed.fetch_add(1, Ordering::SeqCst);
        trace!("Item finished the pipeline with {} errors", errors.len());
        errors
    }

    /// `[sent, accepted, processed]`.
    pub fn counts(&self) -> [u64; 3] {
        [
            self.sent.load(Ordering::SeqCst),
            self.accepted.load(Ordering::SeqCst),
            self.processed.load(Ordering::SeqCst),
        ]
    }

    /// Items currently inside `send`.
    pub fn processing_number(&self) -> u64 {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> PipelineSummary {
        let [sent, accepted, processed] = self.counts();
        PipelineSummary {
            fail_fast: self.fail_fast(),
            processors: self.processors.len(),
            sent,
            accepted,
            processed,
            processing: self.processing_number(),
        }
    }
}

struct InFlight<'a>(&'a AtomicU64);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicU64) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineSummary {
    pub fail_fast: bool,
    pub processors: usize,
    pub sent: u64,
    pub accepted: u64,
    pub processed: u64,
    pub processing: u64,
}

impl fmt::Display for PipelineSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fail_fast: {}, processors: {}, sent: {}, accepted: {}, processed: {}, processing: {}",
            self.fail_fast, self.processors, self.sent, self.accepted, self.processed, self.processing
        )
    }
}
