//! # Builder Module
//!
//! Provides `CrawlConfig` and the `CrawlBuilder`, a fluent API for assembling
//! everything one crawl run needs.
//!
//! ## Overview
//!
//! A run is described by plain settings (`CrawlConfig`, loadable from JSON)
//! plus the pluggable collaborators: a downloader factory, parse functions,
//! item processors and the seed request. `CrawlBuilder` gathers them into a
//! `CrawlSetup`, which `Scheduler::start` validates and consumes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use webcrawl_core::prelude::*;
//!
//! let setup = CrawlBuilder::new()
//!     .queue_capacity(64)
//!     .pool_size(4)
//!     .max_depth(2)
//!     .http_downloader(reqwest::Client::new())
//!     .add_parser(extract_links)
//!     .add_item_processor(print_item)
//!     .seed_url("https://www.example.com/")?
//!     .build();
//!
//! let scheduler = Scheduler::new();
//! scheduler.start(setup).await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::DomainPolicy;
use crate::downloader::{Downloader, DownloaderFactory, HttpDownloader};
use crate::error::EngineError;
use crate::parser::ParseResponse;
use crate::pipeline::ItemProcessor;
use crate::request::Request;

/// Settings for one crawl run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlConfig {
    /// Capacity of each of the four work queues.
    pub queue_capacity: usize,
    /// Number of downloaders and of analyzers; also bounds concurrent item processing.
    pub pool_size: u32,
    /// Deepest request depth that is still crawled. 0 means unlimited.
    pub max_depth: u32,
    /// Stop an item's processor chain at its first failure.
    pub fail_fast: bool,
    /// Drop produced requests outside the seed's primary domain.
    pub same_domain_only: bool,
    /// Top-level labels under which the primary domain keeps three labels.
    pub three_label_tlds: Vec<String>,
    /// Use this primary domain instead of deriving it from the seed host.
    pub primary_domain: Option<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        CrawlConfig {
            queue_capacity: 1000,
            pool_size: num_cpus::get().clamp(4, 16) as u32,
            max_depth: 0,
            fail_fast: false,
            same_domain_only: false,
            three_label_tlds: vec!["cn".to_string()],
            primary_domain: None,
        }
    }
}

impl CrawlConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn domain_policy(&self) -> DomainPolicy {
        DomainPolicy::new(&self.three_label_tlds)
    }
}

/// Everything `Scheduler::start` needs for one run.
pub struct CrawlSetup {
    pub(crate) config: CrawlConfig,
    pub(crate) downloader_factory: Option<DownloaderFactory>,
    pub(crate) parsers: Vec<Arc<dyn ParseResponse>>,
    pub(crate) item_processors: Vec<Arc<dyn ItemProcessor>>,
    pub(crate) seed: Option<Request>,
}

impl CrawlSetup {
    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Checks the setup without building anything.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.config.queue_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "queue_capacity must be greater than 0.".to_string(),
            ));
        }
        if self.config.pool_size == 0 {
            return Err(EngineError::InvalidConfig(
                "pool_size must be greater than 0.".to_string(),
            ));
        }
        if self.downloader_factory.is_none() {
            return Err(EngineError::InvalidConfig(
                "a crawl must have a downloader factory.".to_string(),
            ));
        }
        if self.parsers.is_empty() {
            return Err(EngineError::InvalidConfig(
                "a crawl must have at least one parse function.".to_string(),
            ));
        }
        if self.seed.is_none() {
            return Err(EngineError::InvalidConfig(
                "a crawl must have a seed request.".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CrawlBuilder {
    config: CrawlConfig,
    downloader_factory: Option<DownloaderFactory>,
    parsers: Vec<Arc<dyn ParseResponse>>,
    item_processors: Vec<Arc<dyn ItemProcessor>>,
    seed: Option<Request>,
}

impl CrawlBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously loaded settings.
    pub fn with_config(config: CrawlConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn pool_size(mut self, size: u32) -> Self {
        self.config.pool_size = size;
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.config.max_depth = depth;
        self
    }

    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.config.fail_fast = fail_fast;
        self
    }

    pub fn same_domain_only(mut self, enabled: bool) -> Self {
        self.config.same_domain_only = enabled;
        self
    }

    pub fn three_label_tlds<I, S>(mut self, tlds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.three_label_tlds = tlds.into_iter().map(Into::into).collect();
        self
    }

    pub fn primary_domain(mut self, domain: impl Into<String>) -> Self {
        self.config.primary_domain = Some(domain.into());
        self
    }

    /// Sets the factory called once per downloader pool slot.
    pub fn downloader_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Downloader> + Send + Sync + 'static,
    {
        self.downloader_factory = Some(Arc::new(factory));
        self
    }

    /// Fills every pool slot with a clone of `downloader`.
    pub fn downloader<D>(self, downloader: D) -> Self
    where
        D: Downloader + Clone,
    {
        self.downloader_factory(move || Box::new(downloader.clone()) as Box<dyn Downloader>)
    }

    pub fn http_downloader(mut self, client: reqwest::Client) -> Self {
        self.downloader_factory = Some(HttpDownloader::factory(client));
        self
    }

    pub fn add_parser<P>(mut self, parser: P) -> Self
    where
        P: ParseResponse,
    {
        self.parsers.push(Arc::new(parser));
        self
    }

    pub fn add_item_processor<P>(mut self, processor: P) -> Self
    where
        P: ItemProcessor,
    {
        self.item_processors.push(Arc::new(processor));
        self
    }

    pub fn seed(mut self, request: Request) -> Self {
        self.seed = Some(request);
        self
    }

    pub fn seed_url(self, url: &str) -> Result<Self, EngineError> {
        Ok(self.seed(Request::parse(url)?))
    }

    pub fn build(self) -> CrawlSetup {
        CrawlSetup {
            config: self.config,
            downloader_factory: self.downloader_factory,
            parsers: self.parsers,
            item_processors: self.item_processors,
            seed: self.seed,
        }
    }
}
