//! # webcrawl-core
//!
//! A concurrent web-crawling engine.
//!
//! Given a seed request, the engine downloads pages, extracts further requests
//! and data items from them, and feeds the items through a processing
//! pipeline, while bounding resource usage with worker pools and bounded
//! queues, limiting crawl depth, and supporting cooperative shutdown.
//!
//! The HTTP transport, the parse functions and the item processors are
//! pluggable collaborators; see [`Downloader`], [`ParseResponse`] and
//! [`ItemProcessor`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use webcrawl_core::prelude::*;
//!
//! fn links(response: &Response, _depth: u32) -> ParseOutput {
//!     let mut output = ParseOutput::new();
//!     output.add_item(Item::new().with("url", response.url().as_str()));
//!     output
//! }
//!
//! async fn crawl() -> Result<(), EngineError> {
//!     let setup = CrawlBuilder::new()
//!         .max_depth(2)
//!         .http_downloader(reqwest::Client::new())
//!         .add_parser(links)
//!         .seed_url("https://www.example.com/")?
//!         .build();
//!
//!     let scheduler = Arc::new(Scheduler::new());
//!     scheduler.start(setup).await?;
//!     spawn_monitor(Arc::clone(&scheduler), MonitorConfig::default()).await.ok();
//!     scheduler.wait().await;
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod domain;
pub mod downloader;
pub mod error;
pub mod id;
pub mod item;
pub mod monitor;
pub mod parser;
pub mod pipeline;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod request;
pub mod response;
pub mod scheduler;
mod stages;
pub mod state;
pub mod stats;
pub mod stop_sign;

pub use builder::{CrawlBuilder, CrawlConfig, CrawlSetup};
pub use domain::DomainPolicy;
pub use downloader::{Downloader, DownloaderFactory, HttpDownloader, PageDownloader};
pub use error::{CrawlerError, EngineError, ErrorKind, Origin};
pub use id::IdGenerator;
pub use item::Item;
pub use monitor::{MonitorConfig, spawn_monitor};
pub use parser::{Analyzer, Data, ParseOutput, ParseResponse};
pub use pipeline::{ItemPipeline, ItemProcessor, PipelineSummary};
pub use pool::{Checkout, EntityPool, PoolEntity};
pub use queue::{Queue, QueueManager, QueueStatus, QueueSummary};
pub use request::Request;
pub use response::Response;
pub use scheduler::{PoolUsage, SchedSummary, Scheduler};
pub use state::CrawlerState;
pub use stats::{StatCollector, StatsSnapshot};
pub use stop_sign::{StopSign, StopSignSummary};

pub use async_trait::async_trait;
