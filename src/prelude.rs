//! A "prelude" for users of the `webcrawl-core` crate.
//!
//! Re-exports the types and traits needed to configure and run a crawl.
//!
//! # Example
//!
//! ```
//! use webcrawl_core::prelude::*;
//! ```

pub use crate::{
    // Setup and lifecycle
    CrawlBuilder,
    CrawlConfig,
    MonitorConfig,
    Scheduler,
    spawn_monitor,
    // Collaborator traits
    Downloader,
    ItemProcessor,
    ParseResponse,
    async_trait,
    // Data
    CrawlerError,
    EngineError,
    Item,
    ParseOutput,
    Request,
    Response,
};
