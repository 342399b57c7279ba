//! # Error Module
//!
//! Error types shared by every component of the engine.
//!
//! ## Overview
//!
//! Two families of errors exist:
//!
//! - **`EngineError`**: returned synchronously by the engine's own primitives
//!   (pools, queues, the scheduler). Setup failures abort a crawl run.
//! - **`CrawlerError`**: a per-request/per-response failure observed while the
//!   pipeline runs. These never abort the run; they are tagged with the stage
//!   that produced them and pushed onto the error queue.
//!
//! `Origin` renders the diagnostic codes (`downloader:3`, `analyzer:0`,
//! `itempipeline`) used both for error tagging and for stop-sign tallies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the engine's pools, queues and scheduler.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("entity pool is closed")]
    PoolClosed,

    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("entity type mismatch: pool holds `{expected}`, got `{found}`")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("entity {0} is not owned by this pool")]
    NotOwned(u32),

    #[error("entity {0} has already been returned to the pool")]
    AlreadyReturned(u32),

    #[error("queue manager is not initialized (status: {0})")]
    NotInitialized(String),

    #[error("queue `{0}` is closed")]
    QueueClosed(&'static str),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid host `{0}`: cannot derive a primary domain")]
    InvalidHost(String),

    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Category of a `CrawlerError`. Used for routing diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Download,
    Analyze,
    ItemProcessor,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Download => "Downloader Error",
            ErrorKind::Analyze => "Analyzer Error",
            ErrorKind::ItemProcessor => "Item Processor Error",
        };
        f.write_str(name)
    }
}

/// Stage (and pooled entity, when one was borrowed) that produced a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Downloader(Option<u32>),
    Analyzer(Option<u32>),
    ItemPipeline,
}

pub const DOWNLOADER_CODE: &str = "downloader";
pub const ANALYZER_CODE: &str = "analyzer";
pub const ITEM_PIPELINE_CODE: &str = "itempipeline";

impl Origin {
    /// The error category that failures from this origin belong to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Origin::Downloader(_) => ErrorKind::Download,
            Origin::Analyzer(_) => ErrorKind::Analyze,
            Origin::ItemPipeline => ErrorKind::ItemProcessor,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Origin::Downloader(_) => DOWNLOADER_CODE,
            Origin::Analyzer(_) => ANALYZER_CODE,
            Origin::ItemPipeline => ITEM_PIPELINE_CODE,
        }
    }

    pub fn entity_id(&self) -> Option<u32> {
        match self {
            Origin::Downloader(id) | Origin::Analyzer(id) => *id,
            Origin::ItemPipeline => None,
        }
    }

    /// Renders the diagnostic code, e.g. `downloader:3`.
    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entity_id() {
            Some(id) => write!(f, "{}:{}", self.prefix(), id),
            None => f.write_str(self.prefix()),
        }
    }
}

impl FromStr for Origin {
    type Err = EngineError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let (prefix, id) = match code.split_once(':') {
            Some((prefix, id)) => {
                let id = id.parse::<u32>().map_err(|_| {
                    EngineError::InvalidConfig(format!("malformed origin code `{}`", code))
                })?;
                (prefix, Some(id))
            }
            None => (code, None),
        };
        match prefix {
            DOWNLOADER_CODE => Ok(Origin::Downloader(id)),
            ANALYZER_CODE => Ok(Origin::Analyzer(id)),
            ITEM_PIPELINE_CODE if id.is_none() => Ok(Origin::ItemPipeline),
            _ => Err(EngineError::InvalidConfig(format!(
                "unknown origin code `{}`",
                code
            ))),
        }
    }
}

/// A failure surfaced on the error queue while the pipeline keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerError {
    kind: ErrorKind,
    origin: String,
    message: String,
}

impl CrawlerError {
    pub fn new(kind: ErrorKind, origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Builds an error whose category is derived from the producing stage.
    pub fn from_origin(origin: Origin, message: impl Into<String>) -> Self {
        Self::new(origin.kind(), origin.code(), message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Crawler Error [{}]: {}: {}",
            self.origin, self.kind, self.message
        )
    }
}

impl std::error::Error for CrawlerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_codes_render_and_parse() {
        assert_eq!(Origin::Downloader(Some(3)).code(), "downloader:3");
        assert_eq!(Origin::Analyzer(None).code(), "analyzer");
        assert_eq!(Origin::ItemPipeline.code(), "itempipeline");

        assert_eq!("analyzer:12".parse::<Origin>().unwrap(), Origin::Analyzer(Some(12)));
        assert_eq!("downloader".parse::<Origin>().unwrap(), Origin::Downloader(None));
        assert!("scheduler:1".parse::<Origin>().is_err());
        assert!("downloader:x".parse::<Origin>().is_err());
    }

    #[test]
    fn crawler_error_category_follows_origin() {
        let err = CrawlerError::from_origin(Origin::Downloader(Some(1)), "connection reset");
        assert_eq!(err.kind(), ErrorKind::Download);
        assert_eq!(err.origin(), "downloader:1");
        assert_eq!(
            err.to_string(),
            "Crawler Error [downloader:1]: Downloader Error: connection reset"
        );
    }
}
