//! # Stages Module
//!
//! The three stage loops of a crawl run.
//!
//! ## Overview
//!
//! Every stage follows the same shape: pop from its input queue until the
//! queue is closed, spawn one task per unit of work into a `JoinSet`, and on
//! exit wait for those tasks before releasing its resources. A task that
//! panics is caught at the `JoinSet` boundary and reported on the error queue
//! under the stage's origin, so a faulty collaborator never silently takes a
//! stage down.
//!
//! - **download**: requests -> responses, borrowing a `PageDownloader`
//! - **analyze**: responses -> requests and items, borrowing an `Analyzer`
//! - **item**: items -> `ItemPipeline`, bounded by a semaphore

mod analyze;
mod download;
mod item;

pub(crate) use analyze::spawn_analyze_stage;
#[cfg(test)]
pub(crate) use analyze::analyze_response;
pub(crate) use download::spawn_download_stage;
pub(crate) use item::spawn_item_stage;

use log::{error, trace};
use tokio::task::JoinError;

use crate::error::{CrawlerError, Origin};
use crate::scheduler::CrawlContext;

/// Logs the outcome of a finished stage task and reports panics.
fn reap(context: &CrawlContext, result: Result<(), JoinError>, origin: Origin) {
    match result {
        Ok(()) => trace!("{} task completed", origin.prefix()),
        Err(e) => {
            error!("A {} task failed: {:?}", origin.prefix(), e);
            context.report(CrawlerError::from_origin(
                origin,
                format!("task aborted: {}", e),
            ));
        }
    }
}
