//! Download stage: turns requests into responses.

use std::sync::Arc;

use log::{debug, error, trace};
use tokio::task::{JoinHandle, JoinSet};

use super::reap;
use crate::error::{CrawlerError, Origin};
use crate::pool::PoolEntity;
use crate::queue::Queue;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::CrawlContext;
use crate::state::Activity;

pub(crate) fn spawn_download_stage(
    context: Arc<CrawlContext>,
    requests: Queue<Request>,
    responses: Queue<Response>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        trace!(
            "Download stage started with {} downloaders",
            context.downloaders.total()
        );

        loop {
            tokio::select! {
                popped = requests.pop() => {
                    let Some(request) = popped else { break };
                    trace!("Received request for URL: {}", request.url());
                    let in_flight = context.state.enter(Activity::Download);
                    context.state.claim_work();
                    let task_context = Arc::clone(&context);
                    let responses = responses.clone();
                    tasks.spawn(async move {
                        let _in_flight = in_flight;
                        download(&task_context, request, &responses).await;
                    });
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(&context, result, Origin::Downloader(None));
                }
            }
        }

        trace!("Request queue closed, waiting for {} download tasks", tasks.len());
        while let Some(result) = tasks.join_next().await {
            reap(&context, result, Origin::Downloader(None));
        }
        context.downloaders.close();
        trace!("Download stage finished");
    })
}

async fn download(context: &CrawlContext, request: Request, responses: &Queue<Response>) {
    let downloader = match context.downloaders.checkout().await {
        Ok(downloader) => downloader,
        Err(e) => {
            error!("Could not borrow a downloader for {}: {}", request.url(), e);
            context.report(CrawlerError::from_origin(
                Origin::Downloader(None),
                e.to_string(),
            ));
            return;
        }
    };
    let origin = Origin::Downloader(Some(downloader.id()));

    let result = downloader.download(&request).await;
    if let Err(e) = downloader.release() {
        error!("Could not return downloader to its pool: {}", e);
        context.report(CrawlerError::from_origin(origin, e.to_string()));
    }

    match result {
        Ok(response) => {
            let response = if response.depth() == request.depth() {
                response
            } else {
                response.at_depth(request.depth())
            };
            let size = response.body().map_or(0, |body| body.len());
            context.stats.record_download(response.status(), size);
            debug!(
                "Downloaded {} ({}, {} bytes)",
                request.url(),
                response.status(),
                size
            );
            context
                .push_or_record(responses, response, &origin.code())
                .await;
        }
        Err(e) => {
            debug!("Download of {} failed: {:#}", request.url(), e);
            context.stats.increment_downloads_failed();
            context.report(CrawlerError::from_origin(
                origin,
                format!("{}: {:#}", request.url(), e),
            ));
        }
    }
}
