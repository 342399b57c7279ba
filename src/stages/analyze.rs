//! Analyze stage: turns responses into new requests, items and errors.

use std::sync::Arc;

use log::{debug, error, info, trace};
use tokio::task::{JoinHandle, JoinSet};

use super::reap;
use crate::error::{CrawlerError, Origin};
use crate::item::Item;
use crate::parser::Data;
use crate::pool::PoolEntity;
use crate::queue::Queue;
use crate::request::Request;
use crate::response::Response;
use crate::scheduler::{CrawlContext, RequestRoute};
use crate::state::Activity;

pub(crate) fn spawn_analyze_stage(
    context: Arc<CrawlContext>,
    responses: Queue<Response>,
    requests: Queue<Request>,
    items: Queue<Item>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        trace!(
            "Analyze stage started with {} analyzers and {} parsers",
            context.analyzers.total(),
            context.parsers.len()
        );

        loop {
            tokio::select! {
                popped = responses.pop() => {
                    let Some(response) = popped else { break };
                    trace!("Received response for analysis from URL: {}", response.url());
                    let in_flight = context.state.enter(Activity::Analysis);
                    context.state.claim_work();
                    let task_context = Arc::clone(&context);
                    let requests = requests.clone();
                    let items = items.clone();
                    tasks.spawn(async move {
                        let _in_flight = in_flight;
                        analyze_response(&task_context, response, &requests, &items).await;
                    });
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(&context, result, Origin::Analyzer(None));
                }
            }
        }

        trace!("Response queue closed, waiting for {} analyze tasks", tasks.len());
        while let Some(result) = tasks.join_next().await {
            reap(&context, result, Origin::Analyzer(None));
        }
        context.analyzers.close();
        trace!("Analyze stage finished");
    })
}

/// Runs the parsers over one response and routes everything they produced.
pub(crate) async fn analyze_response(
    context: &CrawlContext,
    response: Response,
    requests: &Queue<Request>,
    items: &Queue<Item>,
) {
    let analyzer = match context.analyzers.checkout().await {
        Ok(analyzer) => analyzer,
        Err(e) => {
            error!("Could not borrow an analyzer for {}: {}", response.url(), e);
            context.report(CrawlerError::from_origin(Origin::Analyzer(None), e.to_string()));
            return;
        }
    };
    let origin = Origin::Analyzer(Some(analyzer.id()));

    let output = analyzer.analyze(&context.parsers, &response).await;
    if let Err(e) = analyzer.release() {
        error!("Could not return analyzer to its pool: {}", e);
        context.report(CrawlerError::from_origin(origin, e.to_string()));
    }
    context.stats.increment_responses_analyzed();

    let (data, errors) = output.into_parts();
    let total = data.len();
    let mut enqueued = 0;
    let mut scraped = 0;
    for datum in data {
        match datum {
            Data::Request(request) => {
                if context.route_request(request, origin, requests).await == RequestRoute::Enqueued {
                    enqueued += 1;
                }
            }
            Data::Item(item) => {
                if context.route_item(item, origin, items).await {
                    scraped += 1;
                }
            }
        }
    }

    if total > 0 {
        info!(
            "Analyzed {}: {} of {} produced data routed ({} requests, {} items)",
            response.url(),
            enqueued + scraped,
            total,
            enqueued,
            scraped
        );
    }

    for e in errors {
        debug!("Parse error on {}: {:#}", response.url(), e);
        context.report(CrawlerError::from_origin(
            origin,
            format!("{}: {:#}", response.url(), e),
        ));
    }
}
