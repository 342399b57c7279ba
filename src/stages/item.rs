//! Item stage: feeds extracted items through the `ItemPipeline`.

use std::sync::Arc;

use log::{debug, trace, warn};
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};

use super::reap;
use crate::error::Origin;
use crate::item::Item;
use crate::queue::Queue;
use crate::scheduler::CrawlContext;
use crate::state::Activity;

pub(crate) fn spawn_item_stage(context: Arc<CrawlContext>, items: Queue<Item>) -> JoinHandle<()> {
    let max_concurrent = context.config.pool_size as usize;
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        trace!("Item stage started with max concurrency {}", max_concurrent);

        loop {
            tokio::select! {
                popped = items.pop() => {
                    let Some(item) = popped else { break };
                    trace!("Received item for processing");
                    let in_flight = context.state.enter(Activity::Item);
                    context.state.claim_work();
                    let permit = match Arc::clone(&semaphore).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!("Semaphore closed, shutting down item stage.");
                            break;
                        }
                    };

                    let task_context = Arc::clone(&context);
                    tasks.spawn(async move {
                        let _in_flight = in_flight;
                        let errors = task_context.pipeline.send(item).await;
                        task_context.stats.increment_items_processed();
                        if !errors.is_empty() {
                            debug!("Item pipeline returned {} errors", errors.len());
                        }
                        for error in errors {
                            task_context.report(error);
                        }
                        drop(permit);
                    });
                }
                Some(result) = tasks.join_next(), if !tasks.is_empty() => {
                    reap(&context, result, Origin::ItemPipeline);
                }
            }
        }

        trace!("Item queue closed, waiting for {} item tasks", tasks.len());
        while let Some(result) = tasks.join_next().await {
            reap(&context, result, Origin::ItemPipeline);
        }
        trace!("Item stage finished");
    })
}
