//! Operational state of a crawl run.
//!
//! `CrawlerState` counts the units of work that are still owed somewhere in
//! the pipeline: values handed to a work queue and not yet claimed by a stage,
//! downloads in flight, responses being analyzed, items inside the item
//! pipeline and errors waiting for room on the error queue. Queues alone
//! cannot tell whether a crawl is done, because a popped request can still
//! produce more work.
//!
//! A hand-off is counted by the producer before it pushes and released by the
//! consumer only after it has entered its own activity, so there is no moment
//! between a push and the consumer's task where every counter reads zero.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Kind of work a stage is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    Download,
    Analysis,
    Item,
    Report,
}

#[derive(Debug, Default)]
pub struct CrawlerState {
    /// Values pushed onto a work queue and not yet claimed by a stage.
    pub queued_work: AtomicUsize,
    /// Requests popped by the download stage and not yet finished.
    pub in_flight_downloads: AtomicUsize,
    /// Responses popped by the analyze stage and not yet routed.
    pub analyzing_responses: AtomicUsize,
    /// Items popped by the item stage and not yet through the pipeline.
    pub processing_items: AtomicUsize,
    /// Errors waiting for room on a full error queue.
    pub pending_errors: AtomicUsize,
}

impl CrawlerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.queued_work.load(Ordering::SeqCst) == 0
            && self.in_flight_downloads.load(Ordering::SeqCst) == 0
            && self.analyzing_responses.load(Ordering::SeqCst) == 0
            && self.processing_items.load(Ordering::SeqCst) == 0
            && self.pending_errors.load(Ordering::SeqCst) == 0
    }

    fn counter(&self, activity: Activity) -> &AtomicUsize {
        match activity {
            Activity::Download => &self.in_flight_downloads,
            Activity::Analysis => &self.analyzing_responses,
            Activity::Item => &self.processing_items,
            Activity::Report => &self.pending_errors,
        }
    }

    /// Counts one unit of `activity` until the returned guard drops.
    pub(crate) fn enter(self: &Arc<Self>, activity: Activity) -> InFlight {
        self.counter(activity).fetch_add(1, Ordering::SeqCst);
        InFlight {
            state: Arc::clone(self),
            activity,
        }
    }

    /// Called by a producer right before it pushes onto a work queue.
    pub(crate) fn queue_work(&self) {
        self.queued_work.fetch_add(1, Ordering::SeqCst);
    }

    /// Called once a queued value is accounted for elsewhere: a stage has
    /// entered its activity for it, or the push failed.
    pub(crate) fn claim_work(&self) {
        let _ = self
            .queued_work
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }
}

/// Keeps one unit of work counted; moved into the task doing the work.
pub(crate) struct InFlight {
    state: Arc<CrawlerState>,
    activity: Activity,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.state.counter(self.activity).fetch_sub(1, Ordering::SeqCst);
    }
}
