//! # Queue Manager Module
//!
//! Owns the four bounded queues that connect the pipeline stages.
//!
//! ## Overview
//!
//! Stages never share mutable state directly; everything that crosses a stage
//! boundary travels through one of these queues:
//!
//! - **requests**: requests waiting to be downloaded
//! - **responses**: downloaded pages waiting to be analyzed
//! - **items**: extracted items waiting for the item pipeline
//! - **errors**: tagged failures for the caller to observe
//!
//! Every queue is a bounded `kanal` channel. A full queue parks its producer,
//! which is how backpressure propagates upstream. The `QueueManager` ties the
//! four together behind one lifecycle (`uninitialized → initialized →
//! closed`), so no stage can observe a partially initialized set. Closing is
//! an explicit terminal transition: pushes fail and parked pops return `None`.

use std::fmt;

use kanal::{AsyncReceiver, AsyncSender};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{CrawlerError, EngineError};
use crate::item::Item;
use crate::request::Request;
use crate::response::Response;

/// Lifecycle state of a `QueueManager`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Uninitialized,
    Initialized,
    Closed,
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueStatus::Uninitialized => "uninitialized",
            QueueStatus::Initialized => "initialized",
            QueueStatus::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A FIFO, bounded, closable queue handle. Clones share the same queue.
pub struct Queue<T> {
    name: &'static str,
    tx: AsyncSender<T>,
    rx: AsyncReceiver<T>,
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<T> Queue<T> {
    pub(crate) fn bounded(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = kanal::bounded_async(capacity);
        Self { name, tx, rx }
    }

    /// Pushes a value, waiting while the queue is full.
    pub async fn push(&self, value: T) -> Result<(), EngineError> {
        self.tx
            .send(value)
            .await
            .map_err(|_| EngineError::QueueClosed(self.name))
    }

    /// Pushes without waiting. A full queue hands the value back as `Ok(Some(value))`.
    pub fn try_push(&self, value: T) -> Result<Option<T>, EngineError> {
        let mut slot = Some(value);
        match self.tx.try_send_option(&mut slot) {
            Ok(true) => Ok(None),
            Ok(false) => Ok(slot),
            Err(_) => Err(EngineError::QueueClosed(self.name)),
        }
    }

    /// Pops the oldest value, waiting while empty. `None` once the queue is closed.
    pub async fn pop(&self) -> Option<T> {
        self.rx.recv().await.ok()
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok().flatten()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn close(&self) {
        let _ = self.tx.close();
    }

    fn usage(&self) -> QueueUsage {
        QueueUsage {
            len: self.len(),
            capacity: self.capacity(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QueueUsage {
    pub len: usize,
    pub capacity: usize,
}

impl fmt::Display for QueueUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.len, self.capacity)
    }
}

/// Point-in-time view of the queue manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub status: QueueStatus,
    pub requests: QueueUsage,
    pub responses: QueueUsage,
    pub items: QueueUsage,
    pub errors: QueueUsage,
}

impl fmt::Display for QueueSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status: {}, requests: {}, responses: {}, items: {}, errors: {}",
            self.status, self.requests, self.responses, self.items, self.errors
        )
    }
}

struct Queues {
    requests: Queue<Request>,
    responses: Queue<Response>,
    items: Queue<Item>,
    errors: Queue<CrawlerError>,
}

impl Queues {
    fn allocate(capacity: usize) -> Self {
        Self {
            requests: Queue::bounded("requests", capacity),
            responses: Queue::bounded("responses", capacity),
            items: Queue::bounded("items", capacity),
            errors: Queue::bounded("errors", capacity),
        }
    }

    fn close_work(&self) {
        self.requests.close();
        self.responses.close();
        self.items.close();
    }

    fn close(&self) {
        self.close_work();
        self.errors.close();
    }
}

struct Inner {
    status: QueueStatus,
    capacity: usize,
    queues: Option<Queues>,
}

pub struct QueueManager {
    inner: RwLock<Inner>,
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueManager {
    /// Creates an uninitialized manager.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                status: QueueStatus::Uninitialized,
                capacity: 0,
                queues: None,
            }),
        }
    }

    /// Creates a manager and initializes it with `capacity`.
    pub fn with_capacity(capacity: usize) -> Result<Self, EngineError> {
        let manager = Self::new();
        if !manager.init(capacity, true) {
            return Err(EngineError::InvalidConfig(
                "queue capacity must be greater than 0.".to_string(),
            ));
        }
        Ok(manager)
    }

    /// Allocates the four queues.
    ///
    /// Returns `false` without touching state when `capacity` is 0, when the
    /// manager is already initialized and `reset` is false, or when it has
    /// been closed.
    pub fn init(&self, capacity: usize, reset: bool) -> bool {
        if capacity == 0 {
            return false;
        }
        let mut inner = self.inner.write();
        match inner.status {
            QueueStatus::Closed => return false,
            QueueStatus::Initialized if !reset => return false,
            _ => {}
        }
        if let Some(old) = inner.queues.take() {
            debug!("Resetting queue manager, closing previous queues");
            old.close();
        }
        inner.queues = Some(Queues::allocate(capacity));
        inner.capacity = capacity;
        inner.status = QueueStatus::Initialized;
        info!("Queue manager initialized with capacity {}", capacity);
        true
    }

    /// Closes every queue. Returns `false` unless the manager was initialized.
    pub fn close(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.status != QueueStatus::Initialized {
            return false;
        }
        if let Some(queues) = inner.queues.as_ref() {
            queues.close();
        }
        inner.status = QueueStatus::Closed;
        info!("Queue manager closed");
        true
    }

    /// Closes the request, response and item queues but leaves the error
    /// queue open, so failures already reported can still be drained through
    /// a handle taken before. Returns `false` unless the manager was
    /// initialized.
    pub fn close_work_queues(&self) -> bool {
        let mut inner = self.inner.write();
        if inner.status != QueueStatus::Initialized {
            return false;
        }
        if let Some(queues) = inner.queues.as_ref() {
            queues.close_work();
        }
        inner.status = QueueStatus::Closed;
        info!("Queue manager closed, error queue left open for draining");
        true
    }

    fn with_queues<T>(&self, pick: impl FnOnce(&Queues) -> T) -> Result<T, EngineError> {
        let inner = self.inner.read();
        match (&inner.status, inner.queues.as_ref()) {
            (QueueStatus::Initialized, Some(queues)) => Ok(pick(queues)),
            (status, _) => Err(EngineError::NotInitialized(status.to_string())),
        }
    }

    pub fn request_queue(&self) -> Result<Queue<Request>, EngineError> {
        self.with_queues(|q| q.requests.clone())
    }

    pub fn response_queue(&self) -> Result<Queue<Response>, EngineError> {
        self.with_queues(|q| q.responses.clone())
    }

    pub fn item_queue(&self) -> Result<Queue<Item>, EngineError> {
        self.with_queues(|q| q.items.clone())
    }

    pub fn error_queue(&self) -> Result<Queue<CrawlerError>, EngineError> {
        self.with_queues(|q| q.errors.clone())
    }

    pub fn status(&self) -> QueueStatus {
        self.inner.read().status
    }

    pub fn capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// Whether the request, response and item queues are all empty.
    ///
    /// The error queue is drained by the caller and does not count as pending work.
    pub fn work_queues_empty(&self) -> bool {
        let inner = self.inner.read();
        match inner.queues.as_ref() {
            Some(q) => q.requests.is_empty() && q.responses.is_empty() && q.items.is_empty(),
            None => true,
        }
    }

    pub fn summary(&self) -> QueueSummary {
        let inner = self.inner.read();
        let empty = QueueUsage {
            len: 0,
            capacity: 0,
        };
        match inner.queues.as_ref() {
            Some(q) => QueueSummary {
                status: inner.status,
                requests: q.requests.usage(),
                responses: q.responses.usage(),
                items: q.items.usage(),
                errors: q.errors.usage(),
            },
            None => QueueSummary {
                status: inner.status,
                requests: empty,
                responses: empty,
                items: empty,
                errors: empty,
            },
        }
    }
}
