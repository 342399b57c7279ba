//! # Scheduler Module
//!
//! Top-level orchestrator of a crawl run.
//!
//! ## Overview
//!
//! `Scheduler::start` validates a `CrawlSetup`, builds the run's components
//! (queues, the downloader and analyzer pools, the item pipeline), derives the
//! crawl's primary domain from the seed, starts the three stage loops and
//! finally seeds the request queue. From then on the pipeline runs on its own:
//!
//! ```text
//! requests -> download -> responses -> analyze -+-> requests (depth + 1)
//!                                               +-> items -> item pipeline
//! ```
//!
//! with every failure surfaced on the error queue, tagged with its origin.
//!
//! ## Key Responsibilities
//!
//! - **Lifecycle**: `start`, `stop`, `running`, `wait`; a stopped scheduler
//!   can be started again once its previous run has drained
//! - **Routing**: depth limiting, scoping and deduplication of produced
//!   requests, all checked against the `StopSign` before anything is pushed
//! - **Observation**: `idle`, `summary`, `error_queue` and `stats` for
//!   polling-based completion detection
//!
//! ## Shutdown
//!
//! `stop` raises the `StopSign` and closes the work queues. Work already
//! popped still runs to completion, but its hand-off to the next queue is
//! recorded on the `StopSign` instead of pushed. Each stage loop then waits
//! for its tasks and closes its pool; `wait` resolves once all three loops are
//! done. The error queue stays open until the next run replaces this one, so
//! failures reported before the stop can still be drained.
//!
//! A `stop` that arrives while `start` is still waiting for the previous run
//! to drain is remembered and honoured as soon as the new run is wired up.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashSet;
use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::builder::{CrawlConfig, CrawlSetup};
use crate::domain::DomainPolicy;
use crate::downloader::PageDownloader;
use crate::error::{CrawlerError, EngineError, Origin};
use crate::id::IdGenerator;
use crate::item::Item;
use crate::parser::{Analyzer, ParseResponse};
use crate::pipeline::{ItemPipeline, PipelineSummary};
use crate::pool::{EntityPool, PoolEntity};
use crate::queue::{Queue, QueueManager, QueueStatus, QueueSummary};
use crate::request::Request;
use crate::state::{Activity, CrawlerState};
use crate::stats::StatCollector;
use crate::stages;
use crate::stop_sign::{StopSign, StopSignSummary};

/// What happened to a request produced by the analyze stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestRoute {
    Enqueued,
    BeyondDepth,
    OutOfScope,
    Duplicate,
    Suppressed,
    Closed,
}

/// Everything one crawl run shares between its stages.
pub(crate) struct CrawlContext {
    pub(crate) config: CrawlConfig,
    pub(crate) policy: DomainPolicy,
    pub(crate) primary_domain: String,
    pub(crate) queues: QueueManager,
    /// Kept apart from `queues` so it stays readable after a stop.
    pub(crate) errors: Queue<CrawlerError>,
    pub(crate) downloaders: Arc<EntityPool<PageDownloader>>,
    pub(crate) analyzers: Arc<EntityPool<Analyzer>>,
    pub(crate) parsers: Vec<Arc<dyn ParseResponse>>,
    pub(crate) pipeline: ItemPipeline,
    pub(crate) stop_sign: Arc<StopSign>,
    pub(crate) seen: DashSet<String>,
    pub(crate) state: Arc<CrawlerState>,
    pub(crate) stats: Arc<StatCollector>,
}

impl CrawlContext {
    /// Builds the components of a run. Nothing is spawned and nothing is pushed.
    pub(crate) fn build(
        setup: CrawlSetup,
        stop_sign: Arc<StopSign>,
    ) -> Result<(Self, Request), EngineError> {
        setup.validate()?;
        let CrawlSetup {
            config,
            downloader_factory,
            parsers,
            item_processors,
            seed,
        } = setup;
        let factory = downloader_factory.ok_or_else(|| {
            EngineError::InvalidConfig("a crawl must have a downloader factory.".to_string())
        })?;
        let seed = seed.ok_or_else(|| {
            EngineError::InvalidConfig("a crawl must have a seed request.".to_string())
        })?;

        let policy = config.domain_policy();
        let primary_domain = match &config.primary_domain {
            Some(domain) => domain.trim_end_matches('.').to_ascii_lowercase(),
            None => {
                let host = seed
                    .host()
                    .ok_or_else(|| EngineError::InvalidHost(seed.url().to_string()))?;
                policy.primary_domain(host)?
            }
        };

        let queues = QueueManager::with_capacity(config.queue_capacity)?;
        let errors = queues.error_queue()?;
        let downloaders = EntityPool::new(config.pool_size, &IdGenerator::new(), |id| {
            PageDownloader::new(id, factory())
        })?;
        let analyzers = EntityPool::new(config.pool_size, &IdGenerator::new(), Analyzer::new)?;
        let pipeline = ItemPipeline::new(item_processors).with_fail_fast(config.fail_fast);

        let seed = if seed.depth() == 0 { seed } else { seed.with_depth(0) };
        let context = Self {
            config,
            policy,
            primary_domain,
            queues,
            errors,
            downloaders: Arc::new(downloaders),
            analyzers: Arc::new(analyzers),
            parsers,
            pipeline,
            stop_sign,
            seen: DashSet::new(),
            state: Arc::new(CrawlerState::new()),
            stats: Arc::new(StatCollector::new()),
        };
        Ok((context, seed))
    }

    /// Puts a failure on the error queue without ever waiting for room.
    ///
    /// When the queue is full the error is handed to a task that waits for
    /// room instead, so the calling stage keeps going and nothing is lost.
    /// Those pending pushes count as work for `idle`.
    pub(crate) fn report(&self, error: CrawlerError) {
        if self.stop_sign.signaled() {
            self.stop_sign.record(error.origin());
            return;
        }
        let origin = error.origin().to_string();
        match self.errors.try_push(error) {
            Ok(None) => self.stats.increment_errors_reported(),
            Ok(Some(error)) => {
                debug!("Error queue full, deferring error from {}", origin);
                let pending = self.state.enter(Activity::Report);
                let errors = self.errors.clone();
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    let _pending = pending;
                    match errors.push(error).await {
                        Ok(()) => stats.increment_errors_reported(),
                        Err(e) => {
                            warn!("Dropping error from {}: {}", origin, e);
                            stats.increment_errors_dropped();
                        }
                    }
                });
            }
            Err(e) => {
                warn!("Dropping error from {}: {}", origin, e);
                self.stats.increment_errors_dropped();
            }
        }
    }

    /// Pushes `value` unless the stop sign is raised, in which case the push
    /// is recorded against `code` instead.
    pub(crate) async fn push_or_record<T>(&self, queue: &Queue<T>, value: T, code: &str) -> bool {
        if self.stop_sign.signaled() {
            self.stop_sign.record(code);
            trace!("Stop sign raised, suppressed push to {} from {}", queue.name(), code);
            return false;
        }
        self.state.queue_work();
        match queue.push(value).await {
            Ok(()) => true,
            Err(e) => {
                self.state.claim_work();
                // Only a stop closes the queues, so this push counts as suppressed.
                self.stop_sign.record(code);
                debug!("Push from {} failed: {}", code, e);
                false
            }
        }
    }

    /// Decides the fate of a request produced while analyzing a response and
    /// enqueues it if it survives.
    pub(crate) async fn route_request(
        &self,
        request: Request,
        origin: Origin,
        queue: &Queue<Request>,
    ) -> RequestRoute {
        let max_depth = self.config.max_depth;
        if max_depth > 0 && request.depth() > max_depth {
            trace!(
                "Dropping {}: depth {} beyond limit {}",
                request.url(),
                request.depth(),
                max_depth
            );
            self.stats.increment_requests_beyond_depth();
            return RequestRoute::BeyondDepth;
        }

        if self.config.same_domain_only && !self.in_scope(&request) {
            debug!("Dropping {}: outside {}", request.url(), self.primary_domain);
            self.stats.increment_requests_out_of_scope();
            return RequestRoute::OutOfScope;
        }

        let code = origin.code();
        if self.stop_sign.signaled() {
            self.stop_sign.record(&code);
            return RequestRoute::Suppressed;
        }

        if !self.seen.insert(request.dedup_key()) {
            trace!("Dropping duplicate request {}", request.url());
            self.stats.increment_requests_duplicate();
            return RequestRoute::Duplicate;
        }

        if self.push_or_record(queue, request, &code).await {
            self.stats.increment_requests_enqueued();
            RequestRoute::Enqueued
        } else if self.stop_sign.signaled() {
            RequestRoute::Suppressed
        } else {
            RequestRoute::Closed
        }
    }

    pub(crate) async fn route_item(&self, item: Item, origin: Origin, queue: &Queue<Item>) -> bool {
        let pushed = self.push_or_record(queue, item, &origin.code()).await;
        if pushed {
            self.stats.increment_items_scraped();
        }
        pushed
    }

    fn in_scope(&self, request: &Request) -> bool {
        request
            .host()
            .and_then(|host| self.policy.primary_domain(host).ok())
            .is_some_and(|domain| domain == self.primary_domain)
    }

    fn idle(&self) -> bool {
        self.queues.work_queues_empty()
            && self.downloaders.used() == 0
            && self.analyzers.used() == 0
            && self.state.is_idle()
    }
}

/// Checked-out versus total entities of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolUsage {
    pub used: u32,
    pub total: u32,
}

impl<E: PoolEntity> From<&EntityPool<E>> for PoolUsage {
    fn from(pool: &EntityPool<E>) -> Self {
        Self {
            used: pool.used(),
            total: pool.total(),
        }
    }
}

impl fmt::Display for PoolUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.used, self.total)
    }
}

/// A comparable snapshot of a scheduler, for polling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchedSummary {
    pub prefix: String,
    pub running: bool,
    pub primary_domain: Option<String>,
    pub max_depth: u32,
    pub queues: QueueSummary,
    pub downloaders: PoolUsage,
    pub analyzers: PoolUsage,
    pub pipeline: PipelineSummary,
    pub seen_urls: usize,
    pub stop_sign: StopSignSummary,
}

impl SchedSummary {
    /// Equality ignoring the prefix.
    pub fn same(&self, other: &SchedSummary) -> bool {
        self.running == other.running
            && self.primary_domain == other.primary_domain
            && self.max_depth == other.max_depth
            && self.queues == other.queues
            && self.downloaders == other.downloaders
            && self.analyzers == other.analyzers
            && self.pipeline == other.pipeline
            && self.seen_urls == other.seen_urls
            && self.stop_sign == other.stop_sign
    }

    /// Multi-line rendering, one component per line.
    pub fn detail(&self) -> String {
        let p = &self.prefix;
        format!(
            "{p}running: {}\n\
             {p}primary domain: {}\n\
             {p}max depth: {}\n\
             {p}queues: {}\n\
             {p}downloaders: {}\n\
             {p}analyzers: {}\n\
             {p}item pipeline: {}\n\
             {p}seen urls: {}\n\
             {p}stop sign: {}\n",
            self.running,
            self.primary_domain.as_deref().unwrap_or("-"),
            self.max_depth,
            self.queues,
            self.downloaders,
            self.analyzers,
            self.pipeline,
            self.seen_urls,
            self.stop_sign,
        )
    }
}

impl fmt::Display for SchedSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}running: {}, domain: {}, depth: {}, queues: [{}], downloaders: {}, analyzers: {}, pipeline: [{}], seen: {}, stop: [{}]",
            self.prefix,
            self.running,
            self.primary_domain.as_deref().unwrap_or("-"),
            self.max_depth,
            self.queues,
            self.downloaders,
            self.analyzers,
            self.pipeline,
            self.seen_urls,
            self.stop_sign,
        )
    }
}

/// Start/stop bookkeeping, guarded by one lock so the two never interleave.
#[derive(Debug, Default)]
struct Lifecycle {
    /// `start` is waiting for the previous run or building the next one.
    starting: bool,
    /// `stop` was called while `starting`.
    stop_pending: bool,
}

pub struct Scheduler {
    running: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
    stop_sign: Arc<StopSign>,
    run: RwLock<Option<Arc<CrawlContext>>>,
    stage_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle::default()),
            stop_sign: Arc::new(StopSign::new()),
            run: RwLock::new(None),
            stage_handles: Mutex::new(Vec::new()),
        }
    }

    /// Starts a crawl run.
    ///
    /// Fails with `AlreadyRunning` while a previous run has not been stopped,
    /// with `InvalidConfig` for an incomplete setup and with `InvalidHost`
    /// when no primary domain can be derived from the seed. A failed start
    /// leaves the scheduler stopped. A `stop` issued while this call is still
    /// in progress stops the new run before any work is queued.
    pub async fn start(&self, setup: CrawlSetup) -> Result<(), EngineError> {
        {
            let mut lifecycle = self.lifecycle.lock();
            if self.running.load(Ordering::SeqCst) {
                return Err(EngineError::AlreadyRunning);
            }
            self.running.store(true, Ordering::SeqCst);
            *lifecycle = Lifecycle {
                starting: true,
                stop_pending: false,
            };
        }

        match self.launch(setup).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Crawl failed to start: {}", e);
                let mut lifecycle = self.lifecycle.lock();
                *lifecycle = Lifecycle::default();
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn launch(&self, setup: CrawlSetup) -> Result<(), EngineError> {
        setup.validate()?;
        // A previous run must have drained before the stop sign is reused.
        self.wait().await;

        let (context, seed) = CrawlContext::build(setup, Arc::clone(&self.stop_sign))?;
        let context = Arc::new(context);
        let requests = context.queues.request_queue()?;
        let responses = context.queues.response_queue()?;
        let items = context.queues.item_queue()?;

        {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.starting = false;
            if std::mem::take(&mut lifecycle.stop_pending) {
                self.stop_sign.raise();
                self.running.store(false, Ordering::SeqCst);
                info!("Crawl stopped before it started");
                return Ok(());
            }

            self.stop_sign.reset();
            let handles = vec![
                stages::spawn_download_stage(Arc::clone(&context), requests.clone(), responses.clone()),
                stages::spawn_analyze_stage(Arc::clone(&context), responses, requests.clone(), items.clone()),
                stages::spawn_item_stage(Arc::clone(&context), items),
            ];
            self.stage_handles.lock().extend(handles);
            if let Some(previous) = self.run.write().replace(Arc::clone(&context)) {
                previous.errors.close();
            }
        }

        info!(
            "Crawl started: seed {}, primary domain {}, max depth {}, pool size {}, queue capacity {}",
            seed.url(),
            context.primary_domain,
            context.config.max_depth,
            context.config.pool_size,
            context.config.queue_capacity
        );

        context.seen.insert(seed.dedup_key());
        context.state.queue_work();
        if let Err(e) = requests.push(seed).await {
            context.state.claim_work();
            if self.stop_sign.signaled() {
                debug!("Crawl stopped before its seed was queued");
                return Ok(());
            }
            return Err(e);
        }
        context.stats.increment_requests_enqueued();
        Ok(())
    }

    /// Raises the stop sign and closes the work queues. Returns `true` only
    /// for the call that actually stopped (or will stop) the crawl.
    pub fn stop(&self) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        if lifecycle.starting {
            if lifecycle.stop_pending {
                return false;
            }
            lifecycle.stop_pending = true;
            info!("Stop requested while the crawl is starting");
            return true;
        }
        if !self.stop_sign.raise() {
            return false;
        }
        if let Some(context) = self.run.read().as_ref() {
            context.queues.close_work_queues();
        }
        self.running.store(false, Ordering::SeqCst);
        info!("Crawl stopped");
        true
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether no work is queued, borrowed or in flight.
    pub fn idle(&self) -> bool {
        match self.run.read().as_ref() {
            Some(context) => context.idle(),
            None => true,
        }
    }

    /// Waits until the stage loops of the current run have finished.
    ///
    /// The loops only finish after `stop`.
    pub async fn wait(&self) {
        let handles = std::mem::take(&mut *self.stage_handles.lock());
        if handles.is_empty() {
            return;
        }
        trace!("Waiting for {} stage loops to finish", handles.len());
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("A stage loop failed: {:?}", e);
            }
        }
        debug!("All stage loops finished");
    }

    /// The error queue of the current (or last) run. It stays readable after
    /// `stop` until the next run replaces it.
    pub fn error_queue(&self) -> Result<Queue<CrawlerError>, EngineError> {
        match self.run.read().as_ref() {
            Some(context) => Ok(context.errors.clone()),
            None => Err(EngineError::NotInitialized(QueueStatus::Uninitialized.to_string())),
        }
    }

    pub fn stop_sign(&self) -> &StopSign {
        &self.stop_sign
    }

    /// Statistics of the current (or last) run.
    pub fn stats(&self) -> Option<Arc<StatCollector>> {
        self.run
            .read()
            .as_ref()
            .map(|context| Arc::clone(&context.stats))
    }

    pub fn summary(&self, prefix: &str) -> SchedSummary {
        let run = self.run.read();
        match run.as_ref() {
            Some(context) => SchedSummary {
                prefix: prefix.to_string(),
                running: self.running(),
                primary_domain: Some(context.primary_domain.clone()),
                max_depth: context.config.max_depth,
                queues: context.queues.summary(),
                downloaders: PoolUsage::from(context.downloaders.as_ref()),
                analyzers: PoolUsage::from(context.analyzers.as_ref()),
                pipeline: context.pipeline.summary(),
                seen_urls: context.seen.len(),
                stop_sign: self.stop_sign.summary(),
            },
            None => SchedSummary {
                prefix: prefix.to_string(),
                running: self.running(),
                primary_domain: None,
                max_depth: 0,
                queues: QueueManager::new().summary(),
                downloaders: PoolUsage::default(),
                analyzers: PoolUsage::default(),
                pipeline: ItemPipeline::default().summary(),
                seen_urls: 0,
                stop_sign: self.stop_sign.summary(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CrawlBuilder;
    use crate::downloader::Downloader;
    use crate::parser::ParseOutput;
    use crate::response::Response;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Clone)]
    struct Echo;

    #[async_trait]
    impl Downloader for Echo {
        async fn download(&self, request: &Request) -> anyhow::Result<Response> {
            Ok(Response::new(request.clone(), 200, Some("<html/>".into())))
        }
    }

    fn two_links_and_an_item(response: &Response, _depth: u32) -> ParseOutput {
        let mut output = ParseOutput::new();
        output.add_request(Request::new(response.url().join("/a").unwrap()));
        output.add_request(Request::new(response.url().join("/b").unwrap()));
        output.add_item(Item::new().with("url", response.url().as_str()));
        output
    }

    /// Holds its downloader for a while before answering.
    #[derive(Clone)]
    struct Slow(Duration);

    #[async_trait]
    impl Downloader for Slow {
        async fn download(&self, request: &Request) -> anyhow::Result<Response> {
            tokio::time::sleep(self.0).await;
            Ok(Response::new(request.clone(), 200, Some("<html/>".into())))
        }
    }

    fn nothing(_response: &Response, _depth: u32) -> ParseOutput {
        ParseOutput::new()
    }

    fn slow_setup() -> CrawlSetup {
        CrawlBuilder::new()
            .queue_capacity(4)
            .pool_size(1)
            .downloader(Slow(Duration::from_millis(400)))
            .add_parser(nothing)
            .seed_url("http://www.example.com/")
            .unwrap()
            .build()
    }

    fn setup(seed: &str) -> CrawlBuilder {
        CrawlBuilder::new()
            .queue_capacity(16)
            .pool_size(2)
            .downloader(Echo)
            .add_parser(two_links_and_an_item)
            .seed_url(seed)
            .unwrap()
    }

    fn context(builder: CrawlBuilder) -> (CrawlContext, Request) {
        CrawlContext::build(builder.build(), Arc::new(StopSign::new())).unwrap()
    }

    #[test]
    fn primary_domain_comes_from_seed_or_override() {
        let (ctx, seed) = context(setup("http://www.example.com/"));
        assert_eq!(ctx.primary_domain, "example.com");
        assert_eq!(seed.depth(), 0);

        let (ctx, _) = context(setup("http://news.sina.com.cn/").primary_domain("Sina.COM.cn"));
        assert_eq!(ctx.primary_domain, "sina.com.cn");

        let result = CrawlContext::build(
            setup("http://10.0.0.1/").build(),
            Arc::new(StopSign::new()),
        );
        assert!(matches!(result, Err(EngineError::InvalidHost(_))));
    }

    #[test]
    fn seed_scheme_is_opaque_but_a_host_is_needed_for_the_domain() {
        let (ctx, seed) = context(setup("s3://bucket.example.com/key"));
        assert_eq!(ctx.primary_domain, "example.com");
        assert_eq!(seed.url().scheme(), "s3");

        let hostless = CrawlContext::build(
            setup("mailto:someone@example.com").build(),
            Arc::new(StopSign::new()),
        );
        assert!(matches!(hostless, Err(EngineError::InvalidHost(_))));

        let (ctx, _) = context(setup("mailto:someone@example.com").primary_domain("example.com"));
        assert_eq!(ctx.primary_domain, "example.com");
    }

    #[tokio::test]
    async fn analysis_pass_routes_requests_and_items() {
        let (ctx, seed) = context(setup("http://www.example.com/"));
        let ctx = Arc::new(ctx);
        ctx.seen.insert(seed.dedup_key());
        let requests = ctx.queues.request_queue().unwrap();
        let items = ctx.queues.item_queue().unwrap();

        let response = Response::new(seed, 200, Some("<html/>".into()));
        stages::analyze_response(&ctx, response.clone(), &requests, &items).await;

        assert_eq!(requests.len(), 2);
        assert_eq!(items.len(), 1);
        for _ in 0..2 {
            assert_eq!(requests.try_pop().unwrap().depth(), 1);
        }
        assert_eq!(ctx.analyzers.used(), 0);

        // The same links again are all duplicates.
        stages::analyze_response(&ctx, response, &requests, &items).await;
        assert_eq!(requests.len(), 0);
        assert_eq!(items.len(), 2);
        assert_eq!(ctx.stats.snapshot().requests_duplicate, 2);

        let item = items.try_pop().unwrap();
        assert!(ctx.pipeline.send(item).await.is_empty());
        assert_eq!(ctx.pipeline.counts()[0], 1);
    }

    #[tokio::test]
    async fn requests_beyond_max_depth_are_dropped() {
        let (ctx, _) = context(setup("http://www.example.com/").max_depth(1));
        let requests = ctx.queues.request_queue().unwrap();
        let origin = Origin::Analyzer(Some(0));

        let at = |path: &str, depth: u32| {
            Request::parse(&format!("http://www.example.com{}", path))
                .unwrap()
                .with_depth(depth)
        };
        assert_eq!(ctx.route_request(at("/one", 1), origin, &requests).await, RequestRoute::Enqueued);
        assert_eq!(ctx.route_request(at("/two", 2), origin, &requests).await, RequestRoute::BeyondDepth);
        assert_eq!(ctx.route_request(at("/one#top", 1), origin, &requests).await, RequestRoute::Duplicate);
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn any_scheme_and_empty_items_are_routed() {
        let (ctx, _) = context(setup("http://www.example.com/").same_domain_only(true));
        let requests = ctx.queues.request_queue().unwrap();
        let items = ctx.queues.item_queue().unwrap();
        let origin = Origin::Analyzer(Some(3));

        let ftp = Request::parse("ftp://www.example.com/file").unwrap();
        assert_eq!(ctx.route_request(ftp, origin, &requests).await, RequestRoute::Enqueued);

        let foreign = Request::parse("http://www.example.org/").unwrap();
        assert_eq!(ctx.route_request(foreign, origin, &requests).await, RequestRoute::OutOfScope);
        let hostless = Request::parse("mailto:someone@example.com").unwrap();
        assert_eq!(ctx.route_request(hostless, origin, &requests).await, RequestRoute::OutOfScope);
        let sibling = Request::parse("http://img.example.com/").unwrap();
        assert_eq!(ctx.route_request(sibling, origin, &requests).await, RequestRoute::Enqueued);
        assert_eq!(requests.len(), 2);

        assert!(ctx.route_item(Item::new(), origin, &items).await);
        assert_eq!(items.len(), 1);
        assert!(ctx.errors.is_empty());
    }

    #[tokio::test]
    async fn raised_stop_sign_records_instead_of_pushing() {
        let (ctx, _) = context(setup("http://www.example.com/"));
        let requests = ctx.queues.request_queue().unwrap();
        let items = ctx.queues.item_queue().unwrap();
        ctx.stop_sign.raise();

        let origin = Origin::Analyzer(Some(1));
        let request = Request::parse("http://www.example.com/x").unwrap().with_depth(1);
        assert_eq!(ctx.route_request(request, origin, &requests).await, RequestRoute::Suppressed);
        assert!(!ctx.route_item(Item::new().with("k", 1), origin, &items).await);
        ctx.report(CrawlerError::from_origin(Origin::Downloader(Some(0)), "late"));

        assert!(requests.is_empty() && items.is_empty());
        assert_eq!(ctx.stop_sign.count_for("analyzer:1"), 2);
        assert_eq!(ctx.stop_sign.count_for("downloader:0"), 1);
    }

    #[tokio::test]
    async fn full_error_queue_defers_instead_of_dropping() {
        let (ctx, _) = context(setup("http://www.example.com/").queue_capacity(1));
        ctx.report(CrawlerError::from_origin(Origin::ItemPipeline, "first"));
        ctx.report(CrawlerError::from_origin(Origin::ItemPipeline, "second"));
        ctx.report(CrawlerError::from_origin(Origin::ItemPipeline, "third"));

        assert_eq!(ctx.stats.snapshot().errors_reported, 1);
        assert!(!ctx.state.is_idle());

        let mut messages = Vec::new();
        for _ in 0..3 {
            let error = timeout(Duration::from_secs(1), ctx.errors.pop())
                .await
                .unwrap()
                .unwrap();
            messages.push(error.message().to_string());
        }
        messages.sort();
        assert_eq!(messages, ["first", "second", "third"]);

        timeout(Duration::from_secs(1), async {
            while !ctx.state.is_idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let snapshot = ctx.stats.snapshot();
        assert_eq!(snapshot.errors_reported, 3);
        assert_eq!(snapshot.errors_dropped, 0);
    }

    #[tokio::test]
    async fn start_rejects_bad_setups_and_stays_stopped() {
        let scheduler = Scheduler::new();
        let no_parsers = CrawlBuilder::new()
            .downloader(Echo)
            .seed_url("http://www.example.com/")
            .unwrap()
            .build();
        assert!(matches!(
            scheduler.start(no_parsers).await,
            Err(EngineError::InvalidConfig(_))
        ));
        assert!(!scheduler.running());

        let bad_host = setup("http://localhost/").build();
        assert!(matches!(scheduler.start(bad_host).await, Err(EngineError::InvalidHost(_))));
        assert!(!scheduler.running());
        assert!(scheduler.error_queue().is_err());
        assert!(!scheduler.stop());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_is_idempotent_and_restart_works() {
        let scheduler = Scheduler::new();
        let quiet = || {
            CrawlBuilder::new()
                .queue_capacity(4)
                .pool_size(1)
                .downloader(Echo)
                .add_parser(nothing)
                .seed_url("http://www.example.com/")
                .unwrap()
                .build()
        };

        scheduler.start(quiet()).await.unwrap();
        assert!(scheduler.running());
        assert!(matches!(
            scheduler.start(quiet()).await,
            Err(EngineError::AlreadyRunning)
        ));

        timeout(Duration::from_secs(5), async {
            while !scheduler.idle() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let summary = scheduler.summary("  ");
        assert_eq!(summary.primary_domain.as_deref(), Some("example.com"));
        assert_eq!(summary.seen_urls, 1);
        assert!(summary.same(&scheduler.summary("")));
        assert!(summary.detail().starts_with("  running: true\n"));

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.running());
        assert!(scheduler.stop_sign().signaled());
        assert!(scheduler.error_queue().unwrap().is_empty());
        timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();

        scheduler.start(quiet()).await.unwrap();
        assert!(scheduler.running());
        assert!(!scheduler.stop_sign().signaled());
        assert!(scheduler.stop());
        timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_during_restart_is_not_lost() {
        let scheduler = Arc::new(Scheduler::new());
        scheduler.start(slow_setup()).await.unwrap();
        timeout(Duration::from_secs(5), async {
            while scheduler.summary("").downloaders.used == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(scheduler.stop());

        // The restart waits for the first run's download to finish.
        let restart = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.start(slow_setup()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.running());
        assert!(scheduler.stop());
        assert!(!scheduler.stop());

        timeout(Duration::from_secs(5), restart)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!scheduler.running());
        assert!(scheduler.stop_sign().signaled());
        assert!(!scheduler.stop());
        timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();

        // A later start is unaffected.
        scheduler.start(slow_setup()).await.unwrap();
        assert!(scheduler.running());
        assert!(!scheduler.stop_sign().signaled());
        assert!(scheduler.stop());
        timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();
    }
}
