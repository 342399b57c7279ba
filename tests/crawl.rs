use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use webcrawl_core::prelude::*;

/// An in-memory site: path -> one link per line.
#[derive(Clone)]
struct Site {
    pages: Arc<HashMap<&'static str, &'static str>>,
    delay: Duration,
}

impl Site {
    fn new(pages: &[(&'static str, &'static str)]) -> Self {
        Self {
            pages: Arc::new(pages.iter().copied().collect()),
            delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Downloader for Site {
    async fn download(&self, request: &Request) -> anyhow::Result<Response> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.pages.get(request.url().path()) {
            Some(body) => Ok(Response::new(request.clone(), 200, Some(body.as_bytes().to_vec().into()))),
            None => anyhow::bail!("no page at {}", request.url()),
        }
    }
}

fn links_and_page(response: &Response, depth: u32) -> ParseOutput {
    let mut output = ParseOutput::new();
    for line in response.text().unwrap_or_default().lines() {
        match response.url().join(line.trim()) {
            Ok(url) => output.add_request(Request::new(url)),
            Err(e) => output.add_error(e),
        }
    }
    output.add_item(
        Item::new()
            .with("url", response.url().as_str())
            .with("depth", depth),
    );
    output
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(20),
        max_idle_count: 5,
        ..MonitorConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crawls_an_in_memory_site_to_completion() {
    init_tracing();
    let site = Site::new(&[
        ("/", "/a\n/b\nhttp://www.other.org/x"),
        ("/a", "/\n/c"),
        ("/b", "/missing\n/a#top"),
        ("/c", "/d"),
        ("/d", ""),
    ]);
    let collected = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&collected);

    let setup = CrawlBuilder::new()
        .queue_capacity(8)
        .pool_size(2)
        .max_depth(2)
        .same_domain_only(true)
        .downloader(site)
        .add_parser(links_and_page)
        .add_item_processor(move |item: &Item| -> anyhow::Result<Option<Item>> {
            sink.lock().push(item.clone());
            Ok(None)
        })
        .seed_url("http://www.example.com/")
        .unwrap()
        .build();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.start(setup).await.unwrap();
    timeout(Duration::from_secs(10), spawn_monitor(Arc::clone(&scheduler), monitor_config()))
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();

    assert!(!scheduler.running());
    let mut urls: Vec<String> = collected
        .lock()
        .iter()
        .map(|item| item.get("url").and_then(|v| v.as_str()).unwrap_or_default().to_string())
        .collect();
    urls.sort();
    assert_eq!(
        urls,
        [
            "http://www.example.com/",
            "http://www.example.com/a",
            "http://www.example.com/b",
            "http://www.example.com/c",
        ]
    );

    let stats = scheduler.stats().unwrap().snapshot();
    assert_eq!(stats.requests_enqueued, 5);
    assert_eq!(stats.requests_duplicate, 2);
    assert_eq!(stats.requests_beyond_depth, 1);
    assert_eq!(stats.requests_out_of_scope, 1);
    assert_eq!(stats.downloads_succeeded, 4);
    assert_eq!(stats.downloads_failed, 1);
    assert_eq!(stats.errors_reported, 1);

    let summary = scheduler.summary("");
    assert_eq!(summary.primary_domain.as_deref(), Some("example.com"));
    assert_eq!(summary.pipeline.sent, 4);
    assert_eq!(summary.pipeline.accepted, 4);
    assert_eq!(summary.downloaders.used, 0);
    assert_eq!(summary.analyzers.used, 0);
    assert_eq!(summary.seen_urls, 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_suppresses_in_flight_hand_offs() {
    init_tracing();
    let site = Site::new(&[("/", "/a")]).slow(Duration::from_millis(200));
    let setup = CrawlBuilder::new()
        .queue_capacity(4)
        .pool_size(1)
        .downloader(site)
        .add_parser(links_and_page)
        .seed_url("http://www.example.com/")
        .unwrap()
        .build();

    let scheduler = Scheduler::new();
    scheduler.start(setup).await.unwrap();
    timeout(Duration::from_secs(5), async {
        while scheduler.summary("").downloaders.used == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();

    let stop_sign = scheduler.stop_sign();
    assert!(stop_sign.signaled());
    assert_eq!(stop_sign.count_for("downloader:0"), 1);
    assert_eq!(stop_sign.total_count(), 1);

    let summary = scheduler.summary("");
    assert_eq!(summary.pipeline.sent, 0);
    assert_eq!(summary.downloaders.used, 0);
    assert!(scheduler.error_queue().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_parser_is_reported_and_pool_recovers() {
    init_tracing();
    fn explode(_response: &Response, _depth: u32) -> ParseOutput {
        panic!("parser bug");
    }

    let setup = CrawlBuilder::new()
        .queue_capacity(4)
        .pool_size(1)
        .downloader(Site::new(&[("/", "")]))
        .add_parser(explode)
        .seed_url("http://www.example.com/")
        .unwrap()
        .build();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.start(setup).await.unwrap();
    let errors = scheduler.error_queue().unwrap();
    let error = timeout(Duration::from_secs(5), errors.pop()).await.unwrap().unwrap();
    assert_eq!(error.kind(), webcrawl_core::ErrorKind::Analyze);
    assert_eq!(error.origin(), "analyzer");

    timeout(Duration::from_secs(5), async {
        while !scheduler.idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(scheduler.summary("").analyzers.used, 0);
    assert!(scheduler.stop());
    timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn errors_outlive_a_full_queue_and_a_stop() {
    init_tracing();
    let site = Site::new(&[("/", "/x\n/y\n/z")]);
    let setup = CrawlBuilder::new()
        .queue_capacity(1)
        .pool_size(1)
        .downloader(site)
        .add_parser(links_and_page)
        .seed_url("http://www.example.com/")
        .unwrap()
        .build();

    let scheduler = Scheduler::new();
    scheduler.start(setup).await.unwrap();

    // Nobody reads the error queue while the three downloads fail.
    timeout(Duration::from_secs(5), async {
        while scheduler.stats().unwrap().snapshot().downloads_failed < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!scheduler.idle());

    assert!(scheduler.stop());
    let errors = scheduler.error_queue().unwrap();
    let mut failed = Vec::new();
    for _ in 0..3 {
        let error = timeout(Duration::from_secs(2), errors.pop()).await.unwrap().unwrap();
        assert_eq!(error.kind(), webcrawl_core::ErrorKind::Download);
        failed.push(error.message().split(": ").next().unwrap_or_default().to_string());
    }
    failed.sort();
    assert_eq!(
        failed,
        [
            "http://www.example.com/x",
            "http://www.example.com/y",
            "http://www.example.com/z",
        ]
    );

    timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();
    let stats = scheduler.stats().unwrap().snapshot();
    assert_eq!(stats.downloads_failed, 3);
    assert_eq!(stats.errors_dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn custom_scheme_seed_and_empty_items_reach_the_pipeline() {
    init_tracing();
    fn bare_item(_response: &Response, _depth: u32) -> ParseOutput {
        let mut output = ParseOutput::new();
        output.add_item(Item::new());
        output
    }

    let calls = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let setup = CrawlBuilder::new()
        .queue_capacity(4)
        .pool_size(1)
        .downloader(Site::new(&[("/key", "")]))
        .add_parser(bare_item)
        .add_item_processor(move |item: &Item| -> anyhow::Result<Option<Item>> {
            sink.lock().push(item.len());
            Ok(None)
        })
        .seed_url("s3://bucket.example.com/key")
        .unwrap()
        .build();

    let scheduler = Arc::new(Scheduler::new());
    scheduler.start(setup).await.unwrap();
    timeout(Duration::from_secs(10), spawn_monitor(Arc::clone(&scheduler), monitor_config()))
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), scheduler.wait()).await.unwrap();

    assert_eq!(*calls.lock(), [0]);
    let stats = scheduler.stats().unwrap().snapshot();
    assert_eq!(stats.downloads_succeeded, 1);
    assert_eq!(stats.errors_reported, 0);
    assert_eq!(scheduler.summary("").primary_domain.as_deref(), Some("example.com"));
}
