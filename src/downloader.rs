//! Page downloaders.
//!
//! The transport itself is pluggable: anything implementing [`Downloader`]
//! can be pooled. The engine wraps each one in a [`PageDownloader`], which
//! carries the pool-scoped identity.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::pool::PoolEntity;
use crate::request::Request;
use crate::response::Response;

/// Executes a `Request`. Must be reusable across sequential calls.
#[async_trait]
pub trait Downloader: Send + Sync + 'static {
    async fn download(&self, request: &Request) -> anyhow::Result<Response>;

    /// Concrete kind, used to keep a downloader pool homogeneous.
    fn kind(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Builds one fresh downloader per pool slot.
pub type DownloaderFactory = Arc<dyn Fn() -> Box<dyn Downloader> + Send + Sync>;

/// A pooled downloader.
pub struct PageDownloader {
    id: u32,
    inner: Box<dyn Downloader>,
}

impl PageDownloader {
    pub fn new(id: u32, inner: Box<dyn Downloader>) -> Self {
        Self { id, inner }
    }

    pub async fn download(&self, request: &Request) -> anyhow::Result<Response> {
        trace!("Downloader {} fetching {}", self.id, request.url());
        self.inner.download(request).await
    }
}

impl PoolEntity for PageDownloader {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }
}

/// `reqwest`-backed HTTP downloader.
#[derive(Debug, Clone, Default)]
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// A factory handing every pool slot its own clone of one shared client.
    pub fn factory(client: reqwest::Client) -> DownloaderFactory {
        Arc::new(move || Box::new(HttpDownloader::with_client(client.clone())) as Box<dyn Downloader>)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, request: &Request) -> anyhow::Result<Response> {
        let method = reqwest::Method::from_bytes(request.method().as_bytes())?;
        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let http_response = builder.send().await?;
        let status = http_response.status().as_u16();
        let headers: Vec<(String, String)> = http_response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = http_response.bytes().await?;

        let mut response = Response::new(request.clone(), status, Some(body));
        for (name, value) in headers {
            response = response.with_header(name, value);
        }
        Ok(response)
    }
}
