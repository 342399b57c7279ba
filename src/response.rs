//! Results of executing a `Request`.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::request::Request;

/// A fetched page, paired with the depth of the request that produced it.
#[derive(Debug, Clone)]
pub struct Response {
    request: Request,
    status: u16,
    headers: BTreeMap<String, String>,
    body: Option<Bytes>,
}

impl Response {
    pub fn new(request: Request, status: u16, body: Option<Bytes>) -> Self {
        Self {
            request,
            status,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Re-tags the response with the depth of the request that was sent.
    pub fn at_depth(mut self, depth: u32) -> Self {
        self.request = self.request.with_depth(depth);
        self
    }

    /// The request this response answers.
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn url(&self) -> &url::Url {
        self.request.url()
    }

    pub fn depth(&self) -> u32 {
        self.request.depth()
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_ref()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Whether the response carries a usable body.
    pub fn valid(&self) -> bool {
        self.body.is_some()
    }
}
