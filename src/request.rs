//! Outbound fetch descriptors.
//!
//! A `Request` is immutable once built: raising its depth produces a new value
//! via [`Request::with_depth`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    url: Url,
    method: String,
    headers: BTreeMap<String, String>,
    depth: u32,
}

impl Request {
    /// Creates a `GET` request at depth 0.
    pub fn new(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            depth: 0,
        }
    }

    pub fn parse(url: &str) -> Result<Self, EngineError> {
        Ok(Self::new(Url::parse(url)?))
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_ascii_uppercase();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Returns a copy of this request at the given depth.
    pub fn with_depth(&self, depth: u32) -> Self {
        Self {
            depth,
            ..self.clone()
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Identity used for deduplication: the URL without its fragment.
    pub fn dedup_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_bump_yields_new_value() {
        let seed = Request::parse("http://www.example.com/").unwrap();
        let child = seed.with_depth(1);
        assert_eq!(seed.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(child.url(), seed.url());
    }

    #[test]
    fn dedup_key_ignores_fragment_and_host_case() {
        let a = Request::parse("http://WWW.Example.com/a#top").unwrap();
        let b = Request::parse("http://www.example.com/a").unwrap();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn any_scheme_is_accepted() {
        let s3 = Request::parse("s3://bucket.example.com/key").unwrap();
        assert_eq!(s3.host(), Some("bucket.example.com"));
        assert_eq!(s3.url().path(), "/key");
        assert_eq!(Request::parse("mailto:someone@example.com").unwrap().host(), None);
    }
}
