//! # Parser Module
//!
//! Response parsing contracts and the pooled analyzer that runs them.
//!
//! ## Overview
//!
//! A parse function turns one `Response` into new `Request`s, `Item`s and
//! errors. Parse functions are pure with respect to the engine: they never
//! touch queues or pools, they only describe what they found in a
//! `ParseOutput`. The `Analyzer` entity runs every configured parse function
//! against a response and stamps each produced request with the depth one hop
//! below the response that yielded it.
//!
//! ## Key Components
//!
//! - **ParseResponse**: trait for parse functions; implemented for plain closures
//! - **Data**: the closed set of things a parse function may produce
//! - **ParseOutput**: accumulator returned by a parse function
//! - **Analyzer**: pool entity that applies parse functions to a response

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::item::Item;
use crate::pool::PoolEntity;
use crate::request::Request;
use crate::response::Response;

/// One unit of data produced while parsing a response.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Request(Request),
    Item(Item),
}

impl From<Request> for Data {
    fn from(request: Request) -> Self {
        Data::Request(request)
    }
}

impl From<Item> for Data {
    fn from(item: Item) -> Self {
        Data::Item(item)
    }
}

/// What a parse function found in a response.
#[derive(Debug, Default)]
pub struct ParseOutput {
    data: Vec<Data>,
    errors: Vec<anyhow::Error>,
}

impl ParseOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&mut self, request: Request) {
        self.data.push(Data::Request(request));
    }

    pub fn add_item(&mut self, item: Item) {
        self.data.push(Data::Item(item));
    }

    pub fn add_error(&mut self, error: impl Into<anyhow::Error>) {
        self.errors.push(error.into());
    }

    pub fn push(&mut self, data: impl Into<Data>) {
        self.data.push(data.into());
    }

    pub fn data(&self) -> &[Data] {
        &self.data
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.errors.is_empty()
    }

    pub fn into_parts(self) -> (Vec<Data>, Vec<anyhow::Error>) {
        (self.data, self.errors)
    }

    fn extend(&mut self, other: ParseOutput) {
        self.data.extend(other.data);
        self.errors.extend(other.errors);
    }
}

/// A parse function. `depth` is the depth of the request that produced `response`.
#[async_trait]
pub trait ParseResponse: Send + Sync + 'static {
    async fn parse(&self, response: &Response, depth: u32) -> ParseOutput;
}

#[async_trait]
impl<F> ParseResponse for F
where
    F: Fn(&Response, u32) -> ParseOutput + Send + Sync + 'static,
{
    async fn parse(&self, response: &Response, depth: u32) -> ParseOutput {
        (self)(response, depth)
    }
}

/// A pooled worker that applies the configured parse functions to responses.
#[derive(Debug)]
pub struct Analyzer {
    id: u32,
}

impl Analyzer {
    pub fn new(id: u32) -> Self {
        Self { id }
    }

    /// Runs every parser against `response` and merges their output.
    ///
    /// Each produced `Request` comes back with depth `response.depth() + 1`,
    /// whatever depth the parser gave it. A response without a body is not
    /// handed to the parsers and yields a single error instead.
    pub async fn analyze(
        &self,
        parsers: &[Arc<dyn ParseResponse>],
        response: &Response,
    ) -> ParseOutput {
        let mut merged = ParseOutput::new();
        if !response.valid() {
            merged.add_error(anyhow::anyhow!(
                "response from {} has no body",
                response.url()
            ));
            return merged;
        }

        let depth = response.depth();
        for parser in parsers {
            merged.extend(parser.parse(response, depth).await);
        }

        let child_depth = depth.saturating_add(1);
        for data in merged.data.iter_mut() {
            if let Data::Request(request) = data {
                if request.depth() != child_depth {
                    *request = request.with_depth(child_depth);
                }
            }
        }

        trace!(
            "Analyzer {} produced {} data and {} errors from {}",
            self.id,
            merged.data.len(),
            merged.errors.len(),
            response.url()
        );
        merged
    }
}

impl PoolEntity for Analyzer {
    fn id(&self) -> u32 {
        self.id
    }
}
