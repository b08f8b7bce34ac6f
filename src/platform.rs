//! Capabilities the relay borrows from its host.
//!
//! The Worker runtime provides all of them (see `fetch.rs` and `cache.rs`);
//! tests swap in in-memory versions.

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use url::Url;

use crate::error::RelayError;
use crate::response::RelayResponse;

/// The parts of the incoming request the relay looks at.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub url: Url,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self { method: method.into(), url }
    }
}

/// Identity of a cached relay response: the full incoming request line.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: String,
    pub url: String,
}

impl CacheKey {
    pub fn for_request(request: &InboundRequest) -> Self {
        Self {
            method: request.method.to_ascii_uppercase(),
            url: request.url.to_string(),
        }
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }
}

/// Outbound HTTP.
#[async_trait(?Send)]
pub trait Fetcher {
    /// Fetches `url` and returns the body text. A non-2xx answer is reported
    /// as `RelayError::UpstreamStatus` before any body is read.
    async fn fetch_text(&self, url: &str) -> Result<String, RelayError>;
}

/// Shared response cache.
#[async_trait(?Send)]
pub trait ResponseCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<RelayResponse>, RelayError>;

    async fn store(&self, key: &CacheKey, response: &RelayResponse) -> Result<(), RelayError>;
}

/// Runs work after the response has been handed back.
pub trait BackgroundTasks {
    /// Hands `task` to the host, which keeps it alive until it completes.
    fn defer(&self, task: LocalBoxFuture<'static, ()>);
}

pub trait Clock {
    /// Current time as an ISO 8601 string in UTC, e.g. `2024-05-01T12:00:00.000Z`.
    fn now_iso8601(&self) -> String;
}
