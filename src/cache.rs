use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use worker::{console_warn, Cache, Context};

use crate::error::RelayError;
use crate::platform::{BackgroundTasks, CacheKey, Clock, ResponseCache};
use crate::response::RelayResponse;

/// The zone's default edge cache, keyed by the incoming request URL.
///
/// The platform cache only holds GET entries, so any other method misses on
/// lookup and is refused on store.
pub struct EdgeCache {
    cache: Cache,
}

impl EdgeCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::default(),
        }
    }
}

/// Only successful answers to GET requests go into the edge cache.
pub fn cacheable(key: &CacheKey, response: &RelayResponse) -> Result<(), RelayError> {
    if !key.is_get() {
        return Err(RelayError::Cache(format!("{} requests are not cacheable", key.method)));
    }
    if !response.is_success() {
        return Err(RelayError::Cache(format!("status {} is not cacheable", response.status)));
    }
    Ok(())
}

#[async_trait(?Send)]
impl ResponseCache for EdgeCache {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<RelayResponse>, RelayError> {
        if !key.is_get() {
            return Ok(None);
        }

        let cached = self
            .cache
            .get(key.url.as_str(), false)
            .await
            .map_err(|e| RelayError::Cache(e.to_string()))?;

        match cached {
            Some(resp) => RelayResponse::from_worker(resp)
                .await
                .map(Some)
                .map_err(|e| RelayError::Cache(e.to_string())),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &CacheKey, response: &RelayResponse) -> Result<(), RelayError> {
        cacheable(key, response)?;

        let resp = response
            .clone()
            .into_worker()
            .map_err(|e| RelayError::Cache(e.to_string()))?;

        self.cache
            .put(key.url.as_str(), resp)
            .await
            .map_err(|e| {
                console_warn!("Cache write failed for {}: {}", key.url, e);
                RelayError::Cache(e.to_string())
            })
    }
}

/// Background work tied to the invocation through `ctx.waitUntil`.
pub struct WaitUntil(pub Context);

impl BackgroundTasks for WaitUntil {
    fn defer(&self, task: LocalBoxFuture<'static, ()>) {
        self.0.wait_until(task);
    }
}

pub struct EdgeClock;

impl Clock for EdgeClock {
    fn now_iso8601(&self) -> String {
        js_sys::Date::new_0().to_iso_string().into()
    }
}
