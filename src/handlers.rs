use std::rc::Rc;

use crate::config::{ConvertConfig, RelayParams};
use crate::error::RelayError;
use crate::markdown::{html_to_markdown, truncate_chars};
use crate::platform::{BackgroundTasks, CacheKey, Clock, Fetcher, InboundRequest, ResponseCache};
use crate::response::{Envelope, RelayResponse};

/// How a request was answered.
#[derive(Debug)]
pub enum Outcome {
    CacheHit,
    Converted { url: String, chars: usize },
    Rejected(RelayError),
}

#[derive(Debug)]
pub struct Relayed {
    pub response: RelayResponse,
    pub outcome: Outcome,
}

/// The relay endpoint: query parsing, cache-aside lookup, one upstream
/// fetch, conversion, and a deferred cache fill.
pub struct Relay<F, C, T, K> {
    fetcher: F,
    cache: Rc<C>,
    tasks: T,
    clock: K,
    config: ConvertConfig,
}

impl<F, C, T, K> Relay<F, C, T, K>
where
    F: Fetcher,
    C: ResponseCache + 'static,
    T: BackgroundTasks,
    K: Clock,
{
    pub fn new(fetcher: F, cache: C, tasks: T, clock: K) -> Self {
        Self {
            fetcher,
            cache: Rc::new(cache),
            tasks,
            clock,
            config: ConvertConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConvertConfig) -> Self {
        self.config = config;
        self
    }

    /// Answers `request`. Missing parameters and failed upstream fetches come
    /// back as error envelopes; any other failure is returned as `Err`.
    pub async fn handle(&self, request: &InboundRequest) -> Result<Relayed, RelayError> {
        match self.relay(request).await {
            Ok(relayed) => Ok(relayed),
            Err(err) => match err.status() {
                Some(status) => Ok(Relayed {
                    response: RelayResponse::error(&err.to_string(), status)?,
                    outcome: Outcome::Rejected(err),
                }),
                None => Err(err),
            },
        }
    }

    async fn relay(&self, request: &InboundRequest) -> Result<Relayed, RelayError> {
        let params = RelayParams::from_url(&request.url)?;
        let key = CacheKey::for_request(request);

        if let Some(cached) = self.cache.lookup(&key).await? {
            return Ok(Relayed {
                response: cached,
                outcome: Outcome::CacheHit,
            });
        }

        let html = self.fetcher.fetch_text(&params.url).await?;
        let markdown = html_to_markdown(&html, &self.config);
        let body = match params.limit {
            Some(limit) => truncate_chars(&markdown, usize::try_from(limit).unwrap_or(usize::MAX)),
            None => markdown.as_str(),
        };

        let envelope = Envelope {
            url: params.url,
            limit: params.limit,
            created: self.clock.now_iso8601(),
            body: body.to_string(),
        };
        let response = RelayResponse::json(&envelope, 200)?;

        self.defer_store(key, response.clone());

        Ok(Relayed {
            response,
            outcome: Outcome::Converted {
                url: envelope.url,
                chars: envelope.body.chars().count(),
            },
        })
    }

    /// Fills the cache after the response is returned. Failures are dropped.
    fn defer_store(&self, key: CacheKey, response: RelayResponse) {
        let cache = Rc::clone(&self.cache);
        self.tasks.defer(Box::pin(async move {
            let _ = cache.store(&key, &response).await;
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::LocalBoxFuture;
    use std::cell::{Cell, RefCell};
    use std::collections::HashMap;
    use url::Url;

    struct StaticPages {
        pages: HashMap<String, (u16, String)>,
        calls: Cell<usize>,
    }

    impl StaticPages {
        fn new(pages: &[(&str, u16, &str)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, status, body)| (url.to_string(), (*status, body.to_string())))
                    .collect(),
                calls: Cell::new(0),
            }
        }
    }

    #[async_trait(?Send)]
    impl Fetcher for StaticPages {
        async fn fetch_text(&self, url: &str) -> Result<String, RelayError> {
            self.calls.set(self.calls.get() + 1);
            match self.pages.get(url) {
                Some((status, body)) if (200..300).contains(status) => Ok(body.clone()),
                Some((status, _)) => Err(RelayError::UpstreamStatus(*status)),
                None => Err(RelayError::Fetch(format!("no route to {}", url))),
            }
        }
    }

    #[derive(Default)]
    struct MemoryCache {
        entries: RefCell<HashMap<CacheKey, RelayResponse>>,
        fail_writes: bool,
    }

    #[async_trait(?Send)]
    impl ResponseCache for MemoryCache {
        async fn lookup(&self, key: &CacheKey) -> Result<Option<RelayResponse>, RelayError> {
            Ok(self.entries.borrow().get(key).cloned())
        }

        async fn store(&self, key: &CacheKey, response: &RelayResponse) -> Result<(), RelayError> {
            if self.fail_writes {
                return Err(RelayError::Cache("read-only".into()));
            }
            self.entries.borrow_mut().insert(key.clone(), response.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct QueuedTasks {
        queue: RefCell<Vec<LocalBoxFuture<'static, ()>>>,
    }

    impl QueuedTasks {
        fn pending(&self) -> usize {
            self.queue.borrow().len()
        }

        async fn drain(&self) {
            let tasks: Vec<_> = self.queue.borrow_mut().drain(..).collect();
            for task in tasks {
                task.await;
            }
        }
    }

    impl BackgroundTasks for QueuedTasks {
        fn defer(&self, task: LocalBoxFuture<'static, ()>) {
            self.queue.borrow_mut().push(task);
        }
    }

    /// Advances one second per reading.
    #[derive(Default)]
    struct TickingClock {
        ticks: Cell<u32>,
    }

    impl Clock for TickingClock {
        fn now_iso8601(&self) -> String {
            let tick = self.ticks.get();
            self.ticks.set(tick + 1);
            format!("2024-01-01T00:00:{:02}.000Z", tick)
        }
    }

    const PAGE: &str = "<h1>Example Domain</h1><p>This domain is for use in examples.</p>";

    fn relay_with(pages: StaticPages, cache: MemoryCache) -> Relay<StaticPages, MemoryCache, QueuedTasks, TickingClock> {
        Relay::new(pages, cache, QueuedTasks::default(), TickingClock::default())
    }

    fn relay() -> Relay<StaticPages, MemoryCache, QueuedTasks, TickingClock> {
        relay_with(
            StaticPages::new(&[
                ("http://example.com", 200, PAGE),
                ("http://example.com/missing", 404, "Not Found"),
                ("http://example.com/broken", 500, "oops"),
            ]),
            MemoryCache::default(),
        )
    }

    fn get(query: &str) -> InboundRequest {
        InboundRequest::new("GET", Url::parse(&format!("https://relay.example/{}", query)).unwrap())
    }

    fn envelope(resp: &RelayResponse) -> Envelope {
        serde_json::from_str(&resp.body).unwrap()
    }

    #[tokio::test]
    async fn test_missing_url_is_rejected_without_fetching() {
        let relay = relay();
        let relayed = relay.handle(&get("?limit=5")).await.unwrap();

        assert_eq!(relayed.response.status, 400);
        assert_eq!(
            relayed.response.body,
            r#"{"error":"Missing URL parameter","code":400}"#
        );
        assert!(matches!(relayed.outcome, Outcome::Rejected(RelayError::MissingUrl)));
        assert_eq!(relay.fetcher.calls.get(), 0);
        assert_eq!(relay.tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_upstream_status_is_mirrored() {
        let relay = relay();

        let not_found = relay.handle(&get("?url=http://example.com/missing")).await.unwrap();
        assert_eq!(not_found.response.status, 404);
        assert_eq!(
            not_found.response.body,
            r#"{"error":"Failed to fetch URL","code":404}"#
        );

        let broken = relay.handle(&get("?url=http://example.com/broken")).await.unwrap();
        assert_eq!(broken.response.status, 500);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let relay = relay();
        let request = get("?url=http://example.com/missing");

        relay.handle(&request).await.unwrap();
        assert_eq!(relay.tasks.pending(), 0);
        relay.handle(&request).await.unwrap();

        assert_eq!(relay.fetcher.calls.get(), 2);
        assert!(relay.cache.entries.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_success_envelope() {
        let relay = relay();
        let relayed = relay.handle(&get("?url=http://example.com")).await.unwrap();

        assert_eq!(relayed.response.status, 200);
        let env = envelope(&relayed.response);
        assert_eq!(env.url, "http://example.com");
        assert_eq!(env.limit, None);
        assert_eq!(env.created, "2024-01-01T00:00:00.000Z");
        assert_eq!(env.body, "# Example Domain\n\nThis domain is for use in examples.");
        assert!(relayed.response.body.contains(r#""limit":null"#));
        assert!(matches!(relayed.outcome, Outcome::Converted { .. }));
    }

    #[tokio::test]
    async fn test_limit_truncates_body() {
        let relay = relay();
        let relayed = relay.handle(&get("?url=http://example.com&limit=10")).await.unwrap();

        let env = envelope(&relayed.response);
        assert_eq!(env.limit, Some(10));
        assert!(env.body.chars().count() <= 10);
        assert_eq!(env.body, "# Example ");
    }

    #[tokio::test]
    async fn test_limit_with_trailing_garbage_still_truncates() {
        let relay = relay();
        let relayed = relay.handle(&get("?url=http://example.com&limit=10abc")).await.unwrap();

        let env = envelope(&relayed.response);
        assert_eq!(env.limit, Some(10));
        assert_eq!(env.body, "# Example ");
        assert!(relayed.response.body.contains(r#""limit":10"#));
    }

    #[tokio::test]
    async fn test_zero_limit_yields_empty_body() {
        let relay = relay();
        let relayed = relay.handle(&get("?url=http://example.com&limit=0")).await.unwrap();
        assert_eq!(envelope(&relayed.response).body, "");
    }

    #[tokio::test]
    async fn test_repeat_request_is_served_from_cache() {
        let relay = relay();
        let request = get("?url=http://example.com&limit=10");

        let first = relay.handle(&request).await.unwrap();
        relay.tasks.drain().await;
        let second = relay.handle(&request).await.unwrap();

        assert!(matches!(second.outcome, Outcome::CacheHit));
        assert_eq!(relay.fetcher.calls.get(), 1);
        assert_eq!(first.response, second.response);
        assert_eq!(envelope(&first.response).created, envelope(&second.response).created);
    }

    #[tokio::test]
    async fn test_cache_fill_waits_for_background_tasks() {
        let relay = relay();
        let request = get("?url=http://example.com");

        relay.handle(&request).await.unwrap();
        assert_eq!(relay.tasks.pending(), 1);
        assert!(relay.cache.entries.borrow().is_empty());

        relay.tasks.drain().await;
        let key = CacheKey::for_request(&request);
        assert!(relay.cache.entries.borrow().contains_key(&key));
    }

    #[tokio::test]
    async fn test_different_limits_are_cached_separately() {
        let relay = relay();

        relay.handle(&get("?url=http://example.com&limit=5")).await.unwrap();
        relay.tasks.drain().await;
        let other = relay.handle(&get("?url=http://example.com&limit=7")).await.unwrap();

        assert!(matches!(other.outcome, Outcome::Converted { .. }));
        assert_eq!(envelope(&other.response).body.chars().count(), 7);
        assert_eq!(relay.fetcher.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_cache_write_failure_does_not_affect_response() {
        let cache = MemoryCache {
            fail_writes: true,
            ..MemoryCache::default()
        };
        let relay = relay_with(StaticPages::new(&[("http://example.com", 200, PAGE)]), cache);
        let request = get("?url=http://example.com");

        let relayed = relay.handle(&request).await.unwrap();
        relay.tasks.drain().await;

        assert_eq!(relayed.response.status, 200);
        let again = relay.handle(&request).await.unwrap();
        assert!(matches!(again.outcome, Outcome::Converted { .. }));
        assert_eq!(relay.fetcher.calls.get(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_propagates() {
        let relay = relay();
        let err = relay.handle(&get("?url=http://unreachable.test")).await.unwrap_err();
        assert!(matches!(err, RelayError::Fetch(_)));
        assert_eq!(relay.tasks.pending(), 0);
    }

    #[tokio::test]
    async fn test_config_reaches_converter() {
        let relay = relay_with(
            StaticPages::new(&[(
                "http://example.com",
                200,
                r#"<p><a href="https://iana.org">More</a></p>"#,
            )]),
            MemoryCache::default(),
        )
        .with_config(ConvertConfig {
            include_links: false,
            ..ConvertConfig::default()
        });

        let relayed = relay.handle(&get("?url=http://example.com")).await.unwrap();
        assert_eq!(envelope(&relayed.response).body, "More");
    }
}
