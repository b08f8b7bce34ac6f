use async_trait::async_trait;
use worker::*;

use crate::error::RelayError;
use crate::platform::Fetcher;

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Outbound fetch through the Worker runtime. One attempt, no retries.
pub struct WorkerFetcher;

#[async_trait(?Send)]
impl Fetcher for WorkerFetcher {
    async fn fetch_text(&self, url: &str) -> std::result::Result<String, RelayError> {
        let mut opts = RequestInit::new();
        opts.method = Method::Get;

        let mut headers = Headers::new();
        headers
            .set("Accept", ACCEPT_HTML)
            .map_err(|e| RelayError::Fetch(e.to_string()))?;
        opts.headers = headers;

        console_log!("Fetching URL: {}", url);

        let request =
            Request::new_with_init(url, &opts).map_err(|e| RelayError::Fetch(e.to_string()))?;
        let mut response = Fetch::Request(request)
            .send()
            .await
            .map_err(|e| RelayError::Fetch(e.to_string()))?;

        let status = response.status_code();
        if !(200..300).contains(&status) {
            console_error!("Fetch error for {}: Status {}", url, status);
            return Err(RelayError::UpstreamStatus(status));
        }

        response.text().await.map_err(|e| {
            console_error!("Text extraction error for {}: {:?}", url, e);
            RelayError::Body(e.to_string())
        })
    }
}
