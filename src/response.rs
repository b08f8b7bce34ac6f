use serde::{Deserialize, Serialize};
use worker::{Headers, Response};

use crate::error::RelayError;

/// Headers on every relay response.
pub const JSON_HEADERS: [(&str, &str); 2] = [
    ("Content-Type", "application/json"),
    ("Access-Control-Allow-Origin", "*"),
];

/// Body of a successful relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub url: String,
    pub limit: Option<u64>,
    pub created: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: u16,
}

/// A JSON response as the relay sees it, independent of the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResponse {
    pub status: u16,
    pub body: String,
}

impl RelayResponse {
    pub fn json<T: Serialize>(value: &T, status: u16) -> Result<Self, RelayError> {
        Ok(Self {
            status,
            body: serde_json::to_string(value)?,
        })
    }

    pub fn error(message: &str, status: u16) -> Result<Self, RelayError> {
        Self::json(
            &ErrorEnvelope {
                error: message.to_string(),
                code: status,
            },
            status,
        )
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn into_worker(self) -> worker::Result<Response> {
        let headers = Headers::from_iter(JSON_HEADERS);
        Ok(Response::ok(self.body)?
            .with_status(self.status)
            .with_headers(headers))
    }

    pub async fn from_worker(mut resp: Response) -> worker::Result<Self> {
        let status = resp.status_code();
        let body = resp.text().await?;
        Ok(Self { status, body })
    }
}
