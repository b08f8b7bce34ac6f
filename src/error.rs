/// Everything that can stop a relay request.
///
/// `MissingUrl` and `UpstreamStatus` are answered with an `{error, code}`
/// envelope. The rest are internal and surface as a failed invocation.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Missing URL parameter")]
    MissingUrl,

    /// The upstream answered with a non-2xx status.
    #[error("Failed to fetch URL")]
    UpstreamStatus(u16),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("failed to read upstream body: {0}")]
    Body(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    /// Status code to answer with, or `None` when the error is not meant
    /// for the caller.
    pub fn status(&self) -> Option<u16> {
        match self {
            RelayError::MissingUrl => Some(400),
            RelayError::UpstreamStatus(status) => Some(*status),
            _ => None,
        }
    }
}

impl From<RelayError> for worker::Error {
    fn from(err: RelayError) -> Self {
        worker::Error::RustError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_carry_status() {
        assert_eq!(RelayError::MissingUrl.status(), Some(400));
        assert_eq!(RelayError::UpstreamStatus(404).status(), Some(404));
        assert_eq!(RelayError::UpstreamStatus(503).status(), Some(503));
    }

    #[test]
    fn test_internal_errors_have_no_status() {
        assert_eq!(RelayError::Fetch("dns".into()).status(), None);
        assert_eq!(RelayError::Body("reset".into()).status(), None);
        assert_eq!(RelayError::Cache("closed".into()).status(), None);
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(RelayError::MissingUrl.to_string(), "Missing URL parameter");
        assert_eq!(RelayError::UpstreamStatus(500).to_string(), "Failed to fetch URL");
        assert!(RelayError::Fetch("timed out".into()).to_string().contains("timed out"));
    }
}
