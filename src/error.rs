use std::time::Duration;

use thiserror::Error;

/// Why a single page fetch failed.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("connection failed for {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("rate limited by {url} (HTTP {status})")]
    RateLimited {
        url: String,
        status: u16,
        retry_after: Option<Duration>,
    },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("invalid url {url}")]
    InvalidUrl { url: String },
    #[error("failed reading body of {url}: {reason}")]
    Body { url: String, reason: String },
}

impl FetchError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. })
    }

    /// Same error with `secret` blanked out of the URL, for logging API calls.
    pub fn redact(mut self, secret: &str) -> Self {
        let url = match &mut self {
            FetchError::Timeout { url }
            | FetchError::Connect { url, .. }
            | FetchError::RateLimited { url, .. }
            | FetchError::Status { url, .. }
            | FetchError::InvalidUrl { url }
            | FetchError::Body { url, .. } => url,
        };
        if !secret.is_empty() {
            *url = url.replace(secret, "***");
        }
        self
    }
}

/// Why one tier of the fallback chain gave up.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),
    #[error("places api rate limit ({0})")]
    ApiRateLimited(String),
    #[error("places api error: {0}")]
    Api(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    pub fn is_rate_limited(&self) -> bool {
        match self {
            SourceError::Fetch(e) => e.is_rate_limited(),
            SourceError::ApiRateLimited(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_classification() {
        let limited = SourceError::from(FetchError::RateLimited {
            url: "https://x".into(),
            status: 429,
            retry_after: None,
        });
        assert!(limited.is_rate_limited());
        assert!(SourceError::ApiRateLimited("OVER_QUERY_LIMIT".into()).is_rate_limited());
        assert!(!SourceError::MissingConfig("api key").is_rate_limited());
        let timeout = SourceError::from(FetchError::Timeout { url: "https://x".into() });
        assert!(!timeout.is_rate_limited());
    }

    #[test]
    fn redact_hides_key() {
        let err = FetchError::Status {
            url: "https://maps.test/json?query=a&key=SECRET".into(),
            status: 403,
        }
        .redact("SECRET");
        assert_eq!(err.to_string(), "HTTP 403 from https://maps.test/json?query=a&key=***");
    }
}
