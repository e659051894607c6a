use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::RETRY_AFTER;
use reqwest::{StatusCode, Url};
use tracing::debug;

use crate::config::Settings;
use crate::error::FetchError;

const MAX_REDIRECTS: usize = 10;

/// A fetched document. `url` is the final URL after redirects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub url: String,
    pub body: String,
}

/// Single-attempt GET. Retrying is the caller's business.
pub trait PageFetcher {
    fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

impl<T: PageFetcher + ?Sized> PageFetcher for &T {
    fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        (**self).fetch(url)
    }
}

impl<T: PageFetcher + ?Sized> PageFetcher for Box<T> {
    fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        (**self).fetch(url)
    }
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(settings.timeout())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::InvalidUrl {
            url: url.to_string(),
        })?;

        debug!(url, "GET");
        let response = self
            .client
            .get(parsed)
            .send()
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        let final_url = response.url().to_string();

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        if status == StatusCode::TOO_MANY_REQUESTS
            || (status == StatusCode::SERVICE_UNAVAILABLE && retry_after.is_some())
        {
            return Err(FetchError::RateLimited {
                url: url.to_string(),
                status: status.as_u16(),
                retry_after,
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Body {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        Ok(Page {
            url: final_url,
            body,
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Connect {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Only the delta-seconds form; HTTP dates are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// `base?k=v&...` with proper escaping.
pub fn with_query(base: &str, params: &[(&str, &str)]) -> Result<String, FetchError> {
    Url::parse_with_params(base, params)
        .map(|u| u.to_string())
        .map_err(|_| FetchError::InvalidUrl {
            url: base.to_string(),
        })
}

/// Add `https://` to bare domains like `clinic.ca`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw.trim_start_matches("//"))
    };
    let url = Url::parse(&candidate).ok()?;
    url.host_str().filter(|h| h.contains('.'))?;
    Some(url.to_string())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_scheme() {
        assert_eq!(normalize_url("coasttherapy.ca").as_deref(), Some("https://coasttherapy.ca/"));
        assert_eq!(
            normalize_url("http://www.coasttherapy.ca").as_deref(),
            Some("http://www.coasttherapy.ca/")
        );
        assert_eq!(normalize_url(""), None);
        assert_eq!(normalize_url("not a url"), None);
        assert_eq!(normalize_url("localhost"), None);
    }

    #[test]
    fn query_is_escaped() {
        let url = with_query("https://x.test/search", &[("q", "Jane Doe & Co")]).unwrap();
        assert_eq!(url, "https://x.test/search?q=Jane+Doe+%26+Co");
    }

    #[test]
    fn retry_after_seconds() {
        assert_eq!(parse_retry_after(" 30 "), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
