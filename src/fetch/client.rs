// src/fetch/client.rs
// =============================================================================
// The network boundary.
//
// The pipeline only ever needs "give me the bytes behind this URL". That
// capability is the Fetch trait, so tests can swap the network for an
// in-memory map. HttpFetcher is the real implementation on top of reqwest.
//
// reqwest failures are sorted into FetchError variants, and only
// FetchError::is_retryable decides whether a task goes back in the queue.
// =============================================================================

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("could not resolve hostname")]
    Dns,
    #[error("TLS/SSL error")]
    Tls,
    #[error("connection failed")]
    Connect,
    #[error("too many redirects")]
    TooManyRedirects,
    #[error("HTTP {0}")]
    Status(u16),
    #[error("archive returned its own not-found page")]
    Placeholder,
    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// A placeholder page will be a placeholder on every attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchError::Placeholder)
    }
}

/// Raw answer from the transport
#[derive(Debug, Clone, Default)]
pub struct RawResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<RawResponse, FetchError>;
}

pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self, FetchError> {
        // The archive redirects a capture to its nearest timestamp, sometimes twice
        let client = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<RawResponse, FetchError> {
        let response = self.client.get(url).send().await.map_err(categorize_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = response.bytes().await.map_err(categorize_error)?.to_vec();

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

// Sorts reqwest failures into the variants the scheduler reasons about
fn categorize_error(error: reqwest::Error) -> FetchError {
    let error_string = error.to_string().to_lowercase();

    if error.is_timeout() {
        FetchError::Timeout
    } else if error.is_redirect() {
        FetchError::TooManyRedirects
    } else if error.is_connect() {
        if error_string.contains("dns") {
            FetchError::Dns
        } else {
            FetchError::Connect
        }
    } else if error_string.contains("certificate") || error_string.contains("ssl") {
        FetchError::Tls
    } else if let Some(status) = error.status() {
        FetchError::Status(status.as_u16())
    } else {
        FetchError::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = RawResponse {
            status: 200,
            headers: vec![("Content-Type".into(), "text/html; charset=iso-8859-1".into())],
            body: Vec::new(),
        };
        assert_eq!(response.content_type(), Some("text/html; charset=iso-8859-1"));
        assert!(response.is_success());
    }

    #[test]
    fn test_placeholder_is_terminal() {
        assert!(!FetchError::Placeholder.is_retryable());
        assert!(FetchError::Timeout.is_retryable());
        assert!(FetchError::Status(404).is_retryable());
    }
}
