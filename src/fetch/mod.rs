// src/fetch/mod.rs
// =============================================================================
// Content fetching: archival capture in, classified bytes out.
//
// Submodules:
// - client: the Fetch trait and the reqwest transport
// - classify: content-type to ContentKind, placeholder page detection
// - encoding: charset detection, UTF-8 decoding, archive markup cleanup
//
// ContentFetcher sits on top of the transport and knows two archive quirks:
// image captures sometimes come back as an HTML shell around a single <img>,
// and missing captures come back as a 200 "not archived" page.
// =============================================================================

mod classify;
mod client;
pub mod encoding;

pub use classify::{classify, is_placeholder_page, mime_essence, ContentKind, DEFAULT_CONTENT_TYPE};
pub use client::{Fetch, FetchError, HttpFetcher, RawResponse};

use scraper::{Html, Selector};
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::archive::{CaptureFlavor, CaptureRef, Reference, ReferenceBase};

/// A successful fetch, before decoding or saving
#[derive(Debug, Clone)]
pub struct FetchedResource {
    pub capture: CaptureRef,
    pub content_type: String,
    pub kind: ContentKind,
    pub body: Vec<u8>,
}

pub struct ContentFetcher {
    transport: Arc<dyn Fetch>,
    archive_host: Url,
    placeholder_titles: Vec<String>,
}

impl ContentFetcher {
    pub fn new(transport: Arc<dyn Fetch>, archive_host: Url, placeholder_titles: Vec<String>) -> Self {
        Self {
            transport,
            archive_host,
            placeholder_titles,
        }
    }

    pub fn archive_host(&self) -> &Url {
        &self.archive_host
    }

    pub async fn fetch(&self, capture: &CaptureRef) -> Result<FetchedResource, FetchError> {
        let resource = self.fetch_once(capture).await?;

        // One level of indirection: the image lives behind the shell's <img src>
        if capture.flavor == CaptureFlavor::Image && resource.kind == ContentKind::Html {
            let html = String::from_utf8_lossy(&resource.body);
            if let Some(inner) = self.image_behind_shell(&html, capture) {
                debug!(url = %inner.original, "Following image shell");
                let mut image = self.fetch_once(&inner).await?;
                image.capture = capture.clone();
                return Ok(image);
            }
        }

        if resource.kind == ContentKind::Html {
            let html = String::from_utf8_lossy(&resource.body);
            if is_placeholder_page(&html, &self.placeholder_titles) {
                return Err(FetchError::Placeholder);
            }
        }

        Ok(resource)
    }

    async fn fetch_once(&self, capture: &CaptureRef) -> Result<FetchedResource, FetchError> {
        let url = capture.archive_url(&self.archive_host);
        let response = self.transport.fetch(&url).await?;

        if !response.is_success() {
            return Err(FetchError::Status(response.status));
        }

        let content_type = response
            .content_type()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        Ok(FetchedResource {
            capture: capture.clone(),
            kind: classify(&content_type),
            content_type,
            body: response.body,
        })
    }

    fn image_behind_shell(&self, html: &str, capture: &CaptureRef) -> Option<CaptureRef> {
        let document = Html::parse_document(html);
        let selector = Selector::parse("img[src]").ok()?;
        let src = document.select(&selector).next()?.value().attr("src")?;

        let base = ReferenceBase::for_capture(capture, &self.archive_host);
        match base.resolve(src, CaptureFlavor::Image) {
            Reference::Capture(inner) => Some(inner.with_flavor(CaptureFlavor::Image)),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    // In-memory stand-in for the network, shared by the crate's tests
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockFetcher {
        responses: Mutex<HashMap<String, RawResponse>>,
        pub calls: AtomicUsize,
        pub requested: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, url: &str, status: u16, content_type: &str, body: &[u8]) {
            self.responses.lock().unwrap().insert(
                url.to_string(),
                RawResponse {
                    status,
                    headers: vec![("content-type".to_string(), content_type.to_string())],
                    body: body.to_vec(),
                },
            );
        }

        pub fn page(&self, url: &str, html: &str) {
            self.insert(url, 200, "text/html; charset=utf-8", html.as_bytes());
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn times_requested(&self, url: &str) -> usize {
            self.requested.lock().unwrap().iter().filter(|u| *u == url).count()
        }
    }

    #[async_trait]
    impl Fetch for MockFetcher {
        async fn fetch(&self, url: &str) -> Result<RawResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(url.to_string());
            self.responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or(FetchError::Status(404))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockFetcher;
    use super::*;

    fn fetcher(mock: Arc<MockFetcher>) -> ContentFetcher {
        ContentFetcher::new(
            mock,
            Url::parse("https://archive.example").unwrap(),
            vec!["Wayback Machine".to_string()],
        )
    }

    #[tokio::test]
    async fn test_resolves_image_shell() {
        let mock = Arc::new(MockFetcher::new());
        mock.page(
            "https://archive.example/web/2002im_/http://site.org/x.gif",
            r#"<html><body><img src="/web/20020821165006im_/http://site.org/x.gif"></body></html>"#,
        );
        mock.insert(
            "https://archive.example/web/20020821165006im_/http://site.org/x.gif",
            200,
            "image/gif",
            b"GIF89a",
        );

        let capture = CaptureRef::parse("/web/2002im_/http://site.org/x.gif").unwrap();
        let resource = fetcher(mock.clone()).fetch(&capture).await.unwrap();
        assert_eq!(resource.kind, ContentKind::Image);
        assert_eq!(resource.body, b"GIF89a");
        assert_eq!(resource.capture.timestamp, "2002");
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn test_rejects_placeholder_page() {
        let mock = Arc::new(MockFetcher::new());
        mock.page(
            "https://archive.example/web/2002/http://site.org/missing.html",
            "<html><head><title>Wayback Machine</title></head><body>Hrm.</body></html>",
        );
        let capture = CaptureRef::parse("/web/2002/http://site.org/missing.html").unwrap();
        let result = fetcher(mock).fetch(&capture).await;
        assert_eq!(result.unwrap_err(), FetchError::Placeholder);
    }

    #[tokio::test]
    async fn test_non_success_status_is_an_error() {
        let mock = Arc::new(MockFetcher::new());
        mock.insert("https://archive.example/web/2002/http://site.org/a.html", 503, "text/html", b"");
        let capture = CaptureRef::parse("/web/2002/http://site.org/a.html").unwrap();
        let result = fetcher(mock).fetch(&capture).await;
        assert_eq!(result.unwrap_err(), FetchError::Status(503));
    }
}
