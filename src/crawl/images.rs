// src/crawl/images.rs
// =============================================================================
// The dedicated image pass.
//
// Many pages of an old site share the same handful of images, so images are
// collected while pages are crawled and fetched once at the end, as a plain
// stream with bounded concurrency. Images have no links to follow, which is
// why this needs none of the scheduler's machinery: retries happen inline.
//
// The same pass backs --images-only, where the images come from pages that
// are already in the mirror.
// =============================================================================

use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use super::links::extract_page_links;
use super::scheduler::{record_saved, WorkerContext};
use crate::archive::{CanonicalUrl, CaptureRef, ReferenceBase};
use crate::error::MirrorError;
use crate::mirror::{RunStats, SavedResource, StateTracker, WriteOutcome};
use crate::rewrite::mirrored_pages;

struct ImageResult {
    capture: CaptureRef,
    retries: u32,
    result: Result<(SavedResource, WriteOutcome), MirrorError>,
}

/// Fetch every image. Returns true when `shutdown` cut the pass short.
pub(crate) async fn fetch_images<S>(
    context: Arc<WorkerContext>,
    images: Vec<CaptureRef>,
    concurrency: usize,
    max_retries: u32,
    state: &mut StateTracker,
    stats: &mut RunStats,
    shutdown: S,
) -> bool
where
    S: Future<Output = ()> + Unpin,
{
    let mut results = stream::iter(images)
        .map(|capture| {
            let context = Arc::clone(&context);
            async move { fetch_with_retries(&context, capture, max_retries).await }
        })
        .buffer_unordered(concurrency.max(1))
        .take_until(shutdown);

    while let Some(image) = results.next().await {
        stats.retried += image.retries as usize;
        match image.result {
            Ok((saved, write)) => record_saved(&saved, write, state, stats),
            Err(error) => {
                warn!(url = %image.capture.canonical, error = %error, "Giving up on image");
                stats.record_failure(image.capture.canonical.key(), &error);
            }
        }
    }

    // Only set when `shutdown` resolved, not when the images ran out
    let stopped = results.take_result().is_some();
    if stopped {
        warn!("Shutdown requested, image pass abandoned");
    }
    stopped
}

async fn fetch_with_retries(context: &WorkerContext, capture: CaptureRef, max_retries: u32) -> ImageResult {
    let mut retries = 0;
    loop {
        match context.fetch_and_save(&capture).await {
            Ok((saved, write, _)) => {
                return ImageResult {
                    capture,
                    retries,
                    result: Ok((saved, write)),
                }
            }
            Err(error) if error.is_retryable() && retries < max_retries => {
                retries += 1;
                debug!(url = %capture.canonical, error = %error, attempt = retries, "Retrying image");
            }
            Err(error) => {
                return ImageResult {
                    capture,
                    retries,
                    result: Err(error),
                }
            }
        }
    }
}

/// Every same-site image referenced by the HTML files under `root`.
///
/// Relative references resolve against each file's place in the mirror and
/// are fetched from the capture at `timestamp`; the archive redirects to the
/// nearest one it has.
pub fn mirrored_images(root: &Path, timestamp: &str, archive_host: &Url) -> Vec<CaptureRef> {
    let mut images: BTreeMap<CanonicalUrl, CaptureRef> = BTreeMap::new();

    for (relative, canonical) in mirrored_pages(root) {
        let html = match std::fs::read(root.join(&relative)) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "Could not read mirrored page");
                continue;
            }
        };
        let base = match ReferenceBase::for_local_page(&canonical, timestamp, archive_host) {
            Some(base) => base,
            None => continue,
        };

        for image in extract_page_links(&html, &base).images {
            if image.canonical.domain() == canonical.domain() {
                images.entry(image.canonical.clone()).or_insert(image);
            }
        }
    }

    images.into_values().collect()
}
