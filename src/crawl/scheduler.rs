// src/crawl/scheduler.rs
// =============================================================================
// The crawl loop.
//
// One scheduler task owns all mutable crawl state: the frontier, the crawl
// state tracker and the run statistics. Workers never touch any of it. They
// get a job, do the slow part (network, decoding, disk), and hand back an
// Outcome that the scheduler applies:
//
//   scheduler ── Job ──> worker: delay -> fetch -> normalize -> save -> links
//       ^                                                              |
//       └──────────────────────── Outcome ─────────────────────────────┘
//
// The loop ends when the frontier is empty and no worker is busy, or when
// shutdown is requested (ctrl-c, time limit). Either way the crawl state is
// flushed before returning.
// =============================================================================

use rand::Rng;
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use url::Url;

use super::frontier::{Admission, Bounds, CrawlTask, Frontier, Scope};
use super::images;
use super::links::{extract_css_links, extract_page_links, DiscoveredLinks};
use crate::archive::{CanonicalUrl, CaptureRef, ReferenceBase};
use crate::config::{ConfigError, CrawlConfig};
use crate::error::MirrorError;
use crate::fetch::encoding::normalize_html;
use crate::fetch::{classify, mime_essence, ContentFetcher, ContentKind, Fetch, DEFAULT_CONTENT_TYPE};
use crate::mirror::{
    content_hash, local_path, MirrorStore, RunStats, SavedResource, StateTracker, WriteOutcome,
};

pub const PAGE_LIST_FILE: &str = "page-list.txt";

/// What a finished crawl reports back to the command line
#[derive(Debug, Default)]
pub struct CrawlReport {
    pub stats: RunStats,
    /// Canonical URLs known to the mirror after the run
    pub mirrored: usize,
    pub interrupted: bool,
}

enum Job {
    Fetch(CrawlTask),
    /// Already in the mirror: read it back and follow its links
    Replay {
        capture: CaptureRef,
        path: PathBuf,
        content_type: String,
    },
}

pub(crate) enum Outcome {
    Saved {
        saved: SavedResource,
        write: WriteOutcome,
        links: DiscoveredLinks,
    },
    Replayed {
        links: DiscoveredLinks,
    },
    Failed {
        task: CrawlTask,
        error: MirrorError,
    },
}

/// Everything a worker needs, shared read-only between workers
pub(crate) struct WorkerContext {
    pub fetcher: ContentFetcher,
    pub store: MirrorStore,
    pub overwrite: bool,
    min_delay: Duration,
    max_delay: Duration,
}

impl WorkerContext {
    // Random pause before every fetch so workers do not hit the archive in lockstep
    fn jitter(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        if max <= min {
            return self.min_delay;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    async fn process(&self, job: Job) -> Outcome {
        match job {
            Job::Fetch(task) => match self.fetch_and_save(&task.capture).await {
                Ok((saved, write, links)) => Outcome::Saved { saved, write, links },
                Err(error) => Outcome::Failed { task, error },
            },
            Job::Replay {
                capture,
                path,
                content_type,
            } => Outcome::Replayed {
                links: self.replay(&capture, &path, &content_type).await,
            },
        }
    }

    /// Fetch, normalize, save and scan one capture
    pub(crate) async fn fetch_and_save(
        &self,
        capture: &CaptureRef,
    ) -> Result<(SavedResource, WriteOutcome, DiscoveredLinks), MirrorError> {
        tokio::time::sleep(self.jitter()).await;

        let resource = self.fetcher.fetch(capture).await?;
        let bytes = match resource.kind {
            ContentKind::Html => normalize_html(&resource.body, &resource.content_type).into_bytes(),
            _ => resource.body,
        };

        let relative = local_path(&capture.canonical, &resource.content_type);
        let write = self.store.write(&relative, &bytes, self.overwrite).await?;

        let base = ReferenceBase::for_capture(capture, self.fetcher.archive_host());
        let links = scan(&bytes, &resource.content_type, &base);

        debug!(url = %capture.canonical, path = %relative.display(), ?write, links = links.len(), "Saved");
        let saved = SavedResource {
            canonical: capture.canonical.clone(),
            local_path: relative,
            content_type: resource.content_type,
            content_hash: content_hash(&bytes),
        };
        Ok((saved, write, links))
    }

    async fn replay(&self, capture: &CaptureRef, path: &Path, content_type: &str) -> DiscoveredLinks {
        let bytes = match self.store.read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(url = %capture.canonical, error = %e, "Could not read saved copy");
                return DiscoveredLinks::default();
            }
        };
        // The saved file may already be rewritten to relative paths, which
        // only make sense against the file's own location
        let base = match ReferenceBase::for_local_page(
            &capture.canonical,
            &capture.timestamp,
            self.fetcher.archive_host(),
        ) {
            Some(base) => base,
            None => return DiscoveredLinks::default(),
        };
        scan(&bytes, content_type, &base)
    }
}

fn scan(bytes: &[u8], content_type: &str, base: &ReferenceBase) -> DiscoveredLinks {
    match classify(content_type) {
        ContentKind::Html => extract_page_links(&String::from_utf8_lossy(bytes), base),
        _ if mime_essence(content_type) == "text/css" => {
            extract_css_links(&String::from_utf8_lossy(bytes), base)
        }
        _ => DiscoveredLinks::default(),
    }
}

pub struct Crawler {
    config: CrawlConfig,
    context: Arc<WorkerContext>,
}

impl Crawler {
    pub fn new(config: CrawlConfig, transport: Arc<dyn Fetch>, root: PathBuf) -> Result<Self, ConfigError> {
        config.validate()?;
        let archive_host = config.archive_host_url()?;

        let context = WorkerContext {
            fetcher: ContentFetcher::new(transport, archive_host, config.placeholder_titles.clone()),
            store: MirrorStore::new(root),
            overwrite: config.overwrite,
            min_delay: config.min_delay,
            max_delay: config.max_delay,
        };

        Ok(Self {
            config,
            context: Arc::new(context),
        })
    }

    pub fn archive_host(&self) -> &Url {
        self.context.fetcher.archive_host()
    }

    /// Crawl from the seeds until the frontier drains or `shutdown` fires
    pub async fn run<F>(&self, seeds: Vec<CaptureRef>, bounds: Bounds, shutdown: F) -> Result<CrawlReport, MirrorError>
    where
        F: Future<Output = ()>,
    {
        let store = &self.context.store;
        store.ensure_root().await?;

        let mut state = StateTracker::load(store.root()).await?;
        let mut stats = RunStats::default();
        let mut frontier = Frontier::new(
            bounds,
            self.config.max_queued,
            self.config.max_tasks,
            self.config.max_retries,
        );
        let mut replays: VecDeque<Job> = VecDeque::new();

        info!(
            seeds = seeds.len(),
            bound = frontier.bounds().prefix(),
            known = state.len(),
            "Starting crawl"
        );
        for seed in seeds {
            self.admit(seed, Scope::Path, &mut frontier, &state, &mut replays, &mut stats)
                .await;
        }

        let mut workers: JoinSet<Outcome> = JoinSet::new();
        let mut flush = tokio::time::interval(self.config.flush_interval);
        flush.tick().await;
        tokio::pin!(shutdown);
        let mut interrupted = false;

        loop {
            while !interrupted && workers.len() < self.config.concurrency {
                let job = match replays.pop_front() {
                    Some(job) => job,
                    None => match frontier.next() {
                        Some(task) => Job::Fetch(task),
                        None => break,
                    },
                };
                let context = Arc::clone(&self.context);
                workers.spawn(async move { context.process(job).await });
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                _ = &mut shutdown, if !interrupted => {
                    warn!(in_flight = workers.len(), "Shutdown requested, finishing in-flight fetches");
                    interrupted = true;
                }
                Some(joined) = workers.join_next() => match joined {
                    Ok(outcome) => {
                        self.apply(outcome, &mut frontier, &mut state, &mut replays, &mut stats)
                            .await;
                    }
                    Err(e) => warn!(error = %e, "Worker task failed"),
                },
                _ = flush.tick() => {
                    if let Err(e) = state.flush().await {
                        warn!(error = %e, "Could not flush crawl state");
                    }
                    info!(
                        processed = stats.processed,
                        queued = frontier.len(),
                        in_flight = workers.len(),
                        "Crawl progress"
                    );
                }
            }
        }

        if !interrupted {
            let pending = frontier.take_images();
            let mut candidates = Vec::new();
            for capture in pending {
                if self.saved_copy(&capture.canonical, &state).await.is_some() {
                    stats.skipped += 1;
                } else {
                    candidates.push(capture);
                }
            }
            if !candidates.is_empty() {
                info!(images = candidates.len(), "Starting image pass");
                interrupted = images::fetch_images(
                    Arc::clone(&self.context),
                    candidates,
                    self.config.concurrency,
                    self.config.max_retries,
                    &mut state,
                    &mut stats,
                    &mut shutdown,
                )
                .await;
            }
        }

        // Always reached, interrupted or not
        state.flush().await?;
        stats.write(store.root()).await?;
        write_page_lists(store, &state).await;

        info!(
            processed = stats.processed,
            failed = stats.failed,
            skipped = stats.skipped,
            visited = frontier.visited_count(),
            "Crawl finished"
        );

        Ok(CrawlReport {
            mirrored: state.len(),
            stats,
            interrupted,
        })
    }

    /// Fetch only the images referenced by pages already in the mirror
    pub async fn run_images_only<F>(&self, timestamp: &str, shutdown: F) -> Result<CrawlReport, MirrorError>
    where
        F: Future<Output = ()> + Unpin,
    {
        let store = &self.context.store;
        store.ensure_root().await?;
        let mut state = StateTracker::load(store.root()).await?;
        let mut stats = RunStats::default();

        let mut candidates = Vec::new();
        for capture in images::mirrored_images(store.root(), timestamp, self.archive_host()) {
            if self.saved_copy(&capture.canonical, &state).await.is_some() {
                stats.skipped += 1;
            } else {
                candidates.push(capture);
            }
        }
        info!(images = candidates.len(), already_saved = stats.skipped, "Fetching mirrored pages' images");

        let interrupted = images::fetch_images(
            Arc::clone(&self.context),
            candidates,
            self.config.concurrency,
            self.config.max_retries,
            &mut state,
            &mut stats,
            shutdown,
        )
        .await;

        state.flush().await?;
        stats.write(store.root()).await?;

        Ok(CrawlReport {
            mirrored: state.len(),
            stats,
            interrupted,
        })
    }

    async fn apply(
        &self,
        outcome: Outcome,
        frontier: &mut Frontier,
        state: &mut StateTracker,
        replays: &mut VecDeque<Job>,
        stats: &mut RunStats,
    ) {
        let links = match outcome {
            Outcome::Saved { saved, write, links } => {
                record_saved(&saved, write, state, stats);
                links
            }
            Outcome::Replayed { links } => links,
            Outcome::Failed { task, error } => {
                let url = task.capture.canonical.key();
                if error.is_retryable() && frontier.retry(task) {
                    stats.retried += 1;
                    debug!(url = %url, error = %error, "Fetch failed, retrying");
                } else {
                    warn!(url = %url, error = %error, "Giving up");
                    stats.record_failure(url, &error);
                }
                return;
            }
        };

        for page in links.pages {
            self.admit(page, Scope::Path, frontier, state, replays, stats).await;
        }
        for asset in links.assets {
            self.admit(asset, Scope::Domain, frontier, state, replays, stats).await;
        }
        for image in links.images {
            frontier.collect_image(image);
        }
    }

    async fn admit(
        &self,
        capture: CaptureRef,
        scope: Scope,
        frontier: &mut Frontier,
        state: &StateTracker,
        replays: &mut VecDeque<Job>,
        stats: &mut RunStats,
    ) {
        if !frontier.is_candidate(&capture.canonical, scope) {
            return;
        }

        let saved = self.saved_copy(&capture.canonical, state).await;
        let url = capture.canonical.key();
        match frontier.admit(capture.clone(), scope, saved.is_some()) {
            Admission::Queued => debug!(url = %url, "Queued"),
            Admission::AlreadySaved => {
                stats.skipped += 1;
                if let Some((path, content_type)) = saved {
                    replays.push_back(Job::Replay {
                        capture,
                        path,
                        content_type,
                    });
                }
            }
            Admission::Dropped | Admission::CapReached => {
                stats.dropped += 1;
                debug!(url = %url, "Frontier full, dropping");
            }
            Admission::Duplicate | Admission::OutOfBounds => {}
        }
    }

    /// Where the mirror already holds this resource, if it does and
    /// re-fetching was not asked for
    async fn saved_copy(&self, canonical: &CanonicalUrl, state: &StateTracker) -> Option<(PathBuf, String)> {
        if self.config.overwrite {
            return None;
        }
        let store = &self.context.store;

        if let Some(entry) = state.get(canonical) {
            if store.exists(&entry.path).await {
                return Some((entry.path.clone(), entry.content_type.clone()));
            }
        }

        // Files from a run whose state file was lost
        let guess = local_path(canonical, DEFAULT_CONTENT_TYPE);
        if store.exists(&guess).await {
            let content_type = mime_guess::from_path(&guess)
                .first_raw()
                .unwrap_or(DEFAULT_CONTENT_TYPE)
                .to_string();
            return Some((guess, content_type));
        }
        None
    }
}

pub(crate) fn record_saved(saved: &SavedResource, write: WriteOutcome, state: &mut StateTracker, stats: &mut RunStats) {
    stats.processed += 1;
    stats.count_content_type(&saved.content_type);
    if write == WriteOutcome::Unchanged {
        stats.unchanged += 1;
    }
    state.record(saved);
}

/// One sorted list of saved pages per mirrored host
async fn write_page_lists(store: &MirrorStore, state: &StateTracker) {
    let mut hosts: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, entry) in state.entries() {
        if classify(&entry.content_type) != ContentKind::Html {
            continue;
        }
        if let Some(first) = entry.path.components().next() {
            let host = first.as_os_str().to_string_lossy().into_owned();
            hosts.entry(host).or_default().push(key.clone());
        }
    }

    for (host, mut keys) in hosts {
        keys.sort();
        let mut list = keys.join("\n");
        list.push('\n');
        let path = PathBuf::from(&host).join(PAGE_LIST_FILE);
        if let Err(e) = store.write(&path, list.as_bytes(), true).await {
            warn!(host = %host, error = %e, "Could not write page list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockFetcher;
    use crate::fetch::FetchError;
    use std::path::Path;

    const HOST: &str = "https://archive.example";

    fn config() -> CrawlConfig {
        CrawlConfig {
            archive_host: HOST.to_string(),
            concurrency: 3,
            max_retries: 2,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            ..CrawlConfig::default()
        }
    }

    fn archived(path: &str) -> String {
        format!("{}/web/2002/http://site.org{}", HOST, path)
    }

    fn seed() -> CaptureRef {
        CaptureRef::parse("/web/2002/http://site.org/a/").unwrap()
    }

    fn bounds() -> Bounds {
        Bounds::new(&seed().canonical, None)
    }

    fn site() -> Arc<MockFetcher> {
        let mock = Arc::new(MockFetcher::new());
        // a/ <-> a/b.html form a cycle; a/out.html is never archived
        mock.page(
            &archived("/a/"),
            r#"<html><body>
                <a href="b.html">b</a>
                <a href="/web/2002/http://site.org/other/">out of bounds</a>
                <a href="out.html">missing</a>
                <img src="/web/2002im_/http://site.org/x.gif">
            </body></html>"#,
        );
        mock.page(
            &archived("/a/b.html"),
            r#"<html><body><a href="/web/2002/http://www.site.org/a/">home</a>
                <img src="../x.gif"></body></html>"#,
        );
        mock.insert(
            &format!("{}/web/2002im_/http://site.org/x.gif", HOST),
            200,
            "image/gif",
            b"GIF89a",
        );
        mock
    }

    async fn crawl(mock: Arc<MockFetcher>, root: &Path) -> CrawlReport {
        let crawler = Crawler::new(config(), mock, root.to_path_buf()).unwrap();
        crawler
            .run(vec![seed()], bounds(), std::future::pending())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_crawl_follows_cycles_once() {
        let dir = tempfile::tempdir().unwrap();
        let mock = site();
        let report = crawl(mock.clone(), dir.path()).await;

        assert!(dir.path().join("site.org/a/index.html").exists());
        assert!(dir.path().join("site.org/a/b.html").exists());
        assert_eq!(std::fs::read(dir.path().join("site.org/x.gif")).unwrap(), b"GIF89a");
        assert!(!dir.path().join("site.org/other").exists());

        assert_eq!(mock.times_requested(&archived("/a/")), 1);
        assert_eq!(mock.times_requested(&archived("/a/b.html")), 1);
        assert_eq!(report.stats.processed, 3);
        assert!(!report.interrupted);
        assert_eq!(report.stats.by_content_type["image/gif"], 1);
    }

    #[tokio::test]
    async fn test_missing_page_is_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mock = site();
        let report = crawl(mock.clone(), dir.path()).await;

        // One attempt plus two retries
        assert_eq!(mock.times_requested(&archived("/a/out.html")), 3);
        assert_eq!(report.stats.retried, 2);
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.failures[0].url, "site.org/a/out.html");
        assert_eq!(report.stats.failures[0].error, FetchError::Status(404).to_string());
    }

    #[tokio::test]
    async fn test_second_run_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let first = site();
        crawl(first, dir.path()).await;
        let page = std::fs::read(dir.path().join("site.org/a/index.html")).unwrap();

        // Only the page that never made it into the mirror is tried again
        let second = site();
        let report = crawl(second.clone(), dir.path()).await;
        assert_eq!(second.times_requested(&archived("/a/")), 0);
        assert_eq!(second.times_requested(&archived("/a/b.html")), 0);
        assert_eq!(second.call_count(), 3);
        assert_eq!(report.stats.processed, 0);
        assert_eq!(report.stats.skipped, 3);
        assert_eq!(std::fs::read(dir.path().join("site.org/a/index.html")).unwrap(), page);
    }

    #[tokio::test]
    async fn test_state_and_statistics_are_written() {
        let dir = tempfile::tempdir().unwrap();
        crawl(site(), dir.path()).await;

        let state = StateTracker::load(dir.path()).await.unwrap();
        assert_eq!(state.len(), 3);
        let stats: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(crate::mirror::STATS_FILE)).unwrap())
                .unwrap();
        assert_eq!(stats["processed"], 3);

        let pages = std::fs::read_to_string(dir.path().join("site.org").join(PAGE_LIST_FILE)).unwrap();
        assert_eq!(pages, "site.org/a/b.html\nsite.org/a/index.html\n");
    }

    #[tokio::test]
    async fn test_placeholder_page_is_not_saved() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockFetcher::new());
        mock.page(
            &archived("/a/"),
            "<html><head><title>Wayback Machine</title></head><body></body></html>",
        );
        let report = crawl(mock.clone(), dir.path()).await;

        assert!(!dir.path().join("site.org/a/index.html").exists());
        assert_eq!(report.stats.failed, 1);
        // Not retried: the archive will keep answering the same way
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_admitting_work() {
        let dir = tempfile::tempdir().unwrap();
        let crawler = Crawler::new(config(), site(), dir.path().to_path_buf()).unwrap();
        let report = crawler
            .run(vec![seed()], bounds(), std::future::ready(()))
            .await
            .unwrap();

        assert!(report.interrupted);
        assert!(dir.path().join(crate::mirror::STATS_FILE).exists());
    }

    #[tokio::test]
    async fn test_images_only_fetches_missing_images() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("site.org/a")).unwrap();
        std::fs::write(
            dir.path().join("site.org/a/index.html"),
            r#"<img src="../x.gif"><img src="here.png">"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("site.org/a/here.png"), b"PNG").unwrap();

        let mock = site();
        let crawler = Crawler::new(config(), mock.clone(), dir.path().to_path_buf()).unwrap();
        let report = crawler
            .run_images_only("2002", std::future::pending())
            .await
            .unwrap();

        assert_eq!(report.stats.processed, 1);
        assert_eq!(report.stats.skipped, 1);
        assert!(!report.interrupted);
        assert_eq!(mock.call_count(), 1);
        assert_eq!(std::fs::read(dir.path().join("site.org/x.gif")).unwrap(), b"GIF89a");
    }

    #[tokio::test]
    async fn test_extensionless_page_links_stay_live_after_rewrite() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockFetcher::new());
        mock.page(&archived("/a/page"), r#"<p><a href="other.html">other</a></p>"#);
        mock.page(&archived("/a/page/other.html"), "<p>other</p>");

        let seed = CaptureRef::parse("/web/2002/http://site.org/a/page").unwrap();
        let bounds = Bounds::new(&seed.canonical, Some("site.org/a/"));
        let crawler = Crawler::new(config(), mock, dir.path().to_path_buf()).unwrap();
        let report = crawler.run(vec![seed], bounds, std::future::pending()).await.unwrap();
        assert_eq!(report.stats.processed, 2);
        assert!(dir.path().join("site.org/a/page/other.html").exists());

        crate::rewrite::rewrite_mirror(dir.path(), &Url::parse(HOST).unwrap()).unwrap();
        let page = std::fs::read_to_string(dir.path().join("site.org/a/page/index.html")).unwrap();
        assert!(page.contains(r#"<a href="other.html">other</a>"#), "{}", page);
        assert!(!page.contains("data-mirror-href"));
    }

    #[tokio::test]
    async fn test_failed_write_is_a_failure_and_stays_out_of_state() {
        let dir = tempfile::tempdir().unwrap();
        // A plain file where the host directory has to go
        std::fs::write(dir.path().join("site.org"), b"not a directory").unwrap();

        let report = crawl(site(), dir.path()).await;
        assert_eq!(report.stats.failed, 1);
        assert_eq!(report.stats.processed, 0);
        assert_eq!(report.stats.failures[0].url, "site.org/a/index.html");

        let state = StateTracker::load(dir.path()).await.unwrap();
        assert!(state.get(&seed().canonical).is_none());
        assert_eq!(state.len(), 0);
        if let Ok(raw) = std::fs::read_to_string(dir.path().join(".mirror-state.json")) {
            assert!(!raw.contains("site.org/a/index.html"));
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CrawlConfig {
            concurrency: 0,
            ..config()
        };
        let result = Crawler::new(config, Arc::new(MockFetcher::new()), PathBuf::from("unused"));
        assert!(matches!(result, Err(ConfigError::NoWorkers)));
    }
}
