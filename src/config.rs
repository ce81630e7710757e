// src/config.rs
// =============================================================================
// Tuning knobs for a crawl, collected in one place.
//
// Every value here used to be a constant sprinkled through the crawler.
// The scheduler, the fetcher and the state tracker all read from the same
// CrawlConfig, which is built from command-line flags in main.rs.
// =============================================================================

use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_ARCHIVE_HOST: &str = "https://web.archive.org";

// Titles the archive host gives its own error pages. A page with one of these
// titles is the archive telling us it has no capture, not the site's content.
const DEFAULT_PLACEHOLDER_TITLES: &[&str] = &[
    "Wayback Machine",
    "Internet Archive: Wayback Machine",
    "Wayback Machine has not archived that URL.",
];

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("concurrency must be at least 1")]
    NoWorkers,
    #[error("min delay {min:?} is larger than max delay {max:?}")]
    DelayRange { min: Duration, max: Duration },
    #[error("timeout {0:?} is outside the allowed 5-60s range")]
    Timeout(Duration),
    #[error("archive host '{0}' is not a valid http(s) URL")]
    ArchiveHost(String),
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Scheme and host of the snapshot service
    pub archive_host: String,
    /// Number of fetch workers running at once
    pub concurrency: usize,
    /// Attempts after the first one before a task is failed for good
    pub max_retries: u32,
    /// Per-request timeout
    pub timeout: Duration,
    /// Randomized pause before every fetch, lower bound
    pub min_delay: Duration,
    /// Randomized pause before every fetch, upper bound
    pub max_delay: Duration,
    /// Hard cap on admitted tasks for the whole run
    pub max_tasks: Option<usize>,
    /// Frontier size beyond which newly discovered links are dropped
    pub max_queued: usize,
    /// How often the crawl state is flushed to disk
    pub flush_interval: Duration,
    /// Stop admitting work after this long
    pub time_limit: Option<Duration>,
    /// Re-fetch resources even if they are already mirrored
    pub overwrite: bool,
    pub user_agent: String,
    pub placeholder_titles: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            archive_host: DEFAULT_ARCHIVE_HOST.to_string(),
            concurrency: 4,
            max_retries: 3,
            timeout: Duration::from_secs(30),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
            max_tasks: None,
            max_queued: 50_000,
            flush_interval: Duration::from_secs(30),
            time_limit: None,
            overwrite: false,
            user_agent: concat!("wayback-mirror/", env!("CARGO_PKG_VERSION")).to_string(),
            placeholder_titles: DEFAULT_PLACEHOLDER_TITLES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.min_delay > self.max_delay {
            return Err(ConfigError::DelayRange {
                min: self.min_delay,
                max: self.max_delay,
            });
        }
        if self.timeout < Duration::from_secs(5) || self.timeout > Duration::from_secs(60) {
            return Err(ConfigError::Timeout(self.timeout));
        }
        match url::Url::parse(&self.archive_host) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => Ok(()),
            _ => Err(ConfigError::ArchiveHost(self.archive_host.clone())),
        }
    }

    pub fn archive_host_url(&self) -> Result<url::Url, ConfigError> {
        url::Url::parse(&self.archive_host)
            .map_err(|_| ConfigError::ArchiveHost(self.archive_host.clone()))
    }
}
