// src/mirror/state.rs
// =============================================================================
// Crawl state that survives between runs, plus the per-run statistics.
//
// The state file (.mirror-state.json in the mirror root) maps each canonical
// key to the hash, local path and content type of what was saved for it. A
// second run loads it and skips everything already recorded, which is what
// makes an interrupted crawl resumable.
// =============================================================================

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::store::write_atomically;
use crate::archive::CanonicalUrl;
use crate::error::MirrorError;

pub const STATE_FILE: &str = ".mirror-state.json";
pub const STATS_FILE: &str = "crawl-stats.json";

const STATE_VERSION: u32 = 1;

/// A resource that was fetched and written to the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedResource {
    pub canonical: CanonicalUrl,
    pub local_path: PathBuf,
    pub content_type: String,
    pub content_hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub hash: String,
    pub path: PathBuf,
    pub content_type: String,
}

#[derive(Serialize, Deserialize)]
struct StateFile {
    version: u32,
    entries: BTreeMap<String, StateEntry>,
}

pub struct StateTracker {
    file: PathBuf,
    entries: BTreeMap<String, StateEntry>,
    dirty: bool,
}

impl StateTracker {
    /// Load the state of a mirror root. A missing file is an empty state.
    pub async fn load(root: &Path) -> Result<Self, MirrorError> {
        let file = root.join(STATE_FILE);

        let entries = match tokio::fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice::<StateFile>(&bytes) {
                Ok(state) => state.entries,
                Err(e) => {
                    // Every entry can be rebuilt by crawling again
                    warn!(path = %file.display(), error = %e, "Unreadable crawl state, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(MirrorError::io(file, e)),
        };

        debug!(entries = entries.len(), "Loaded crawl state");
        Ok(Self {
            file,
            entries,
            dirty: false,
        })
    }

    pub fn get(&self, canonical: &CanonicalUrl) -> Option<&StateEntry> {
        self.entries.get(&canonical.key())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &StateEntry)> {
        self.entries.iter()
    }

    /// Record a verified write. Returns false when the hash was already known.
    pub fn record(&mut self, saved: &SavedResource) -> bool {
        let entry = StateEntry {
            hash: saved.content_hash.clone(),
            path: saved.local_path.clone(),
            content_type: saved.content_type.clone(),
        };

        match self.entries.get(&saved.canonical.key()) {
            Some(existing) if *existing == entry => false,
            _ => {
                self.entries.insert(saved.canonical.key(), entry);
                self.dirty = true;
                true
            }
        }
    }

    /// Write the state file if anything changed since the last flush
    pub async fn flush(&mut self) -> Result<bool, MirrorError> {
        if !self.dirty {
            return Ok(false);
        }

        let state = StateFile {
            version: STATE_VERSION,
            entries: self.entries.clone(),
        };
        let json = serde_json::to_vec_pretty(&state)
            .map_err(|e| MirrorError::Parse(format!("crawl state: {}", e)))?;
        write_atomically(&self.file, &json).await?;

        self.dirty = false;
        debug!(entries = self.entries.len(), "Flushed crawl state");
        Ok(true)
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A page that never made it into the mirror
#[derive(Debug, Clone, Serialize)]
pub struct FailedResource {
    pub url: String,
    pub error: String,
}

/// Summary of one run, written to crawl-stats.json
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStats {
    /// Fetched and saved (or found unchanged)
    pub processed: usize,
    /// Gave up after retries or a permanent error
    pub failed: usize,
    /// Not fetched because the mirror already had it
    pub skipped: usize,
    /// Fetched again with --overwrite and identical to what was saved
    pub unchanged: usize,
    pub retried: usize,
    /// Refused by the frontier's queue cap or task limit
    pub dropped: usize,
    pub by_content_type: BTreeMap<String, usize>,
    pub failures: Vec<FailedResource>,
}

impl RunStats {
    pub fn count_content_type(&mut self, content_type: &str) {
        let essence = crate::fetch::mime_essence(content_type);
        *self.by_content_type.entry(essence).or_insert(0) += 1;
    }

    pub fn record_failure(&mut self, url: impl Into<String>, error: impl ToString) {
        self.failed += 1;
        self.failures.push(FailedResource {
            url: url.into(),
            error: error.to_string(),
        });
    }

    pub async fn write(&self, root: &Path) -> Result<(), MirrorError> {
        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| MirrorError::Parse(format!("run statistics: {}", e)))?;
        write_atomically(&root.join(STATS_FILE), &json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saved(key: &str, body: &[u8]) -> SavedResource {
        let canonical = CanonicalUrl::from_key(key).unwrap();
        SavedResource {
            local_path: PathBuf::from(canonical.key()),
            canonical,
            content_type: "text/html".to_string(),
            content_hash: content_hash(body),
        }
    }

    #[tokio::test]
    async fn test_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateTracker::load(dir.path()).await.unwrap();
        assert_eq!(state.len(), 0);
        assert!(!state.flush().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), b"{ not json").unwrap();
        let state = StateTracker::load(dir.path()).await.unwrap();
        assert_eq!(state.len(), 0);
    }

    #[tokio::test]
    async fn test_record_flush_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = StateTracker::load(dir.path()).await.unwrap();

        assert!(state.record(&saved("site.org/a/index.html", b"a")));
        assert!(!state.record(&saved("site.org/a/index.html", b"a")));
        assert!(state.record(&saved("site.org/a/index.html", b"changed")));
        assert!(state.flush().await.unwrap());
        assert!(!state.flush().await.unwrap());

        let reloaded = StateTracker::load(dir.path()).await.unwrap();
        let canonical = CanonicalUrl::from_key("site.org/a/index.html").unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get(&canonical).unwrap().hash, content_hash(b"changed"));
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn test_stats_counts_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut stats = RunStats::default();
        stats.count_content_type("text/html; charset=utf-8");
        stats.count_content_type("image/gif");
        stats.count_content_type("image/gif");
        stats.record_failure("site.org/y.gif", "HTTP 404");

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.by_content_type["text/html"], 1);
        assert_eq!(stats.by_content_type["image/gif"], 2);

        stats.write(dir.path()).await.unwrap();
        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(STATS_FILE)).unwrap()).unwrap();
        assert_eq!(written["failures"][0]["url"], "site.org/y.gif");
        assert_eq!(written["by_content_type"]["image/gif"], 2);
    }
}
