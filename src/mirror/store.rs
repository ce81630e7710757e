// src/mirror/store.rs
// =============================================================================
// Writes resources under the mirror root.
//
// Writes go to a sibling ".part" file first and are renamed into place, so an
// interrupted run never leaves a half-written page that a later run would
// mistake for a saved one.
// =============================================================================

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::MirrorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New or changed bytes hit the disk
    Written,
    /// Overwrite requested but the file already had these exact bytes
    Unchanged,
    /// File already present and overwrite not requested
    Kept,
}

#[derive(Debug, Clone)]
pub struct MirrorStore {
    root: PathBuf,
}

impl MirrorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.root.join(relative)
    }

    pub async fn ensure_root(&self) -> Result<(), MirrorError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| MirrorError::io(&self.root, e))
    }

    pub async fn exists(&self, relative: &Path) -> bool {
        fs::try_exists(self.absolute(relative)).await.unwrap_or(false)
    }

    pub async fn read(&self, relative: &Path) -> Result<Vec<u8>, MirrorError> {
        let path = self.absolute(relative);
        fs::read(&path).await.map_err(|e| MirrorError::io(path, e))
    }

    pub async fn write(
        &self,
        relative: &Path,
        bytes: &[u8],
        overwrite: bool,
    ) -> Result<WriteOutcome, MirrorError> {
        let path = self.absolute(relative);

        if self.exists(relative).await {
            if !overwrite {
                return Ok(WriteOutcome::Kept);
            }
            if let Ok(existing) = fs::read(&path).await {
                if existing == bytes {
                    return Ok(WriteOutcome::Unchanged);
                }
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| MirrorError::io(parent, e))?;
        }

        let partial = partial_path(&path);
        fs::write(&partial, bytes)
            .await
            .map_err(|e| MirrorError::io(&partial, e))?;
        fs::rename(&partial, &path)
            .await
            .map_err(|e| MirrorError::io(&path, e))?;

        Ok(WriteOutcome::Written)
    }
}

/// Temp-file-then-rename, shared with the state tracker
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), MirrorError> {
    let partial = partial_path(path);
    fs::write(&partial, bytes)
        .await
        .map_err(|e| MirrorError::io(&partial, e))?;
    fs::rename(&partial, path)
        .await
        .map_err(|e| MirrorError::io(path, e))
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(dir.path());
        let rel = Path::new("site.org/a/index.html");

        let outcome = store.write(rel, b"<p>a</p>", false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
        assert_eq!(store.read(rel).await.unwrap(), b"<p>a</p>");
        assert!(!dir.path().join("site.org/a/index.html.part").exists());
    }

    #[tokio::test]
    async fn test_existing_file_is_kept_without_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(dir.path());
        let rel = Path::new("site.org/x.gif");

        store.write(rel, b"one", false).await.unwrap();
        assert_eq!(store.write(rel, b"two", false).await.unwrap(), WriteOutcome::Kept);
        assert_eq!(store.read(rel).await.unwrap(), b"one");
    }

    #[tokio::test]
    async fn test_overwrite_skips_identical_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = MirrorStore::new(dir.path());
        let rel = Path::new("site.org/x.gif");

        store.write(rel, b"one", false).await.unwrap();
        assert_eq!(store.write(rel, b"one", true).await.unwrap(), WriteOutcome::Unchanged);
        assert_eq!(store.write(rel, b"two", true).await.unwrap(), WriteOutcome::Written);
        assert_eq!(store.read(rel).await.unwrap(), b"two");
    }
}
