// src/rewrite/index.rs
// =============================================================================
// What is actually on disk under the mirror root.
//
// The link rewriter never trusts the crawl's bookkeeping: a reference is only
// made live when the file it points to exists right now.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::archive::CanonicalUrl;
use crate::fetch::DEFAULT_CONTENT_TYPE;
use crate::mirror::local_path;

pub struct MirrorIndex {
    files: HashSet<PathBuf>,
    /// Directory -> its index file, whatever extension it was saved with
    indexes: HashMap<PathBuf, PathBuf>,
}

impl MirrorIndex {
    pub fn build(root: &Path) -> Self {
        let mut files = HashSet::new();
        let mut indexes = HashMap::new();

        for relative in mirrored_files(root) {
            let is_index = relative
                .file_stem()
                .map(|stem| stem == "index")
                .unwrap_or(false);
            if is_index {
                if let Some(dir) = relative.parent() {
                    // index.html wins over index.png and friends
                    let is_html = relative.extension().map(|e| e == "html").unwrap_or(false);
                    if is_html || !indexes.contains_key(dir) {
                        indexes.insert(dir.to_path_buf(), relative.clone());
                    }
                }
            }
            files.insert(relative);
        }

        debug!(files = files.len(), "Indexed mirror");
        Self { files, indexes }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// The saved file for a canonical URL, if there is one
    pub fn lookup(&self, canonical: &CanonicalUrl) -> Option<&Path> {
        let path = local_path(canonical, DEFAULT_CONTENT_TYPE);
        if let Some(found) = self.files.get(&path) {
            return Some(found.as_path());
        }
        if path.file_name().map(|name| name == "index.html").unwrap_or(false) {
            return self.indexes.get(path.parent()?).map(PathBuf::as_path);
        }
        None
    }

    /// The file a page-relative reference like "../x.gif" points at, when
    /// it names an existing mirror file
    pub fn local_target(&self, page: &Path, raw: &str) -> Option<PathBuf> {
        if raw.is_empty() || raw.starts_with('/') || raw.starts_with('#') || raw.contains(':') {
            return None;
        }
        let path = raw.split(|c| c == '?' || c == '#').next().unwrap_or("");
        if path.is_empty() || path.ends_with('/') {
            return None;
        }

        let mut parts: Vec<String> = page
            .parent()
            .map(|dir| {
                dir.components()
                    .filter_map(|c| match c {
                        Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    parts.pop()?;
                }
                other => parts.push(other.to_string()),
            }
        }

        let target: PathBuf = parts.iter().collect();
        if self.files.contains(&target) {
            Some(target)
        } else {
            None
        }
    }
}

/// Every resource file in the mirror, relative to the root. Files directly
/// in the root (crawl state, statistics) are not part of any site.
pub fn mirrored_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .filter(|relative| relative.components().count() >= 2)
        .filter(|relative| relative.extension().map(|e| e != "part").unwrap_or(true))
        .collect()
}

/// HTML files in the mirror with the canonical URL each one stands for
pub fn mirrored_pages(root: &Path) -> Vec<(PathBuf, CanonicalUrl)> {
    mirrored_files(root)
        .into_iter()
        .filter_map(|relative| {
            let ext = relative.extension()?.to_str()?.to_ascii_lowercase();
            if ext != "html" && ext != "htm" {
                return None;
            }
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            let canonical = CanonicalUrl::from_key(&key)?;
            Some((relative, canonical))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirror() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            "site.org/a/index.html",
            "site.org/a/b.html",
            "site.org/logo/index.png",
            "site.org/x.gif",
            "site.org/a/half.html.part",
            ".mirror-state.json",
        ] {
            let path = dir.path().join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"").unwrap();
        }
        dir
    }

    #[test]
    fn test_lookup_by_canonical_url() {
        let dir = mirror();
        let index = MirrorIndex::build(dir.path());
        assert_eq!(index.len(), 4);

        let lookup = |domain: &str, path: &str| {
            index
                .lookup(&CanonicalUrl::new(domain, path))
                .map(|p| p.to_path_buf())
        };
        assert_eq!(lookup("www.site.org", "/a/"), Some(PathBuf::from("site.org/a/index.html")));
        assert_eq!(lookup("site.org", "/X.gif"), Some(PathBuf::from("site.org/x.gif")));
        assert_eq!(lookup("site.org", "/logo"), Some(PathBuf::from("site.org/logo/index.png")));
        assert_eq!(lookup("site.org", "/a/half.html"), None);
        assert_eq!(lookup("site.org", "/missing/"), None);
    }

    #[test]
    fn test_local_targets() {
        let dir = mirror();
        let index = MirrorIndex::build(dir.path());
        let page = Path::new("site.org/a/index.html");

        assert_eq!(index.local_target(page, "../x.gif"), Some(PathBuf::from("site.org/x.gif")));
        assert_eq!(index.local_target(page, "b.html#top"), Some(PathBuf::from("site.org/a/b.html")));
        assert_eq!(index.local_target(page, "./b.html"), Some(PathBuf::from("site.org/a/b.html")));
        assert_eq!(index.local_target(page, "c.html"), None);
        assert_eq!(index.local_target(page, "../../../etc/passwd"), None);
        assert_eq!(index.local_target(page, "/web/2002/http://site.org/x.gif"), None);
        assert_eq!(index.local_target(page, "mailto:me@site.org"), None);
    }

    #[test]
    fn test_mirrored_pages() {
        let dir = mirror();
        let pages: Vec<String> = mirrored_pages(dir.path())
            .into_iter()
            .map(|(_, canonical)| canonical.key())
            .collect();
        assert_eq!(pages, vec!["site.org/a/b.html", "site.org/a/index.html"]);
    }
}
