// src/mirror/path.rs
// =============================================================================
// Maps canonical URLs to files under the mirror root.
//
//   site.org/a/index.html  + text/html  -> site.org/a/index.html
//   site.org/a/index.html  + image/png  -> site.org/a/index.png  (implied index only)
//   site.org/x.gif         + image/gif  -> site.org/x.gif
//   site.org/my%20file.pdf + any        -> site.org/my file.pdf
//
// This is a pure function of (CanonicalUrl, content-type). Re-runs and the
// link rewriter's existence checks both depend on that.
// =============================================================================

use std::path::{Component, Path, PathBuf};

use crate::archive::CanonicalUrl;
use crate::fetch::mime_essence;

// The extensions a browser expects for the types an old site is made of
const EXTENSIONS: &[(&str, &str)] = &[
    ("text/html", "html"),
    ("application/xhtml+xml", "html"),
    ("text/css", "css"),
    ("text/javascript", "js"),
    ("application/javascript", "js"),
    ("application/x-javascript", "js"),
    ("text/plain", "txt"),
    ("text/xml", "xml"),
    ("application/xml", "xml"),
    ("application/json", "json"),
    ("application/pdf", "pdf"),
    ("image/gif", "gif"),
    ("image/jpeg", "jpg"),
    ("image/pjpeg", "jpg"),
    ("image/png", "png"),
    ("image/bmp", "bmp"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/x-icon", "ico"),
    ("image/vnd.microsoft.icon", "ico"),
];

const DEFAULT_EXTENSION: &str = "html";

// Characters that some filesystems refuse in a file name, plus the ones that
// would change the meaning of a relative link to it
const UNSAFE_CHARS: &[char] = &[':', '*', '?', '"', '<', '>', '|', '\\', '/', '#', '%'];

pub fn extension_for(content_type: &str) -> String {
    let essence = mime_essence(content_type);
    if let Some((_, ext)) = EXTENSIONS.iter().find(|(mime, _)| *mime == essence) {
        return ext.to_string();
    }
    mime_guess::get_mime_extensions_str(&essence)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Mirror-relative path for a resource
pub fn local_path(canonical: &CanonicalUrl, content_type: &str) -> PathBuf {
    let mut path = PathBuf::from(sanitize_segment(canonical.domain()));

    let segments: Vec<&str> = canonical
        .path()
        .split('/')
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .collect();

    let last = segments.len().saturating_sub(1);
    for (i, segment) in segments.iter().enumerate() {
        if i == last && canonical.is_implied_index() {
            path.push(format!("index.{}", extension_for(content_type)));
        } else {
            path.push(sanitize_segment(&decode_segment(segment)));
        }
    }

    path
}

/// Relative link from one mirrored file to another, e.g. "../x.gif"
pub fn relative_link(from_file: &Path, to_file: &Path) -> String {
    let from_dir: Vec<Component> = from_file
        .parent()
        .map(|p| p.components().collect())
        .unwrap_or_default();
    let to: Vec<Component> = to_file.components().collect();

    let common = from_dir
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<String> = Vec::new();
    for _ in common..from_dir.len() {
        parts.push("..".to_string());
    }
    for component in &to[common..] {
        parts.push(component.as_os_str().to_string_lossy().into_owned());
    }

    parts.join("/")
}

// A browser opening file:// URLs decodes escapes before touching the disk,
// so the file has to carry the decoded name
fn decode_segment(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if UNSAFE_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_capture_maps_to_index() {
        let canonical = CanonicalUrl::new("www.site.org", "/a/");
        assert_eq!(
            local_path(&canonical, "text/html; charset=utf-8"),
            PathBuf::from("site.org/a/index.html")
        );
    }

    #[test]
    fn test_implied_index_takes_extension_from_content_type() {
        let canonical = CanonicalUrl::new("site.org", "/logo");
        assert_eq!(local_path(&canonical, "image/png"), PathBuf::from("site.org/logo/index.png"));
        // Explicit names are never touched
        let explicit = CanonicalUrl::new("site.org", "/x.gif");
        assert_eq!(local_path(&explicit, "text/html"), PathBuf::from("site.org/x.gif"));
    }

    #[test]
    fn test_mapping_is_pure() {
        let canonical = CanonicalUrl::new("site.org", "/docs/Guide.HTML");
        let first = local_path(&canonical, "text/html");
        let second = local_path(&canonical, "text/html");
        assert_eq!(first, second);
        assert_eq!(first, PathBuf::from("site.org/docs/guide.html"));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("text/html"), "html");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("text/css; charset=utf-8"), "css");
        assert_eq!(extension_for("application/x-unknown-thing"), "html");
    }

    #[test]
    fn test_port_is_made_filesystem_safe() {
        let canonical = CanonicalUrl::new("site.org:8080", "/a.html");
        assert_eq!(local_path(&canonical, "text/html"), PathBuf::from("site.org_8080/a.html"));
    }

    #[test]
    fn test_escaped_segments_are_decoded() {
        let canonical = CanonicalUrl::new("site.org", "/my%20docs/caf%C3%A9.html");
        assert_eq!(local_path(&canonical, "text/html"), PathBuf::from("site.org/my docs/café.html"));

        // An escaped slash or hash must not leak into the layout or the link
        let canonical = CanonicalUrl::new("site.org", "/a%2Fb%23c.html");
        assert_eq!(local_path(&canonical, "text/html"), PathBuf::from("site.org/a_b_c.html"));
    }

    #[test]
    fn test_relative_links() {
        let page = Path::new("site.org/a/index.html");
        assert_eq!(relative_link(page, Path::new("site.org/x.gif")), "../x.gif");
        assert_eq!(relative_link(page, Path::new("site.org/a/b.html")), "b.html");
        assert_eq!(
            relative_link(page, Path::new("site.org/a/c/index.html")),
            "c/index.html"
        );
        assert_eq!(
            relative_link(Path::new("site.org/index.html"), Path::new("other.org/index.html")),
            "../other.org/index.html"
        );
    }
}
