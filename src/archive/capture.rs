// src/archive/capture.rs
// =============================================================================
// Parses archival URLs and turns them into canonical, timestamp-free keys.
//
// An archival URL looks like:
//
//   https://web.archive.org/web/20020821165006im_/http://www.site.org/x.gif
//                               ^timestamp    ^flavor ^original URL
//
// Everything downstream (frontier dedup, crawl state, path mapping, link
// rewriting) works on CanonicalUrl, never on the raw archival string.
// =============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

use crate::error::MirrorError;

// /web/<timestamp>[<flavor>]/<original>
static CAPTURE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)/web/(\d{1,17})([a-z]{2}_)?/+(.+)$").expect("capture pattern is valid")
});

// Matches both "http://" and the "http:/" left behind by text substitution
static SCHEME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(https?):/+").expect("scheme pattern is valid"));

const HOST_PREFIXES: &[&str] = &["www.", "ww2.", "www2."];

const INERT_SCHEMES: &[&str] = &["javascript:", "data:", "about:", "blob:"];

/// How the archive was asked to render a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureFlavor {
    Page,
    Image,
    Frame,
    Other,
}

impl CaptureFlavor {
    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(|f| f.to_ascii_lowercase()).as_deref() {
            None | Some("") | Some("mp_") => CaptureFlavor::Page,
            Some("im_") => CaptureFlavor::Image,
            Some("if_") | Some("fw_") => CaptureFlavor::Frame,
            Some(_) => CaptureFlavor::Other,
        }
    }

    /// The flag to put back into an archival URL when fetching
    pub fn flag(self) -> &'static str {
        match self {
            CaptureFlavor::Page => "",
            CaptureFlavor::Image => "im_",
            CaptureFlavor::Frame => "if_",
            CaptureFlavor::Other => "id_",
        }
    }
}

/// Timestamp-independent identity of an original-site resource.
///
/// Construction enforces the normalization rules: lowercase, no `www.`/`ww2.`
/// prefix, no default port, no query or fragment, and directory-style paths
/// end in `index.html`. Equality and hashing only look at domain + path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalUrl {
    domain: String,
    path: String,
    implied_index: bool,
}

impl CanonicalUrl {
    pub fn new(domain: &str, path: &str) -> Self {
        let domain = normalize_host(domain);

        let path = path.split(|c| c == '?' || c == '#').next().unwrap_or("");
        let mut path = path.to_ascii_lowercase();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }
        while path.contains("//") {
            path = path.replace("//", "/");
        }

        let last_segment = path.rsplit('/').next().unwrap_or("").to_string();
        let implied_index = last_segment.is_empty() || !has_extension(&last_segment);
        if last_segment.is_empty() {
            path.push_str("index.html");
        } else if implied_index {
            path.push_str("/index.html");
        }

        Self {
            domain,
            path,
            implied_index,
        }
    }

    pub fn from_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?;
        if host.is_empty() {
            return None;
        }
        // Url::port() is already None for the scheme's default port
        let domain = match url.port() {
            Some(port) if port != 80 && port != 443 => format!("{}:{}", host, port),
            _ => host.to_string(),
        };
        Some(Self::new(&domain, url.path()))
    }

    /// Rebuild from a `domain/path` key, as stored in the crawl state
    pub fn from_key(key: &str) -> Option<Self> {
        let (domain, path) = match key.split_once('/') {
            Some((domain, path)) => (domain, path),
            None => (key, ""),
        };
        if domain.is_empty() {
            return None;
        }
        Some(Self::new(domain, path))
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// True when the original URL named a directory, so the file name was
    /// made up and its extension depends on the content type
    pub fn is_implied_index(&self) -> bool {
        self.implied_index
    }

    pub fn key(&self) -> String {
        format!("{}{}", self.domain, self.path)
    }

    /// The page as an http URL, used as the base for relative references
    pub fn to_url(&self) -> Option<Url> {
        Url::parse(&format!("http://{}{}", self.domain, self.path)).ok()
    }
}

impl PartialEq for CanonicalUrl {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.path == other.path
    }
}

impl Eq for CanonicalUrl {}

impl Hash for CanonicalUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for CanonicalUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        self.domain
            .cmp(&other.domain)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.domain, self.path)
    }
}

/// A specific snapshot of a resource, only alive while deciding what to fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRef {
    pub canonical: CanonicalUrl,
    pub timestamp: String,
    pub flavor: CaptureFlavor,
    /// Original URL without fragment, host prefix kept for display and fetching
    pub original: Url,
    /// In-page anchor, kept apart so it never affects the canonical key
    pub fragment: Option<String>,
}

impl CaptureRef {
    /// Parse an archival URL (absolute or host-relative)
    pub fn parse(input: &str) -> Result<Self, MirrorError> {
        let captures = CAPTURE_PATTERN
            .captures(input.trim())
            .ok_or_else(|| MirrorError::Parse(input.to_string()))?;

        let timestamp = captures[1].to_string();
        let flavor = CaptureFlavor::from_flag(captures.get(2).map(|m| m.as_str()));
        let rest = &captures[3];

        let original = if SCHEME_PATTERN.is_match(rest) {
            SCHEME_PATTERN.replace(rest, "$1://").into_owned()
        } else {
            format!("http://{}", rest)
        };

        let original =
            Url::parse(&original).map_err(|_| MirrorError::Parse(input.to_string()))?;

        Self::from_original(original, &timestamp, flavor)
            .ok_or_else(|| MirrorError::Parse(input.to_string()))
    }

    pub fn from_original(mut original: Url, timestamp: &str, flavor: CaptureFlavor) -> Option<Self> {
        if original.scheme() != "http" && original.scheme() != "https" {
            return None;
        }
        let canonical = CanonicalUrl::from_url(&original)?;
        let fragment = original.fragment().map(|f| f.to_string());
        original.set_fragment(None);

        Some(Self {
            canonical,
            timestamp: timestamp.to_string(),
            flavor,
            original,
            fragment,
        })
    }

    /// The URL to request from the archive host for this capture
    pub fn archive_url(&self, archive_host: &Url) -> String {
        format!(
            "{}/web/{}{}/{}",
            archive_host.as_str().trim_end_matches('/'),
            self.timestamp,
            self.flavor.flag(),
            self.original
        )
    }

    pub fn with_flavor(mut self, flavor: CaptureFlavor) -> Self {
        self.flavor = flavor;
        self
    }
}

/// What an attribute value on a page points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// A resource of some original site, reachable through the archive
    Capture(CaptureRef),
    /// Something the mirror can never serve (mail, other sites, archive assets)
    External(String),
    /// Anchors, scripts, inline data: nothing to fetch or rewrite
    Inert,
}

/// Resolves attribute values found on one page
#[derive(Debug, Clone)]
pub struct ReferenceBase {
    original: Url,
    domain: String,
    timestamp: String,
    archive_host: Url,
}

impl ReferenceBase {
    /// An extensionless page is mirrored as a directory index, so its
    /// relative references resolve inside that directory, exactly as they
    /// do from the mirrored copy
    pub fn for_capture(capture: &CaptureRef, archive_host: &Url) -> Self {
        let mut original = capture.original.clone();
        if capture.canonical.is_implied_index() && !original.path().ends_with('/') {
            let directory = format!("{}/", original.path());
            original.set_path(&directory);
        }
        Self {
            original,
            domain: capture.canonical.domain().to_string(),
            timestamp: capture.timestamp.clone(),
            archive_host: archive_host.clone(),
        }
    }

    /// Base for a page that only exists in the mirror (the rewrite pass)
    pub fn for_local_page(page: &CanonicalUrl, timestamp: &str, archive_host: &Url) -> Option<Self> {
        Some(Self {
            original: page.to_url()?,
            domain: page.domain().to_string(),
            timestamp: timestamp.to_string(),
            archive_host: archive_host.clone(),
        })
    }

    pub fn resolve(&self, raw: &str, hint: CaptureFlavor) -> Reference {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            return Reference::Inert;
        }

        let lower = raw.to_ascii_lowercase();
        if INERT_SCHEMES.iter().any(|scheme| lower.starts_with(scheme)) {
            return Reference::Inert;
        }
        if lower.starts_with("mailto:") || lower.starts_with("tel:") {
            return Reference::External(raw.to_string());
        }

        if CAPTURE_PATTERN.is_match(raw) {
            return match CaptureRef::parse(raw) {
                Ok(capture) => Reference::Capture(capture),
                Err(_) => Reference::External(raw.to_string()),
            };
        }

        let absolute = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => match self.original.join(raw) {
                Ok(url) => url,
                Err(_) => return Reference::Inert,
            },
            Err(_) => return Reference::Inert,
        };

        if absolute.scheme() != "http" && absolute.scheme() != "https" {
            return Reference::External(raw.to_string());
        }
        if absolute.host_str() == self.archive_host.host_str() {
            return Reference::External(raw.to_string());
        }

        match CaptureRef::from_original(absolute, &self.timestamp, hint) {
            Some(capture) if capture.canonical.domain() == self.domain => {
                Reference::Capture(capture)
            }
            _ => Reference::External(raw.to_string()),
        }
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    let host = host.strip_suffix(":80").unwrap_or(&host);
    for prefix in HOST_PREFIXES {
        if let Some(stripped) = host.strip_prefix(prefix) {
            return stripped.to_string();
        }
    }
    host.to_string()
}

fn has_extension(segment: &str) -> bool {
    match segment.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && !ext.is_empty(),
        None => false,
    }
}
