// src/crawl/links.rs
// =============================================================================
// Finds the references a saved page makes to the rest of its site.
//
// Every element attribute that can point somewhere is looked at:
//   href, src, background, action      - plain references
//   style="...url(...)" and <style>    - CSS background images
//   data-mirror-*                      - references the link rewriter disabled
//                                        on an earlier run, so a resumed
//                                        crawl still sees them
//
// References are split three ways, because they are admitted differently:
//   pages   - bounded by domain and path
//   assets  - stylesheets, scripts, frames' helpers: bounded by domain only
//   images  - collected for the second, dedicated image pass
// =============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::archive::{CaptureFlavor, CaptureRef, Reference, ReferenceBase};
use crate::rewrite::DISABLED_PREFIX;

static ANY_ELEMENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("*").expect("universal selector is valid"));

static STYLE_ELEMENT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("style").expect("style selector is valid"));

pub(crate) static CSS_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).expect("css url pattern is valid")
});

/// What a reference is used for on the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Page,
    Frame,
    Asset,
    Image,
}

impl LinkRole {
    /// Role of attribute `attr` on element `tag`, if it references anything
    pub fn of(tag: &str, attr: &str) -> Option<Self> {
        match (tag, attr) {
            (_, "background") => Some(LinkRole::Image),
            ("img", "src") | ("input", "src") => Some(LinkRole::Image),
            ("frame", "src") | ("iframe", "src") => Some(LinkRole::Frame),
            ("link", "href") | ("script", "src") | ("embed", "src") | ("source", "src") => {
                Some(LinkRole::Asset)
            }
            (_, "href") | ("form", "action") => Some(LinkRole::Page),
            _ => None,
        }
    }

    fn flavor(self) -> CaptureFlavor {
        match self {
            LinkRole::Page => CaptureFlavor::Page,
            LinkRole::Frame => CaptureFlavor::Frame,
            // Raw bytes, so url() references inside stylesheets stay original
            LinkRole::Asset => CaptureFlavor::Other,
            LinkRole::Image => CaptureFlavor::Image,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DiscoveredLinks {
    pub pages: Vec<CaptureRef>,
    pub assets: Vec<CaptureRef>,
    pub images: Vec<CaptureRef>,
}

impl DiscoveredLinks {
    pub fn len(&self) -> usize {
        self.pages.len() + self.assets.len() + self.images.len()
    }

    fn push(&mut self, base: &ReferenceBase, raw: &str, role: LinkRole) {
        let capture = match base.resolve(raw, role.flavor()) {
            Reference::Capture(capture) => capture,
            _ => return,
        };
        match role {
            LinkRole::Page | LinkRole::Frame => self.pages.push(capture),
            LinkRole::Asset => self.assets.push(capture),
            LinkRole::Image => self.images.push(capture),
        }
    }
}

/// All same-site references on an HTML page
pub fn extract_page_links(html: &str, base: &ReferenceBase) -> DiscoveredLinks {
    let mut links = DiscoveredLinks::default();
    let document = Html::parse_document(html);

    for element in document.select(&ANY_ELEMENT) {
        let tag = element.value().name();
        for (name, value) in element.value().attrs() {
            if name.eq_ignore_ascii_case("style") {
                for url in css_urls(value) {
                    links.push(base, url, LinkRole::Image);
                }
                continue;
            }

            let name = name.strip_prefix(DISABLED_PREFIX).unwrap_or(name);
            if let Some(role) = LinkRole::of(tag, name) {
                links.push(base, value, role);
            }
        }
    }

    for style in document.select(&STYLE_ELEMENT) {
        let css: String = style.text().collect();
        for url in css_urls(&css) {
            links.push(base, url, LinkRole::Image);
        }
    }

    links
}

/// Images referenced from a stylesheet
pub fn extract_css_links(css: &str, base: &ReferenceBase) -> DiscoveredLinks {
    let mut links = DiscoveredLinks::default();
    for url in css_urls(css) {
        links.push(base, url, LinkRole::Image);
    }
    links
}

pub fn css_urls(css: &str) -> impl Iterator<Item = &str> {
    CSS_URL
        .captures_iter(css)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
}
