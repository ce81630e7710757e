// src/rewrite/mod.rs
// =============================================================================
// The link rewriter: the pass that makes the mirror browsable offline.
//
// Runs over every saved HTML file once the crawl is done. Each reference
// attribute (href, src, background, url() in style attributes and <style>
// elements) ends up in one of two states:
//
//   live      the target file exists: the value becomes a page-relative path
//             ("../x.gif"), fragment kept
//   disabled  the target is missing, foreign, mailto: and so on: the value
//             moves to data-mirror-<attr>, and links get pointer-events: none
//
// Besides that, form actions become a no-op, target="_blank" and <base> go
// away. A disabled reference whose target shows up in a later crawl is made
// live again.
//
// Running the pass twice over the same mirror changes nothing the second
// time: live values are relative paths that resolve to the same files, and
// disabled values are no longer in the attributes this pass looks at.
// =============================================================================

mod index;

pub use index::{mirrored_pages, MirrorIndex};

use lol_html::html_content::ContentType;
use lol_html::{element, text, HtmlRewriter, Settings};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};
use url::Url;

use crate::archive::{CanonicalUrl, CaptureFlavor, Reference, ReferenceBase};
use crate::crawl::LinkRole;
use crate::error::MirrorError;
use crate::mirror::relative_link;

/// Prefix of the attributes that hold disabled references
pub const DISABLED_PREFIX: &str = "data-mirror-";

const NO_OP_ACTION: &str = "javascript:void(0)";
const DISABLED_STYLE: &str = "pointer-events: none";

#[derive(Debug, Default, Clone, Serialize)]
pub struct RewriteReport {
    pub pages: usize,
    /// Pages whose bytes actually changed
    pub changed: usize,
    pub live: usize,
    pub disabled: usize,
    pub failed: usize,
}

/// Rewrite every HTML page under `root`
pub fn rewrite_mirror(root: &Path, archive_host: &Url) -> Result<RewriteReport, MirrorError> {
    let index = MirrorIndex::build(root);
    debug!(files = index.len(), "Rewriting links against the mirror");
    let mut report = RewriteReport::default();

    for (relative, canonical) in mirrored_pages(root) {
        let path = root.join(&relative);
        let bytes = std::fs::read(&path).map_err(|e| MirrorError::io(&path, e))?;
        let html = String::from_utf8_lossy(&bytes);

        let page = match rewrite_page(&html, &relative, &canonical, &index, archive_host) {
            Ok(page) => page,
            Err(e) => {
                warn!(path = %relative.display(), error = %e, "Could not rewrite page, leaving it as is");
                report.failed += 1;
                continue;
            }
        };

        report.pages += 1;
        report.live += page.live;
        report.disabled += page.disabled;

        if page.html.as_bytes() != bytes.as_slice() {
            std::fs::write(&path, page.html.as_bytes()).map_err(|e| MirrorError::io(&path, e))?;
            report.changed += 1;
            debug!(path = %relative.display(), live = page.live, disabled = page.disabled, "Rewrote page");
        }
    }

    info!(
        pages = report.pages,
        changed = report.changed,
        disabled = report.disabled,
        "Link rewrite finished"
    );
    Ok(report)
}

#[derive(Debug)]
pub struct RewrittenPage {
    pub html: String,
    pub live: usize,
    pub disabled: usize,
}

enum Target {
    /// Anchors, javascript:, inline data: not ours to touch
    Inert,
    Live(String),
    Dead,
}

struct Resolver<'a> {
    page: &'a Path,
    base: ReferenceBase,
    index: &'a MirrorIndex,
}

impl Resolver<'_> {
    fn target(&self, raw: &str) -> Target {
        let raw = raw.trim();
        if self.index.local_target(self.page, raw).is_some() {
            return Target::Live(raw.to_string());
        }

        match self.base.resolve(raw, CaptureFlavor::Page) {
            Reference::Inert => Target::Inert,
            Reference::External(_) => Target::Dead,
            Reference::Capture(capture) => match self.index.lookup(&capture.canonical) {
                Some(file) => {
                    let mut link = relative_link(self.page, file);
                    if let Some(fragment) = &capture.fragment {
                        link.push('#');
                        link.push_str(fragment);
                    }
                    Target::Live(link)
                }
                None => Target::Dead,
            },
        }
    }
}

/// Rewrite one page. `page` is its path relative to the mirror root.
pub fn rewrite_page(
    html: &str,
    page: &Path,
    canonical: &CanonicalUrl,
    index: &MirrorIndex,
    archive_host: &Url,
) -> Result<RewrittenPage, MirrorError> {
    let base = ReferenceBase::for_local_page(canonical, "", archive_host)
        .ok_or_else(|| MirrorError::Parse(canonical.key()))?;
    let resolver = Resolver { page, base, index };
    let live = AtomicUsize::new(0);
    let disabled = AtomicUsize::new(0);
    // <style> text can arrive in several chunks; url() must be seen whole
    let mut style_text = String::new();

    let mut output = Vec::with_capacity(html.len());
    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!("base", |el| {
                    el.remove();
                    Ok(())
                }),
                element!("form[action]", |el| {
                    let action = el.get_attribute("action").unwrap_or_default();
                    if action != NO_OP_ACTION {
                        let preserved = format!("{}action", DISABLED_PREFIX);
                        if !el.has_attribute(&preserved) {
                            el.set_attribute(&preserved, &action)?;
                        }
                        el.set_attribute("action", NO_OP_ACTION)?;
                    }
                    Ok(())
                }),
                element!("[target]", |el| {
                    let target = el.get_attribute("target").unwrap_or_default();
                    if target.trim().eq_ignore_ascii_case("_blank") {
                        el.remove_attribute("target");
                    }
                    Ok(())
                }),
                text!("style", |chunk| {
                    style_text.push_str(chunk.as_str());
                    if !chunk.last_in_text_node() {
                        chunk.remove();
                        return Ok(());
                    }
                    let (rewritten, count) = rewrite_css_urls(&style_text, &resolver);
                    live.fetch_add(count, Ordering::Relaxed);
                    chunk.replace(&rewritten, ContentType::Html);
                    style_text.clear();
                    Ok(())
                }),
                element!("*", |el| {
                    let tag = el.tag_name().to_ascii_lowercase();
                    if tag == "base" {
                        return Ok(());
                    }
                    let names: Vec<String> = el.attributes().iter().map(|a| a.name()).collect();

                    for name in names {
                        if name == "style" {
                            let style = el.get_attribute("style").unwrap_or_default();
                            let (rewritten, count) = rewrite_css_urls(&style, &resolver);
                            live.fetch_add(count, Ordering::Relaxed);
                            if rewritten != style {
                                el.set_attribute("style", &rewritten)?;
                            }
                            continue;
                        }

                        // A disabled reference that can be revived
                        if let Some(attr) = name.strip_prefix(DISABLED_PREFIX) {
                            if attr == "action" || el.has_attribute(attr) || LinkRole::of(&tag, attr).is_none() {
                                continue;
                            }
                            let raw = el.get_attribute(&name).unwrap_or_default();
                            if let Target::Live(value) = resolver.target(&raw) {
                                el.set_attribute(attr, &value)?;
                                el.remove_attribute(&name);
                                enable(el)?;
                                live.fetch_add(1, Ordering::Relaxed);
                            } else {
                                disabled.fetch_add(1, Ordering::Relaxed);
                            }
                            continue;
                        }

                        if name == "action" || LinkRole::of(&tag, &name).is_none() {
                            continue;
                        }
                        let raw = el.get_attribute(&name).unwrap_or_default();
                        match resolver.target(&raw) {
                            Target::Inert => {}
                            Target::Live(value) => {
                                if value != raw {
                                    el.set_attribute(&name, &value)?;
                                }
                                live.fetch_add(1, Ordering::Relaxed);
                            }
                            Target::Dead => {
                                el.remove_attribute(&name);
                                el.set_attribute(&format!("{}{}", DISABLED_PREFIX, name), &raw)?;
                                if name == "href" {
                                    disable(el)?;
                                }
                                disabled.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    }
                    Ok(())
                }),
            ],
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );

    rewriter
        .write(html.as_bytes())
        .map_err(|e| MirrorError::Parse(format!("{}: {}", page.display(), e)))?;
    rewriter
        .end()
        .map_err(|e| MirrorError::Parse(format!("{}: {}", page.display(), e)))?;

    Ok(RewrittenPage {
        html: String::from_utf8_lossy(&output).into_owned(),
        live: live.into_inner(),
        disabled: disabled.into_inner(),
    })
}

// Only live url() references change; dead ones stay as the page had them
fn rewrite_css_urls(css: &str, resolver: &Resolver) -> (String, usize) {
    let mut count = 0;
    let rewritten = crate::crawl::CSS_URL.replace_all(css, |caps: &regex::Captures| {
        let raw = &caps[1];
        match resolver.target(raw) {
            Target::Live(value) => {
                count += 1;
                caps[0].replacen(raw, &value, 1)
            }
            _ => caps[0].to_string(),
        }
    });
    (rewritten.into_owned(), count)
}

fn disable(el: &mut lol_html::html_content::Element) -> Result<(), lol_html::errors::AttributeNameError> {
    let style = el.get_attribute("style").unwrap_or_default();
    if !style.contains(DISABLED_STYLE) {
        let style = style.trim().trim_end_matches(';').trim();
        let value = if style.is_empty() {
            DISABLED_STYLE.to_string()
        } else {
            format!("{}; {}", style, DISABLED_STYLE)
        };
        el.set_attribute("style", &value)?;
    }
    if el.get_attribute("aria-disabled").as_deref() != Some("true") {
        el.set_attribute("aria-disabled", "true")?;
    }
    Ok(())
}

fn enable(el: &mut lol_html::html_content::Element) -> Result<(), lol_html::errors::AttributeNameError> {
    el.remove_attribute("aria-disabled");
    if let Some(style) = el.get_attribute("style") {
        let cleaned = style
            .replace(&format!("; {}", DISABLED_STYLE), "")
            .replace(DISABLED_STYLE, "");
        let cleaned = cleaned.trim().trim_end_matches(';').trim();
        if cleaned.is_empty() {
            el.remove_attribute("style");
        } else if cleaned != style {
            el.set_attribute("style", cleaned)?;
        }
    }
    Ok(())
}
