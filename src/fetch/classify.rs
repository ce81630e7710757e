// src/fetch/classify.rs
// =============================================================================
// Decides what kind of resource a response is, from its content-type.
//
// HTML gets decoded, cleaned and scanned for links. Images and everything
// else are written byte for byte.
// =============================================================================

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

/// Content-type used when the archive sends none
pub const DEFAULT_CONTENT_TYPE: &str = "text/html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Html,
    Image,
    Text,
    Binary,
}

/// Strips parameters: "text/html; charset=utf-8" -> "text/html"
pub fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

pub fn classify(content_type: &str) -> ContentKind {
    let essence = mime_essence(content_type);

    if essence.starts_with("image/") {
        ContentKind::Image
    } else if essence == "text/html" || essence == "application/xhtml+xml" {
        ContentKind::Html
    } else if essence.starts_with("text/")
        || essence.ends_with("javascript")
        || essence.ends_with("json")
        || essence.ends_with("xml")
    {
        ContentKind::Text
    } else {
        ContentKind::Binary
    }
}

/// True when the page is the archive host's own "not archived" page
pub fn is_placeholder_page(html: &str, placeholder_titles: &[String]) -> bool {
    let title = match page_title(html) {
        Some(title) => title,
        None => return false,
    };
    placeholder_titles
        .iter()
        .any(|placeholder| placeholder.eq_ignore_ascii_case(&title))
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    let title = document.select(&selector).next()?;
    let text: String = title.text().collect();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
