// src/fetch/encoding.rs
// =============================================================================
// Turns the raw bytes of an archived HTML page into clean UTF-8 text.
//
// 1. Pick a charset: the content-type header wins, otherwise sniff the bytes
//    (byte order mark, <meta charset>, UTF-8 validity, legacy fallback).
// 2. Decode with encoding_rs. Unknown labels fall back to UTF-8 with a warning.
// 3. Remove what the archive injected: toolbar block, playback scripts,
//    banner stylesheets, trailer comments, and the blank lines they leave.
// 4. Re-declare the document as UTF-8, since that is how it is saved.
//
// Every step of the cleanup is idempotent: cleaning a cleaned page is a no-op.
// =============================================================================

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252};
use lol_html::{element, rewrite_str, RewriteStrSettings};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

static CHARSET_PARAM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#).expect("charset pattern is valid")
});

static META_CHARSET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_\-:.]+)"#)
        .expect("meta charset pattern is valid")
});

static TOOLBAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)[ \t]*<!-- BEGIN WAYBACK TOOLBAR INSERT -->.*?<!-- END WAYBACK TOOLBAR INSERT -->[ \t]*\r?\n?",
    )
    .expect("toolbar pattern is valid")
});

static SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)[ \t]*<script\b[^>]*>.*?</script\s*>[ \t]*\r?\n?")
        .expect("script pattern is valid")
});

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)[ \t]*<link\b[^>]*>[ \t]*\r?\n?").expect("link pattern is valid"));

static ARCHIVE_COMMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)[ \t]*<!--\s*(?:End Wayback Rewrite JS Include|FILE ARCHIVED ON|playback timings).*?-->[ \t]*\r?\n?",
    )
    .expect("archive comment pattern is valid")
});

static LEADING_BLANK_LINES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[ \t]*\r?\n)+").expect("blank line pattern is valid"));

// The archive's own /_static/ tree, served from its root. A site's archived
// /_static/ files sit behind /web/<timestamp>/ and must not match.
static ARCHIVE_STATIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:src|href)\s*=\s*["']?(?:(?:https?:)?//[^/"'\s>]+)?/_static/"#)
        .expect("archive static pattern is valid")
});

// Markers of the archive's playback machinery
const SCRIPT_SIGNATURES: &[&str] = &[
    "web-static.archive.org",
    "archive.org/includes/",
    "athena.js",
    "__wm.",
    "archive_analytics",
    "RufflePlayer",
    "wombat.js",
    "bundle-playback",
];

const STYLESHEET_SIGNATURES: &[&str] = &["web-static.archive.org", "archive.org/includes/"];

/// Result of decoding, kept around for logging
#[derive(Debug)]
pub struct DecodedHtml {
    pub text: String,
    pub encoding: &'static Encoding,
    /// True when the declared charset was unusable and UTF-8 was assumed
    pub fell_back: bool,
}

/// Decode, clean and re-declare a page in one go
pub fn normalize_html(bytes: &[u8], content_type: &str) -> String {
    let decoded = decode_html(bytes, content_type);
    debug!(encoding = decoded.encoding.name(), fell_back = decoded.fell_back, "Decoded page");
    declare_utf8(&clean_archive_markup(&decoded.text))
}

pub fn decode_html(bytes: &[u8], content_type: &str) -> DecodedHtml {
    let (encoding, fell_back) = match charset_param(content_type) {
        Some(label) => match Encoding::for_label(label.as_bytes()) {
            Some(encoding) => (encoding, false),
            None => {
                warn!(charset = %label, "Unsupported encoding, falling back to UTF-8");
                (UTF_8, true)
            }
        },
        None => (sniff_encoding(bytes), false),
    };

    // decode() honours a byte order mark over the chosen encoding
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!(encoding = used.name(), "Malformed byte sequences replaced while decoding");
    }

    DecodedHtml {
        text: text.into_owned(),
        encoding: used,
        fell_back,
    }
}

pub fn charset_param(content_type: &str) -> Option<String> {
    CHARSET_PARAM
        .captures(content_type)
        .map(|c| c[1].to_ascii_lowercase())
}

fn sniff_encoding(bytes: &[u8]) -> &'static Encoding {
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }

    let head = &bytes[..bytes.len().min(2048)];
    let head = String::from_utf8_lossy(head);
    if let Some(encoding) = META_CHARSET
        .captures(&head)
        .and_then(|c| Encoding::for_label(c[1].as_bytes()))
    {
        // A meta tag cannot sensibly declare UTF-16, the bytes we just read it from are ASCII
        if encoding != encoding_rs::UTF_16LE && encoding != encoding_rs::UTF_16BE {
            return encoding;
        }
    }

    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    // High bytes that are not UTF-8: old western pages are overwhelmingly
    // windows-1252, and every byte sequence decodes in it
    WINDOWS_1252
}

/// Remove archive-injected markup from a decoded page
pub fn clean_archive_markup(html: &str) -> String {
    let html = TOOLBAR.replace_all(html, "");

    let html = SCRIPT.replace_all(&html, |caps: &Captures| {
        let script = &caps[0];
        if is_archive_markup(script, SCRIPT_SIGNATURES) {
            String::new()
        } else {
            script.to_string()
        }
    });

    let html = LINK.replace_all(&html, |caps: &Captures| {
        let link = &caps[0];
        if is_archive_markup(link, STYLESHEET_SIGNATURES) {
            String::new()
        } else {
            link.to_string()
        }
    });

    let html = ARCHIVE_COMMENTS.replace_all(&html, "");
    LEADING_BLANK_LINES.replace(&html, "").into_owned()
}

fn is_archive_markup(tag: &str, signatures: &[&str]) -> bool {
    ARCHIVE_STATIC.is_match(tag) || signatures.iter().any(|sig| tag.contains(sig))
}

/// Point charset declarations at UTF-8
pub fn declare_utf8(html: &str) -> String {
    let result = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("meta[charset]", |el| {
                    let current = el.get_attribute("charset").unwrap_or_default();
                    if !current.eq_ignore_ascii_case("utf-8") {
                        el.set_attribute("charset", "utf-8")?;
                    }
                    Ok(())
                }),
                element!("meta[http-equiv][content]", |el| {
                    let equiv = el.get_attribute("http-equiv").unwrap_or_default();
                    let content = el.get_attribute("content").unwrap_or_default();
                    let target = "text/html; charset=utf-8";
                    if equiv.eq_ignore_ascii_case("content-type")
                        && content.to_ascii_lowercase().contains("charset")
                        && content != target
                    {
                        el.set_attribute("content", target)?;
                    }
                    Ok(())
                }),
            ],
            ..RewriteStrSettings::default()
        },
    );

    match result {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!(error = %e, "Could not rewrite charset declarations, keeping page as is");
            html.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARCHIVED_PAGE: &str = "\n\n<html><head>\n\
<script src=\"//archive.org/includes/athena.js\" type=\"text/javascript\"></script>\n\
<script type=\"text/javascript\" src=\"/_static/js/bundle-playback.js?v=1\"></script>\n\
<script type=\"text/javascript\">__wm.init(\"https://web.archive.org/web\");</script>\n\
<link rel=\"stylesheet\" type=\"text/css\" href=\"/_static/css/banner-styles.css?v=1\" />\n\
<!-- End Wayback Rewrite JS Include -->\n\
<title>Site</title>\n\
<link rel=\"stylesheet\" href=\"/web/2002cs_/http://site.org/site.css\">\n\
<script>var own = 1;</script>\n\
</head><body>\n\
<!-- BEGIN WAYBACK TOOLBAR INSERT -->\n<div id=\"wm-ipp\">toolbar</div>\n<!-- END WAYBACK TOOLBAR INSERT -->\n\
<p>Hello</p>\n\
</body></html>\n\
<!--\n     FILE ARCHIVED ON 16:50:06 Aug 21, 2002 AND RETRIEVED FROM THE\n-->\n";

    #[test]
    fn test_keeps_site_files_under_static() {
        let page = "<head>\n\
<script src=\"/web/2002js_/http://site.org/_static/app.js\"></script>\n\
<link rel=\"stylesheet\" href=\"/web/2002cs_/http://www.site.org/_static/site.css\">\n\
<script src=\"https://web.archive.org/_static/js/wombat.js\"></script>\n\
<link rel=\"stylesheet\" href='//web.archive.org/_static/css/iconochive.css'>\n\
</head>";
        let cleaned = clean_archive_markup(page);
        assert!(cleaned.contains("site.org/_static/app.js"));
        assert!(cleaned.contains("site.org/_static/site.css"));
        assert!(!cleaned.contains("wombat.js"));
        assert!(!cleaned.contains("iconochive.css"));
    }

    #[test]
    fn test_charset_from_header() {
        // 0xE9 is 'é' in latin-1
        let bytes = b"<p>caf\xe9</p>";
        let decoded = decode_html(bytes, "text/html; charset=ISO-8859-1");
        assert_eq!(decoded.text, "<p>café</p>");
        assert!(!decoded.fell_back);
    }

    #[test]
    fn test_charset_sniffed_without_header() {
        let bytes = b"<meta charset=\"windows-1252\"><p>caf\xe9</p>";
        assert_eq!(decode_html(bytes, "text/html").text, "<meta charset=\"windows-1252\"><p>café</p>");

        let bytes = b"<p>caf\xe9</p>";
        assert_eq!(decode_html(bytes, "text/html").encoding, WINDOWS_1252);

        let utf8 = "<p>café</p>".as_bytes();
        assert_eq!(decode_html(utf8, "text/html").encoding, UTF_8);
    }

    #[test]
    fn test_unknown_charset_falls_back_to_utf8() {
        let decoded = decode_html("<p>ok</p>".as_bytes(), "text/html; charset=x-klingon");
        assert!(decoded.fell_back);
        assert_eq!(decoded.text, "<p>ok</p>");
    }

    #[test]
    fn test_strips_archive_markup() {
        let cleaned = clean_archive_markup(ARCHIVED_PAGE);
        assert!(cleaned.starts_with("<html>"));
        assert!(!cleaned.contains("athena.js"));
        assert!(!cleaned.contains("bundle-playback"));
        assert!(!cleaned.contains("__wm.init"));
        assert!(!cleaned.contains("banner-styles"));
        assert!(!cleaned.contains("wm-ipp"));
        assert!(!cleaned.contains("End Wayback Rewrite"));
        assert!(!cleaned.contains("FILE ARCHIVED ON"));
        // The site's own assets survive
        assert!(cleaned.contains("site.css"));
        assert!(cleaned.contains("var own = 1;"));
        assert!(cleaned.contains("<p>Hello</p>"));
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let once = normalize_html(ARCHIVED_PAGE.as_bytes(), "text/html");
        let twice = normalize_html(once.as_bytes(), "text/html");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_declares_utf8() {
        let html = r#"<head><meta http-equiv="Content-Type" content="text/html; charset=iso-8859-1"><meta charset="shift_jis"></head>"#;
        let out = declare_utf8(html);
        assert!(out.contains(r#"content="text/html; charset=utf-8""#));
        assert!(out.contains(r#"charset="utf-8""#));
        assert_eq!(declare_utf8(&out), out);
    }
}
