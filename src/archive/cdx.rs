// src/archive/cdx.rs
// =============================================================================
// Seed discovery through the archive's capture index (CDX API).
//
// Given a site prefix and a time range, the index returns one row per
// capture. The first row names the columns:
//
//   [["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
//    ["org,site)/a", "20020821165006", "http://www.site.org:80/a/", "text/html", "200", "SHA1...", "1234"],
//    ...]
//
// The crawl treats the result purely as a seed list: rows sharing a urlkey
// collapse into the most recent capture before anything is enqueued.
// =============================================================================

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use url::Url;

use super::capture::{CaptureFlavor, CaptureRef};
use crate::fetch::Fetch;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CdxRecord {
    pub url_key: String,
    pub timestamp: String,
    pub original: String,
    pub mimetype: String,
    pub status_code: String,
    pub digest: String,
}

impl CdxRecord {
    /// The capture to fetch for this row; images use the image flavor
    pub fn capture(&self) -> Option<CaptureRef> {
        let flavor = if self.mimetype.starts_with("image/") {
            CaptureFlavor::Image
        } else {
            CaptureFlavor::Page
        };
        let original = if self.original.contains("://") {
            self.original.clone()
        } else {
            format!("http://{}", self.original)
        };
        let url = Url::parse(&original).ok()?;
        CaptureRef::from_original(url, &self.timestamp, flavor)
    }
}

#[derive(Debug, Clone)]
pub struct CdxQuery {
    /// Domain plus optional path, e.g. "site.org/a"
    pub site_prefix: String,
    pub from: String,
    pub to: Option<String>,
}

impl CdxQuery {
    pub fn url(&self, archive_host: &Url) -> Result<Url> {
        let mut url = archive_host
            .join("/cdx/search/cdx")
            .context("Invalid archive host")?;
        let prefix = self.site_prefix.trim_end_matches('/');
        url.query_pairs_mut()
            .append_pair("url", &format!("{}/*", prefix))
            .append_pair("output", "json")
            .append_pair("from", &self.from)
            .append_pair("to", self.to.as_deref().unwrap_or(&self.from))
            .append_pair("filter", "statuscode:200");
        Ok(url)
    }
}

/// Query the index and return the deduplicated seed rows
pub async fn discover(fetcher: &dyn Fetch, archive_host: &Url, query: &CdxQuery) -> Result<Vec<CdxRecord>> {
    let url = query.url(archive_host)?;
    tracing::info!(url = %url, "Querying capture index");

    let response = fetcher
        .fetch(url.as_str())
        .await
        .map_err(|e| anyhow!("Capture index unreachable: {}", e))?;
    if !response.is_success() {
        bail!("Capture index answered HTTP {}", response.status);
    }

    let records = parse_rows(&response.body)?;
    let unique = dedup_records(records);
    tracing::info!(captures = unique.len(), "Capture index returned seeds");
    Ok(unique)
}

pub fn parse_rows(body: &[u8]) -> Result<Vec<CdxRecord>> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }

    let rows: Vec<Vec<String>> =
        serde_json::from_slice(body).context("Capture index response is not a JSON table")?;
    let mut rows = rows.into_iter();
    let header = match rows.next() {
        Some(header) => header,
        None => return Ok(Vec::new()),
    };

    let column = |name: &str| {
        header
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
            .ok_or_else(|| anyhow!("Capture index response has no '{}' column", name))
    };
    let url_key = column("urlkey")?;
    let timestamp = column("timestamp")?;
    let original = column("original")?;
    let mimetype = column("mimetype")?;
    let status_code = column("statuscode")?;
    let digest = column("digest")?;

    let field = |row: &[String], index: usize| row.get(index).cloned().unwrap_or_default();

    Ok(rows
        .map(|row| CdxRecord {
            url_key: field(&row, url_key),
            timestamp: field(&row, timestamp),
            original: field(&row, original),
            mimetype: field(&row, mimetype),
            status_code: field(&row, status_code),
            digest: field(&row, digest),
        })
        .collect())
}

/// One row per urlkey, keeping the most recent capture, in first-seen order
pub fn dedup_records(records: Vec<CdxRecord>) -> Vec<CdxRecord> {
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<CdxRecord> = Vec::new();

    for record in records {
        match position.get(&record.url_key) {
            Some(&i) => {
                // CDX timestamps are fixed-width digits, so string order is time order
                if record.timestamp > unique[i].timestamp {
                    unique[i] = record;
                }
            }
            None => {
                position.insert(record.url_key.clone(), unique.len());
                unique.push(record);
            }
        }
    }

    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::MockFetcher;

    const BODY: &str = r#"[
        ["urlkey","timestamp","original","mimetype","statuscode","digest","length"],
        ["org,site)/a", "20020101000000", "http://www.site.org:80/a/", "text/html", "200", "AAA", "10"],
        ["org,site)/x.gif", "20020301000000", "http://site.org/x.gif", "image/gif", "200", "BBB", "20"],
        ["org,site)/a", "20021231000000", "http://site.org/a/", "text/html", "200", "AAA", "10"],
        ["org,site)/a", "20020601000000", "http://site.org/a", "text/html", "200", "AAA", "10"]
    ]"#;

    #[test]
    fn test_dedup_keeps_most_recent_per_key() {
        let records = dedup_records(parse_rows(BODY.as_bytes()).unwrap());
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].url_key, "org,site)/a");
        assert_eq!(records[0].timestamp, "20021231000000");
        assert_eq!(records[1].url_key, "org,site)/x.gif");
    }

    #[test]
    fn test_records_become_captures() {
        let records = parse_rows(BODY.as_bytes()).unwrap();
        let page = records[0].capture().unwrap();
        assert_eq!(page.canonical.key(), "site.org/a/index.html");
        assert_eq!(page.flavor, CaptureFlavor::Page);

        let image = records[1].capture().unwrap();
        assert_eq!(image.flavor, CaptureFlavor::Image);
        assert_eq!(image.timestamp, "20020301000000");
    }

    #[test]
    fn test_empty_index_response() {
        assert!(parse_rows(b"").unwrap().is_empty());
        assert!(parse_rows(b"[]").unwrap().is_empty());
        assert!(parse_rows(b"not json").is_err());
    }

    #[test]
    fn test_query_url() {
        let query = CdxQuery {
            site_prefix: "site.org/a/".to_string(),
            from: "2002".to_string(),
            to: None,
        };
        let url = query.url(&Url::parse("https://archive.example").unwrap()).unwrap();
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.path(), "/cdx/search/cdx");
        assert_eq!(pairs["url"], "site.org/a/*");
        assert_eq!(pairs["to"], "2002");
        assert_eq!(pairs["filter"], "statuscode:200");
    }

    #[tokio::test]
    async fn test_unreachable_index_is_fatal() {
        let mock = MockFetcher::new();
        let query = CdxQuery {
            site_prefix: "site.org".to_string(),
            from: "2002".to_string(),
            to: Some("2003".to_string()),
        };
        let host = Url::parse("https://archive.example").unwrap();
        assert!(discover(&mock, &host, &query).await.is_err());

        mock.insert(query.url(&host).unwrap().as_str(), 200, "application/json", BODY.as_bytes());
        assert_eq!(discover(&mock, &host, &query).await.unwrap().len(), 2);
    }
}
