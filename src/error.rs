// src/error.rs
// =============================================================================
// Error taxonomy for the mirror pipeline.
//
// - Parse: a URL that is not an archival capture. The URL is dropped.
// - Fetch: network, timeout or non-2xx. Retried by the frontier.
// - Io: disk errors. Fatal for the task, never recorded in the crawl state.
// - OutOfBounds: a seed outside an explicit --bound. Links found while
//   crawling that leave the bounds are not errors; the frontier drops them.
//
// Charset problems never show up here: the decoder falls back to UTF-8 and
// logs a warning instead.
// =============================================================================

use std::path::PathBuf;
use thiserror::Error;

pub use crate::fetch::FetchError;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("not an archival capture URL: {0}")]
    Parse(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is outside the crawl bounds")]
    OutOfBounds(String),
}

impl MirrorError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MirrorError::Io {
            path: path.into(),
            source,
        }
    }

    /// Only fetch failures are worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            MirrorError::Fetch(e) => e.is_retryable(),
            _ => false,
        }
    }
}
