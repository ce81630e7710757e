// src/crawl/mod.rs
// =============================================================================
// This module crawls a bounded part of an archived site into the mirror.
//
// - frontier: bounds, dedup, queue caps and retries
// - links: which references on a page lead where
// - scheduler: the crawl loop and its workers
// - images: the second pass that fetches collected images
//
// Crawl order is breadth-first, but nothing depends on it: the mirror is
// correct once every admitted URL has been fetched or given up on.
// =============================================================================

mod frontier;
mod images;
mod links;
mod scheduler;

pub use frontier::Bounds;
pub use links::LinkRole;
pub(crate) use links::CSS_URL;
pub use scheduler::{CrawlReport, Crawler};
