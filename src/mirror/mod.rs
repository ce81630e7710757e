// src/mirror/mod.rs
// =============================================================================
// The on-disk side of the mirror.
//
// - path: canonical URL + content type to a mirror-relative file path
// - store: idempotent writes under the mirror root
// - state: crawl state persisted between runs, run statistics
// =============================================================================

mod path;
mod state;
mod store;

pub use path::{local_path, relative_link};
pub use state::{content_hash, RunStats, SavedResource, StateTracker, STATS_FILE};
pub use store::{MirrorStore, WriteOutcome};
