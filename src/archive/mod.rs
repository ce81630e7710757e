// src/archive/mod.rs
// =============================================================================
// Everything that understands the snapshot service's URL scheme.
//
// - capture: archival URL parsing, CanonicalUrl, reference resolution
// - cdx: the capture index used to seed a crawl for a time range
// =============================================================================

pub mod cdx;
mod capture;

pub use capture::{CanonicalUrl, CaptureFlavor, CaptureRef, Reference, ReferenceBase};
