// src/crawl/frontier.rs
// =============================================================================
// The work queue of a crawl.
//
// The frontier is owned by the scheduler alone, so nothing here is locked.
// It decides for every discovered capture whether it becomes a task:
//
//   out of bounds        -> dropped, not an error
//   seen this run        -> duplicate
//   already in the mirror -> marked seen, the scheduler replays its links
//   queue full / task cap -> dropped and counted
//   otherwise            -> queued
//
// A canonical URL is queued at most once per run. That single rule is what
// keeps circular links from looping forever.
// =============================================================================

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::archive::{CanonicalUrl, CaptureRef};

/// Which part of the site a crawl may touch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bounds {
    domain: String,
    /// `domain/path` prefix, e.g. "site.org/a/"
    prefix: String,
}

impl Bounds {
    /// Bound a crawl. Without an explicit bound the seed's own directory is
    /// used; a bound starting with '/' is a path on the seed's domain.
    pub fn new(seed: &CanonicalUrl, bound: Option<&str>) -> Self {
        let bound = match bound.map(str::trim).filter(|b| !b.is_empty()) {
            Some(bound) => bound,
            None => {
                let key = seed.key();
                let directory = match key.rsplit_once('/') {
                    Some((dir, _)) => format!("{}/", dir),
                    None => format!("{}/", key),
                };
                return Self {
                    domain: seed.domain().to_string(),
                    prefix: directory,
                };
            }
        };

        let bound = match bound.find("://") {
            Some(i) => &bound[i + 3..],
            None => bound,
        };
        let (domain, path) = if bound.starts_with('/') {
            (seed.domain().to_string(), bound.to_string())
        } else {
            match bound.split_once('/') {
                Some((domain, path)) => (domain.to_string(), format!("/{}", path)),
                None => (bound.to_string(), "/".to_string()),
            }
        };

        // Reuse the host normalization so "www." bounds match stripped keys
        let domain = CanonicalUrl::new(&domain, "/").domain().to_string();

        let mut path = path.to_ascii_lowercase();
        let last = path.rsplit('/').next().unwrap_or("");
        if !last.is_empty() && !last.contains('.') {
            path.push('/');
        }

        Self {
            prefix: format!("{}{}", domain, path),
            domain,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn admits(&self, canonical: &CanonicalUrl) -> bool {
        canonical.key().starts_with(&self.prefix)
    }

    pub fn admits_domain(&self, canonical: &CanonicalUrl) -> bool {
        canonical.domain() == self.domain
    }
}

/// How far a reference may stray from the bound prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Pages: domain and path prefix must match
    Path,
    /// Stylesheets, scripts and images a bounded page needs: domain only
    Domain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    pub capture: CaptureRef,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    Duplicate,
    AlreadySaved,
    OutOfBounds,
    /// Queue is at its memory cap
    Dropped,
    /// The run's task limit is used up
    CapReached,
}

pub struct Frontier {
    bounds: Bounds,
    queue: VecDeque<CrawlTask>,
    visited: HashSet<CanonicalUrl>,
    images: BTreeMap<CanonicalUrl, CaptureRef>,
    admitted: usize,
    max_queued: usize,
    max_tasks: Option<usize>,
    max_retries: u32,
}

impl Frontier {
    pub fn new(bounds: Bounds, max_queued: usize, max_tasks: Option<usize>, max_retries: u32) -> Self {
        Self {
            bounds,
            queue: VecDeque::new(),
            visited: HashSet::new(),
            images: BTreeMap::new(),
            admitted: 0,
            max_queued,
            max_tasks,
            max_retries,
        }
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    /// Cheap pre-check before the scheduler looks at the disk
    pub fn is_candidate(&self, canonical: &CanonicalUrl, scope: Scope) -> bool {
        self.in_scope(canonical, scope) && !self.visited.contains(canonical)
    }

    pub fn admit(&mut self, capture: CaptureRef, scope: Scope, already_saved: bool) -> Admission {
        if !self.in_scope(&capture.canonical, scope) {
            return Admission::OutOfBounds;
        }
        if self.visited.contains(&capture.canonical) {
            return Admission::Duplicate;
        }
        if already_saved {
            self.visited.insert(capture.canonical);
            return Admission::AlreadySaved;
        }
        if let Some(max) = self.max_tasks {
            if self.admitted >= max {
                return Admission::CapReached;
            }
        }
        // Not marked visited, so a later sighting can still get in once the queue drains
        if self.queue.len() >= self.max_queued {
            return Admission::Dropped;
        }

        self.visited.insert(capture.canonical.clone());
        self.admitted += 1;
        self.queue.push_back(CrawlTask {
            capture,
            retry_count: 0,
        });
        Admission::Queued
    }

    /// Put a failed task back. False once its retries are used up.
    pub fn retry(&mut self, mut task: CrawlTask) -> bool {
        if task.retry_count >= self.max_retries {
            return false;
        }
        task.retry_count += 1;
        self.queue.push_back(task);
        true
    }

    pub fn next(&mut self) -> Option<CrawlTask> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    /// Remember an image for the second pass. The first capture seen wins.
    pub fn collect_image(&mut self, capture: CaptureRef) -> bool {
        if !self.bounds.admits_domain(&capture.canonical) || self.images.contains_key(&capture.canonical) {
            return false;
        }
        self.images.insert(capture.canonical.clone(), capture);
        true
    }

    /// Images nobody fetched during the page pass
    pub fn take_images(&mut self) -> Vec<CaptureRef> {
        let images = std::mem::take(&mut self.images);
        images
            .into_iter()
            .filter(|(canonical, _)| !self.visited.contains(canonical))
            .map(|(_, capture)| capture)
            .collect()
    }

    fn in_scope(&self, canonical: &CanonicalUrl, scope: Scope) -> bool {
        match scope {
            Scope::Path => self.bounds.admits(canonical),
            Scope::Domain => self.bounds.admits_domain(canonical),
        }
    }
}
