use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Image reference -> digest map whose entries expire after a TTL.
///
/// Passed to the orchestrator by its caller so two operations in the
/// same process can share lookups.
#[derive(Debug, Clone)]
pub struct DigestCache {
    ttl: Duration,
    entries: HashMap<String, (String, Instant)>,
}

impl DigestCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Digest for `image` if it was stored less than a TTL ago.
    #[must_use]
    pub fn get(&self, image: &str) -> Option<&str> {
        self.get_at(image, Instant::now())
    }

    #[must_use]
    pub fn get_at(&self, image: &str, now: Instant) -> Option<&str> {
        self.entries
            .get(image)
            .filter(|(_, stored)| now.saturating_duration_since(*stored) < self.ttl)
            .map(|(digest, _)| digest.as_str())
    }

    pub fn insert(&mut self, image: &str, digest: &str) {
        self.insert_at(image, digest, Instant::now());
    }

    pub fn insert_at(&mut self, image: &str, digest: &str, now: Instant) {
        self.entries
            .insert(image.to_string(), (digest.to_string(), now));
    }

    pub fn invalidate(&mut self, image: &str) {
        self.entries.remove(image);
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, (_, stored)| now.saturating_duration_since(*stored) < ttl);
        before - self.entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DigestCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}
