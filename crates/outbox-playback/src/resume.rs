//! Side cache of resume positions, keyed by resource identifier.

use std::time::Duration;

use moka::sync::Cache;

pub const DEFAULT_RESUME_CAPACITY: u64 = 1000;
pub const DEFAULT_RESUME_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Last known playback offset per key, bounded and expiring.
#[derive(Clone)]
pub struct ResumeCache {
    positions: Cache<String, Duration>,
}

impl Default for ResumeCache {
    fn default() -> Self {
        Self::new(DEFAULT_RESUME_CAPACITY, DEFAULT_RESUME_TTL)
    }
}

impl ResumeCache {
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        Self {
            positions: Cache::builder()
                .max_capacity(capacity)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub fn save(&self, key: &str, position: Duration) {
        self.positions.insert(key.to_string(), position);
    }

    pub fn get(&self, key: &str) -> Option<Duration> {
        self.positions.get(key)
    }

    /// Remove and return the saved position.
    pub fn take(&self, key: &str) -> Option<Duration> {
        self.positions.remove(key)
    }

    pub fn forget(&self, key: &str) {
        self.positions.invalidate(key);
    }
}
