use std::time::Duration as StdDuration;

use chrono::Duration;

/// Default cache time-to-live (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: i64 = 5 * 60;

/// How often a polling change feed re-reads a collection.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 15;

/// Attempts per reconciler job before it is dead-lettered.
pub const DEFAULT_SYNC_MAX_ATTEMPTS: u32 = 3;

/// First reconciler retry delay. Doubles on every retry.
pub const DEFAULT_SYNC_BACKOFF_MS: u64 = 1000;

/// Tunables for the core services.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreSettings {
    pub cache_ttl: Duration,
    pub poll_interval: StdDuration,
    pub sync_max_attempts: u32,
    pub sync_initial_backoff: StdDuration,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::seconds(DEFAULT_CACHE_TTL_SECS),
            poll_interval: StdDuration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            sync_max_attempts: DEFAULT_SYNC_MAX_ATTEMPTS,
            sync_initial_backoff: StdDuration::from_millis(DEFAULT_SYNC_BACKOFF_MS),
        }
    }
}

impl CoreSettings {
    pub fn with_cache_ttl_secs(mut self, secs: i64) -> Self {
        self.cache_ttl = Duration::seconds(secs.max(0));
        self
    }
}
