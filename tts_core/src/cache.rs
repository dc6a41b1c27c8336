use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

/// How long a cached synthesis result stays servable.
pub const DEFAULT_TTL: Duration = Duration::from_secs(600);

/// Time source for expiry checks. Production uses [`SystemClock`]; tests
/// inject a manual clock to make expiry deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

struct CacheEntry {
    payload: Vec<u8>,
    created_at: Instant,
}

/// Fingerprint-keyed audio cache with lazy time-based expiry.
///
/// Entries are replace-only: a new synthesis for the same key overwrites the
/// old entry and restamps it. Expired entries are treated as misses on read
/// but are not reclaimed; the map grows for the process lifetime.
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    /// Return the payload for `key` if present and younger than the TTL.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(key)?;
        if self.clock.now().duration_since(entry.created_at) < self.ttl {
            debug!(key, "cache hit");
            Some(entry.payload.clone())
        } else {
            debug!(key, "cache entry expired");
            None
        }
    }

    /// Insert or overwrite `key`, stamping the entry with the current time.
    pub fn set(&self, key: &str, payload: Vec<u8>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            CacheEntry {
                payload,
                created_at: self.clock.now(),
            },
        );
    }
}

/// Clock that only moves when the test advances it.
#[cfg(test)]
pub(crate) struct ManualClock {
    now: Mutex<Instant>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}
