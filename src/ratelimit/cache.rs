//! Bounded LRU cache with per-entry expiration.
//!
//! Holds the most recently used rate limit states so that repeated requests
//! for a key can be decided without a remote round-trip. Every operation
//! takes the same mutex; nothing here suspends.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::state::{now_millis, RateLimitState};

/// A cached state and its bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    state: RateLimitState,
    /// Absolute expiry in milliseconds since the Unix epoch
    expires_at: u64,
    /// Position in the recency index; larger is more recent
    tick: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Inner {
    fn advance(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Fixed-capacity key to [`RateLimitState`] store.
///
/// Reads count as uses. When a new key is inserted into a full cache the
/// least recently used key is evicted; ties cannot occur because every
/// access takes a fresh tick, so insertion order settles them.
#[derive(Debug)]
pub struct LruTtlCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl LruTtlCache {
    /// Create an empty cache holding at most `capacity` keys.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Look up `key` using the system clock.
    pub fn get(&self, key: &str) -> Option<RateLimitState> {
        self.get_at(key, now_millis())
    }

    /// Look up `key` as of `now` (milliseconds since the Unix epoch).
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get_at(&self, key: &str, now: u64) -> Option<RateLimitState> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= now,
        };
        if expired {
            inner.remove(key);
            trace!(key = %key, "Dropped expired cache entry");
            return None;
        }

        let tick = inner.advance();
        let entry = inner.entries.get_mut(key)?;
        inner.recency.remove(&entry.tick);
        entry.tick = tick;
        inner.recency.insert(tick, key.to_string());
        Some(entry.state)
    }

    /// Take one unit from the live state for `key` as of `now`.
    ///
    /// Lookup, recency promotion and the decrement happen under one lock,
    /// so concurrent callers never consume the same unit. Returns the state
    /// as it was before the decrement; a state with nothing remaining is
    /// left as is. Expired entries are removed and reported as absent.
    pub fn take_one_at(&self, key: &str, now: u64) -> Option<RateLimitState> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => entry.expires_at <= now || entry.state.is_expired(now),
        };
        if expired {
            inner.remove(key);
            trace!(key = %key, "Dropped expired cache entry");
            return None;
        }

        let tick = inner.advance();
        let entry = inner.entries.get_mut(key)?;
        inner.recency.remove(&entry.tick);
        entry.tick = tick;
        inner.recency.insert(tick, key.to_string());

        let previous = entry.state;
        entry.state = previous.consume_one();
        Some(previous)
    }

    /// Store `state` for `key` for `ttl`, using the system clock.
    pub fn set(&self, key: &str, state: RateLimitState, ttl: Duration) {
        self.set_at(key, state, ttl, now_millis());
    }

    /// Store `state` for `key`, expiring `ttl` after `now`.
    ///
    /// A zero `ttl` is ignored.
    pub fn set_at(&self, key: &str, state: RateLimitState, ttl: Duration, now: u64) {
        if ttl.is_zero() {
            return;
        }
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let expires_at = now.saturating_add(ttl_ms);

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let tick = inner.advance();

        if let Some(entry) = inner.entries.get_mut(key) {
            inner.recency.remove(&entry.tick);
            entry.state = state;
            entry.expires_at = expires_at;
            entry.tick = tick;
            inner.recency.insert(tick, key.to_string());
            return;
        }

        while inner.entries.len() >= self.capacity {
            match inner.evict_lru() {
                Some(evicted) => trace!(key = %evicted, "Evicted least recently used entry"),
                None => break,
            }
        }

        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                state,
                expires_at,
                tick,
            },
        );
        inner.recency.insert(tick, key.to_string());
    }

    /// Drop every entry that has expired as of `now`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self, now: u64) -> usize {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
        }
        expired.len()
    }

    /// Number of entries currently held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
