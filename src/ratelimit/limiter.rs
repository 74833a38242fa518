//! Two-tier rate limit decisions.
//!
//! The local cache answers while it holds a live state for the key; the
//! remote counter store is consulted on a miss, an expired entry, or when
//! the cache is disabled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, instrument, trace, warn};

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::store::{self, Backend, CounterStore};

use super::cache::LruTtlCache;
use super::state::{now_millis, RateLimitState};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allow { remaining: u64, reset_at: u64 },
    /// The key has exhausted its quota for the current window.
    Reject { remaining: u64, reset_at: u64 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allow { remaining, .. } | Decision::Reject { remaining, .. } => *remaining,
        }
    }

    /// When the window closes, in milliseconds since the Unix epoch.
    pub fn reset_at(&self) -> u64 {
        match self {
            Decision::Allow { reset_at, .. } | Decision::Reject { reset_at, .. } => *reset_at,
        }
    }
}

/// Counters describing how decisions were made.
#[derive(Debug, Default)]
struct LimiterStats {
    local_hits: AtomicU64,
    local_rejections: AtomicU64,
    remote_calls: AtomicU64,
    remote_errors: AtomicU64,
}

/// Point-in-time copy of the limiter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Requests allowed from the local cache
    pub local_hits: u64,
    /// Requests rejected from the local cache
    pub local_rejections: u64,
    /// Calls made to the remote store
    pub remote_calls: u64,
    /// Remote calls that failed
    pub remote_errors: u64,
}

/// The rate limiter shared by every request passing through one wrapper.
///
/// Cloning is cheap and clones share the cache, the store and the stats.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<LimiterConfig>,
    cache: Arc<LruTtlCache>,
    store: Arc<dyn CounterStore>,
    stats: Arc<LimiterStats>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("cached_keys", &self.cache.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter over an existing counter store.
    pub fn new(config: LimiterConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(LruTtlCache::new(config.cache_capacity));

        debug!(
            timeframe = config.timeframe,
            requests_limit = config.requests_limit,
            cache_disabled = config.cache_disabled,
            cache_capacity = config.cache_capacity,
            "Rate limiter created"
        );

        Ok(Self {
            config: Arc::new(config),
            cache,
            store,
            stats: Arc::new(LimiterStats::default()),
        })
    }

    /// Create a rate limiter backed by the REST store for `backend`.
    pub fn from_backend(config: LimiterConfig, backend: Backend) -> Result<Self> {
        let store = store::connect(backend, &config)?;
        Self::new(config, store)
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn cache(&self) -> &LruTtlCache {
        &self.cache
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            local_rejections: self.stats.local_rejections.load(Ordering::Relaxed),
            remote_calls: self.stats.remote_calls.load(Ordering::Relaxed),
            remote_errors: self.stats.remote_errors.load(Ordering::Relaxed),
        }
    }

    /// Check and consume one unit of quota for `key`.
    pub async fn check(&self, key: &str) -> Result<Decision> {
        self.decide(key, now_millis).await
    }

    /// Like [`RateLimiter::check`], with the clock pinned to `now`
    /// (milliseconds since the Unix epoch).
    pub async fn check_at(&self, key: &str, now: u64) -> Result<Decision> {
        self.decide(key, move || now).await
    }

    #[instrument(skip(self, key, clock), fields(key = %key))]
    async fn decide<C>(&self, key: &str, clock: C) -> Result<Decision>
    where
        C: Fn() -> u64 + Send + Sync + 'static,
    {
        if !self.config.cache_disabled {
            if let Some(decision) = self.decide_locally(key, clock()) {
                return Ok(decision);
            }
        }

        self.stats.remote_calls.fetch_add(1, Ordering::Relaxed);

        let cache = (!self.config.cache_disabled).then(|| self.cache.clone());
        let remote = tokio::spawn(consume_remote(
            self.store.clone(),
            cache,
            key.to_string(),
            clock,
        ));

        let result = match remote.await {
            Ok(result) => result,
            Err(e) => Err(LimiterError::RemoteStore(format!(
                "remote consume task failed: {e}"
            ))),
        };

        if let Err(ref e) = result {
            self.stats.remote_errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "Remote counter store failed");
        }
        result
    }

    /// Answer from the cache when it holds a live state for `key`.
    fn decide_locally(&self, key: &str, now: u64) -> Option<Decision> {
        let state = self.cache.take_one_at(key, now)?;

        if state.remaining == 0 {
            self.stats.local_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, reset_at = state.reset_at, "Rejected from local cache");
            return Some(Decision::Reject {
                remaining: 0,
                reset_at: state.reset_at,
            });
        }

        let next = state.consume_one();
        self.stats.local_hits.fetch_add(1, Ordering::Relaxed);

        trace!(key = %key, remaining = next.remaining, "Allowed from local cache");
        Some(Decision::Allow {
            remaining: next.remaining,
            reset_at: next.reset_at,
        })
    }
}

/// Consume from the remote store and record the result in the cache.
///
/// Runs as its own task so a caller that goes away mid-flight does not
/// abandon a consume the shared counter has already seen.
async fn consume_remote<C>(
    store: Arc<dyn CounterStore>,
    cache: Option<Arc<LruTtlCache>>,
    key: String,
    clock: C,
) -> Result<Decision>
where
    C: Fn() -> u64 + Send + Sync + 'static,
{
    let outcome = store.consume(&key).await?;

    // One more unit is taken for this request on top of what the store reported.
    let state = if outcome.success {
        RateLimitState::new(outcome.remaining.saturating_sub(1), outcome.reset_at)
    } else {
        RateLimitState::new(0, outcome.reset_at)
    };

    if let Some(cache) = cache {
        let now = clock();
        let ttl = state.time_to_reset(now);
        if ttl.is_zero() {
            trace!(key = %key, reset_at = state.reset_at, "Window already closed, not caching");
        } else {
            cache.set_at(&key, state, ttl, now);
        }
    }

    if outcome.success {
        debug!(key = %key, remaining = state.remaining, "Allowed by remote store");
        Ok(Decision::Allow {
            remaining: state.remaining,
            reset_at: state.reset_at,
        })
    } else {
        debug!(key = %key, reset_at = state.reset_at, "Rejected by remote store");
        Ok(Decision::Reject {
            remaining: 0,
            reset_at: state.reset_at,
        })
    }
}
