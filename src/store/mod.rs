//! Remote counter stores.
//!
//! The limiter talks to the shared counter service only through the
//! [`CounterStore`] trait. Which service is used is decided once, when a
//! [`Backend`] is turned into a store by [`connect`].

mod credentials;
mod rest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::LimiterConfig;
use crate::error::Result;

pub use credentials::Credentials;
pub use rest::RestCounterStore;

/// Result of consuming one unit from the remote counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    /// `false` when the window's ceiling had already been reached
    pub success: bool,
    /// Units left after this call
    pub remaining: u64,
    /// When the window closes, in milliseconds since the Unix epoch
    pub reset_at: u64,
}

/// Trait for remote sliding-window counters.
///
/// Implementations must report transport and service failures as errors
/// rather than folding them into `success`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Consume one unit for `key`.
    async fn consume(&self, key: &str) -> Result<ConsumeOutcome>;
}

/// Supported remote counter services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    /// Upstash Redis REST API
    #[default]
    #[serde(alias = "primary")]
    Upstash,
    /// Vercel KV REST API
    #[serde(alias = "secondary")]
    VercelKv,
}

impl Provider {
    /// Environment variable holding the REST endpoint URL.
    pub fn url_var(&self) -> &'static str {
        match self {
            Provider::Upstash => "UPSTASH_REDIS_REST_URL",
            Provider::VercelKv => "KV_REST_API_URL",
        }
    }

    /// Environment variable holding the REST bearer token.
    pub fn token_var(&self) -> &'static str {
        match self {
            Provider::Upstash => "UPSTASH_REDIS_REST_TOKEN",
            Provider::VercelKv => "KV_REST_API_TOKEN",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Upstash => write!(f, "upstash"),
            Provider::VercelKv => write!(f, "vercel_kv"),
        }
    }
}

/// A provider together with its connection credentials.
#[derive(Debug, Clone)]
pub enum Backend {
    Upstash(Credentials),
    VercelKv(Credentials),
}

impl Backend {
    /// Pair `provider` with explicit credentials.
    pub fn new(provider: Provider, credentials: Credentials) -> Self {
        match provider {
            Provider::Upstash => Backend::Upstash(credentials),
            Provider::VercelKv => Backend::VercelKv(credentials),
        }
    }

    /// Read the credentials for `provider` from the process environment.
    pub fn from_env(provider: Provider) -> Result<Self> {
        Ok(Self::new(provider, Credentials::from_env(provider)?))
    }

    pub fn provider(&self) -> Provider {
        match self {
            Backend::Upstash(_) => Provider::Upstash,
            Backend::VercelKv(_) => Provider::VercelKv,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        match self {
            Backend::Upstash(credentials) | Backend::VercelKv(credentials) => credentials,
        }
    }
}

/// Build the counter store for `backend`.
///
/// Fails with a configuration error when the settings or credentials are
/// unusable; nothing is returned half-built.
pub fn connect(backend: Backend, config: &LimiterConfig) -> Result<Arc<dyn CounterStore>> {
    let provider = backend.provider();
    let store = RestCounterStore::new(backend, config)?;
    info!(
        provider = %provider,
        requests_limit = config.requests_limit,
        timeframe = config.timeframe,
        "Remote counter store configured"
    );
    Ok(Arc::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LimiterError;

    #[test]
    fn test_provider_env_vars() {
        assert_eq!(Provider::Upstash.url_var(), "UPSTASH_REDIS_REST_URL");
        assert_eq!(Provider::Upstash.token_var(), "UPSTASH_REDIS_REST_TOKEN");
        assert_eq!(Provider::VercelKv.url_var(), "KV_REST_API_URL");
        assert_eq!(Provider::VercelKv.token_var(), "KV_REST_API_TOKEN");
    }

    #[test]
    fn test_backend_resolves_provider() {
        let credentials = Credentials::new("https://kv.example.com", "secret");
        let backend = Backend::new(Provider::VercelKv, credentials);
        assert_eq!(backend.provider(), Provider::VercelKv);
        assert_eq!(backend.credentials().url, "https://kv.example.com");
    }

    #[test]
    fn test_connect_builds_store() {
        let backend = Backend::new(
            Provider::Upstash,
            Credentials::new("https://redis.example.com", "secret"),
        );
        assert!(connect(backend, &LimiterConfig::default()).is_ok());
    }

    #[test]
    fn test_connect_rejects_invalid_config() {
        let backend = Backend::new(
            Provider::Upstash,
            Credentials::new("https://redis.example.com", "secret"),
        );
        let config = LimiterConfig {
            timeframe: 0,
            ..Default::default()
        };
        assert!(matches!(
            connect(backend, &config),
            Err(LimiterError::Config(_))
        ));
    }
}
