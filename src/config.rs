//! Configuration management for tierlimit.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::debug;

use crate::error::{LimiterError, Result};
use crate::store::Provider;

/// Message returned with a 429 when no override is configured.
pub const DEFAULT_ERROR_MESSAGE: &str = "Rate limit exceeded";

/// Environment prefix used by [`AppConfig::load`].
const ENV_PREFIX: &str = "TIERLIMIT";

/// Top-level configuration for the tierlimit server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: LimiterConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
///
/// Shared read-only by the limiter and the remote counter client once
/// [`LimiterConfig::validate`] has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Window length in seconds
    #[serde(default = "default_timeframe")]
    pub timeframe: u64,

    /// Requests allowed per window
    #[serde(default = "default_requests_limit")]
    pub requests_limit: u64,

    /// Skip the local cache and consult the remote store on every request
    #[serde(default, alias = "disable_lru")]
    pub cache_disabled: bool,

    /// Remote counter backend
    #[serde(default)]
    pub provider: Provider,

    /// Body message for rejected requests
    #[serde(default)]
    pub error_message: Option<String>,

    /// Maximum number of keys held in the local cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Prefix for keys written to the remote store
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Timeout for a single remote store call in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            timeframe: default_timeframe(),
            requests_limit: default_requests_limit(),
            cache_disabled: false,
            provider: Provider::default(),
            error_message: None,
            cache_capacity: default_cache_capacity(),
            key_prefix: default_key_prefix(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_timeframe() -> u64 {
    60
}

fn default_requests_limit() -> u64 {
    5
}

fn default_cache_capacity() -> usize {
    500
}

fn default_key_prefix() -> String {
    "tierlimit".to_string()
}

fn default_request_timeout_ms() -> u64 {
    5000
}

impl LimiterConfig {
    /// Check every setting, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.timeframe == 0 {
            return Err(LimiterError::Config(
                "timeframe must be greater than 0".to_string(),
            ));
        }
        if self.requests_limit == 0 {
            return Err(LimiterError::Config(
                "requests_limit must be greater than 0".to_string(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(LimiterError::Config(
                "cache_capacity must be greater than 0".to_string(),
            ));
        }
        if self.key_prefix.is_empty() {
            return Err(LimiterError::Config(
                "key_prefix must not be empty".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(LimiterError::Config(
                "request_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Window length as a duration.
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.timeframe)
    }

    /// Timeout applied to each remote store call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// The configured rejection message, or the default one.
    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE)
    }

    /// Parse a limiter configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LimiterConfig =
            serde_yaml::from_str(yaml).map_err(|e| LimiterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

impl AppConfig {
    /// Load configuration from an optional file, overlaid with
    /// `TIERLIMIT__SECTION__FIELD` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| LimiterError::Config(e.to_string()))?;
        config.rate_limiting.validate()?;

        debug!(
            timeframe = config.rate_limiting.timeframe,
            requests_limit = config.rate_limiting.requests_limit,
            cache_disabled = config.rate_limiting.cache_disabled,
            provider = %config.rate_limiting.provider,
            "Configuration resolved"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.timeframe, 60);
        assert_eq!(config.requests_limit, 5);
        assert!(!config.cache_disabled);
        assert_eq!(config.provider, Provider::Upstash);
        assert_eq!(config.cache_capacity, 500);
        assert_eq!(config.error_message(), DEFAULT_ERROR_MESSAGE);
        tokio_test::assert_ok!(config.validate());
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
timeframe: 10
requests_limit: 3
disable_lru: true
provider: vercel_kv
error_message: "Slow down"
"#;
        let config = LimiterConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.timeframe, 10);
        assert_eq!(config.requests_limit, 3);
        assert!(config.cache_disabled);
        assert_eq!(config.provider, Provider::VercelKv);
        assert_eq!(config.error_message(), "Slow down");
        assert_eq!(config.window(), Duration::from_secs(10));
    }

    #[test]
    fn test_provider_aliases() {
        let config = LimiterConfig::from_yaml("provider: secondary").unwrap();
        assert_eq!(config.provider, Provider::VercelKv);

        let config = LimiterConfig::from_yaml("provider: primary").unwrap();
        assert_eq!(config.provider, Provider::Upstash);
    }

    #[test]
    fn test_rejects_zero_timeframe() {
        let result = LimiterConfig::from_yaml("timeframe: 0");
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_requests_limit() {
        let config = LimiterConfig {
            requests_limit: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_rejects_empty_prefix() {
        let config = LimiterConfig {
            key_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let result = LimiterConfig::from_yaml("provider: memcached");
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_app_config_missing_file() {
        let result = AppConfig::load(Some("/nonexistent/tierlimit.yaml"));
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[test]
    fn test_app_config_load_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.http_addr, default_http_addr());
        assert_eq!(config.rate_limiting.requests_limit, 5);
    }
}
