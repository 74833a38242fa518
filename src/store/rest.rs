//! Sliding-window counter over a Redis-compatible REST API.
//!
//! Each consume is a single `EVAL` of a script that keeps one counter per
//! fixed bucket of `timeframe` seconds and weights the previous bucket by
//! how much of the window still overlaps it. The script runs atomically on
//! the server, so concurrent callers across processes share one ceiling.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, trace};

use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::ratelimit::now_millis;

use super::{Backend, ConsumeOutcome, CounterStore, Provider};

/// Returns the units left after this call, or -1 when the ceiling is reached.
///
/// KEYS: current bucket, previous bucket.
/// ARGV: limit, now (ms), window (ms), increment.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local current_key = KEYS[1]
local previous_key = KEYS[2]
local limit = tonumber(ARGV[1])
local now = tonumber(ARGV[2])
local window = tonumber(ARGV[3])
local increment = tonumber(ARGV[4])

local current = tonumber(redis.call("GET", current_key) or "0")
local previous = tonumber(redis.call("GET", previous_key) or "0")
local elapsed = (now % window) / window
local weighted = math.floor((1 - elapsed) * previous)

if weighted + current >= limit then
  return -1
end

local updated = redis.call("INCRBY", current_key, increment)
if updated == increment then
  redis.call("PEXPIRE", current_key, window * 2 + 1000)
end
return limit - (updated + weighted)
"#;

#[derive(Debug, Deserialize)]
struct RestReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Counter store speaking the Upstash-style REST command protocol.
#[derive(Debug)]
pub struct RestCounterStore {
    client: reqwest::Client,
    provider: Provider,
    url: String,
    token: String,
    prefix: String,
    limit: u64,
    window_ms: u64,
}

impl RestCounterStore {
    /// Create a store for `backend` enforcing `config`'s limit and window.
    pub fn new(backend: Backend, config: &LimiterConfig) -> Result<Self> {
        config.validate()?;

        let provider = backend.provider();
        let credentials = backend.credentials();
        if credentials.url.is_empty() || credentials.token.is_empty() {
            return Err(LimiterError::Config(format!(
                "url and token are required for the {} provider",
                provider
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| LimiterError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            provider,
            url: credentials.url.trim_end_matches('/').to_string(),
            token: credentials.token.clone(),
            prefix: config.key_prefix.clone(),
            limit: config.requests_limit,
            window_ms: config.timeframe.saturating_mul(1000),
        })
    }

    /// Bucket keys for `key` at `now`, and when the current bucket ends.
    fn bucket_keys(&self, key: &str, now: u64) -> (String, String, u64) {
        let bucket = now / self.window_ms;
        let current = format!("{}:{}:{}", self.prefix, key, bucket);
        let previous = format!("{}:{}:{}", self.prefix, key, bucket.saturating_sub(1));
        let reset_at = (bucket + 1) * self.window_ms;
        (current, previous, reset_at)
    }

    /// Consume one unit for `key` as of `now` (milliseconds since the Unix epoch).
    #[instrument(skip(self), fields(provider = %self.provider))]
    pub async fn consume_at(&self, key: &str, now: u64) -> Result<ConsumeOutcome> {
        let (current, previous, reset_at) = self.bucket_keys(key, now);
        let command = json!([
            "EVAL",
            SLIDING_WINDOW_SCRIPT,
            "2",
            current,
            previous,
            self.limit.to_string(),
            now.to_string(),
            self.window_ms.to_string(),
            "1",
        ]);

        trace!(bucket = %current, "Sending sliding window command");

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&command)
            .send()
            .await?;

        let status = response.status();
        let reply: RestReply = response
            .json()
            .await
            .map_err(|e| LimiterError::RemoteStore(format!("unreadable reply ({status}): {e}")))?;

        if let Some(error) = reply.error {
            return Err(LimiterError::RemoteStore(error));
        }
        if !status.is_success() {
            return Err(LimiterError::RemoteStore(format!(
                "unexpected status {status}"
            )));
        }

        let value = reply
            .result
            .as_ref()
            .and_then(Value::as_i64)
            .ok_or_else(|| {
                LimiterError::RemoteStore(format!("unexpected result: {:?}", reply.result))
            })?;

        let outcome = if value < 0 {
            ConsumeOutcome {
                success: false,
                remaining: 0,
                reset_at,
            }
        } else {
            ConsumeOutcome {
                success: true,
                remaining: value as u64,
                reset_at,
            }
        };

        debug!(
            success = outcome.success,
            remaining = outcome.remaining,
            reset_at = outcome.reset_at,
            "Remote counter consumed"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl CounterStore for RestCounterStore {
    async fn consume(&self, key: &str) -> Result<ConsumeOutcome> {
        self.consume_at(key, now_millis()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Credentials;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::post;
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_030_000;

    #[derive(Clone)]
    struct FakeRest {
        reply: (StatusCode, Value),
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn handle(
        State(fake): State<FakeRest>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> impl IntoResponse {
        let auth = headers
            .get("authorization")
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        fake.seen.lock().push((auth, body));
        (fake.reply.0, Json(fake.reply.1.clone()))
    }

    async fn spawn_fake(status: StatusCode, reply: Value) -> (String, FakeRest) {
        let fake = FakeRest {
            reply: (status, reply),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/", post(handle))
            .with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}/", addr), fake)
    }

    fn store_for(url: &str) -> RestCounterStore {
        let backend = Backend::new(Provider::Upstash, Credentials::new(url, "secret-token"));
        let config = LimiterConfig {
            timeframe: 60,
            requests_limit: 5,
            ..Default::default()
        };
        RestCounterStore::new(backend, &config).unwrap()
    }

    #[test]
    fn test_bucket_keys() {
        let store = store_for("http://127.0.0.1:1");
        let (current, previous, reset_at) = store.bucket_keys("user:1", NOW);

        let bucket = NOW / 60_000;
        assert_eq!(current, format!("tierlimit:user:1:{}", bucket));
        assert_eq!(previous, format!("tierlimit:user:1:{}", bucket - 1));
        assert_eq!(reset_at, (bucket + 1) * 60_000);
        assert!(reset_at > NOW);
    }

    #[test]
    fn test_rejects_empty_credentials() {
        let backend = Backend::new(Provider::Upstash, Credentials::new("", "token"));
        let result = RestCounterStore::new(backend, &LimiterConfig::default());
        assert!(matches!(result, Err(LimiterError::Config(_))));
    }

    #[tokio::test]
    async fn test_consume_allowed() {
        let (url, fake) = spawn_fake(StatusCode::OK, json!({ "result": 3 })).await;
        let store = store_for(&url);

        let outcome = store.consume_at("user:1", NOW).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.remaining, 3);
        assert_eq!(outcome.reset_at, (NOW / 60_000 + 1) * 60_000);

        let seen = fake.seen.lock();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer secret-token"));
        assert_eq!(body[0], "EVAL");
        assert_eq!(body[2], "2");
        assert_eq!(body[5], "5");
        assert_eq!(body[6], NOW.to_string());
        assert_eq!(body[7], "60000");
    }

    #[tokio::test]
    async fn test_consume_over_limit() {
        let (url, _fake) = spawn_fake(StatusCode::OK, json!({ "result": -1 })).await;
        let store = store_for(&url);

        let outcome = store.consume_at("user:1", NOW).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.remaining, 0);
    }

    #[tokio::test]
    async fn test_consume_service_error() {
        let (url, _fake) = spawn_fake(
            StatusCode::BAD_REQUEST,
            json!({ "error": "ERR wrong number of arguments" }),
        )
        .await;
        let store = store_for(&url);

        let err = store.consume_at("user:1", NOW).await.unwrap_err();
        assert!(err.is_remote());
        assert!(err.to_string().contains("wrong number of arguments"));
    }

    #[tokio::test]
    async fn test_consume_unexpected_result() {
        let (url, _fake) = spawn_fake(StatusCode::OK, json!({ "result": "OK" })).await;
        let store = store_for(&url);

        let err = store.consume_at("user:1", NOW).await.unwrap_err();
        assert!(matches!(err, LimiterError::RemoteStore(_)));
    }

    #[tokio::test]
    async fn test_consume_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store = store_for(&format!("http://{}", addr));
        let err = store.consume("user:1").await.unwrap_err();
        assert!(err.is_remote());
    }
}
