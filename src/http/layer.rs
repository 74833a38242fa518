//! Tower layer that puts a [`RateLimiter`] in front of a service.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tower::{Layer, Service};
use tracing::{error, warn};

use crate::error::LimiterError;
use crate::ratelimit::{now_millis, Decision, RateLimiter};

use super::key::KeyExtractor;

/// Body returned when the protected handler is not invoked.
const INTERNAL_ERROR_MESSAGE: &str = "Internal Server Error";

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Error message
    pub error: String,
}

impl HttpErrorResponse {
    fn reply(status: StatusCode, message: impl Into<String>) -> Response {
        (
            status,
            Json(HttpErrorResponse {
                error: message.into(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for LimiterError {
    fn into_response(self) -> Response {
        match self {
            LimiterError::KeyIndeterminate => {
                HttpErrorResponse::reply(StatusCode::BAD_REQUEST, self.to_string())
            }
            _ => {
                HttpErrorResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_MESSAGE)
            }
        }
    }
}

/// Layer that rate limits every request reaching the wrapped service.
pub struct RateLimitLayer<K> {
    limiter: RateLimiter,
    extractor: Arc<K>,
}

impl<K: KeyExtractor> RateLimitLayer<K> {
    /// Create a layer keyed by `extractor`.
    pub fn new(limiter: RateLimiter, extractor: K) -> Self {
        Self {
            limiter,
            extractor: Arc::new(extractor),
        }
    }
}

impl<K> Clone for RateLimitLayer<K> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, K> Layer<S> for RateLimitLayer<K> {
    type Service = RateLimitService<S, K>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

/// Rate limiting service.
pub struct RateLimitService<S, K> {
    inner: S,
    limiter: RateLimiter,
    extractor: Arc<K>,
}

impl<S: Clone, K> Clone for RateLimitService<S, K> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            extractor: self.extractor.clone(),
        }
    }
}

impl<S, K> Service<Request<Body>> for RateLimitService<S, K>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    K: KeyExtractor,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let limiter = self.limiter.clone();
        let extractor = self.extractor.clone();

        Box::pin(async move {
            let (parts, body) = request.into_parts();
            let key = extractor.extract(&parts).await;
            if key.is_empty() {
                warn!(path = %parts.uri.path(), "Rate limit key could not be determined");
                return Ok(LimiterError::KeyIndeterminate.into_response());
            }
            let request = Request::from_parts(parts, body);

            match limiter.check(&key).await {
                Ok(decision @ Decision::Allow { .. }) => {
                    let mut response = inner.call(request).await?;
                    insert_limit_headers(response.headers_mut(), &limiter, &decision);
                    Ok(response)
                }
                Ok(decision @ Decision::Reject { .. }) => {
                    let mut response = HttpErrorResponse::reply(
                        StatusCode::TOO_MANY_REQUESTS,
                        limiter.config().error_message(),
                    );
                    let headers = response.headers_mut();
                    insert_limit_headers(headers, &limiter, &decision);
                    headers.insert("retry-after", HeaderValue::from(retry_after_secs(&decision)));
                    Ok(response)
                }
                Err(e) => {
                    error!(key = %key, error = %e, "Rate limit check failed");
                    Ok(e.into_response())
                }
            }
        })
    }
}

fn insert_limit_headers(headers: &mut HeaderMap, limiter: &RateLimiter, decision: &Decision) {
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from(limiter.config().requests_limit),
    );
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.remaining()),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at() / 1000),
    );
}

/// Whole seconds until the window closes, rounded up.
fn retry_after_secs(decision: &Decision) -> u64 {
    decision.reset_at().saturating_sub(now_millis()).div_ceil(1000)
}
