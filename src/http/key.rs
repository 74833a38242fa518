//! Rate limit key extraction.

use std::future::Future;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use axum::http::HeaderName;

/// Derives the rate limit key for a request.
///
/// An empty string means the request cannot be rate limited and is
/// answered with a 400. Closures of the form
/// `|parts: &Parts| async move { ... }` implement this trait, as long as
/// the returned future does not borrow `parts`.
#[async_trait]
pub trait KeyExtractor: Send + Sync + 'static {
    async fn extract(&self, parts: &Parts) -> String;
}

#[async_trait]
impl<F, Fut> KeyExtractor for F
where
    F: Fn(&Parts) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = String> + Send + 'static,
{
    async fn extract(&self, parts: &Parts) -> String {
        (self)(parts).await
    }
}

/// Keys requests by client IP address.
///
/// Uses the first entry of `x-forwarded-for`, then `x-real-ip`, then the
/// peer address from axum's `ConnectInfo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientIp;

#[async_trait]
impl KeyExtractor for ClientIp {
    async fn extract(&self, parts: &Parts) -> String {
        client_ip(parts).unwrap_or_default()
    }
}

fn client_ip(parts: &Parts) -> Option<String> {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').map(str::trim).find(|ip| !ip.is_empty()));
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }

    let real_ip = parts
        .headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return Some(ip.to_string());
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// Keys requests by the value of a header, such as an API key.
#[derive(Debug, Clone)]
pub struct HeaderKey {
    name: HeaderName,
}

impl HeaderKey {
    pub fn new(name: HeaderName) -> Self {
        Self { name }
    }
}

#[async_trait]
impl KeyExtractor for HeaderKey {
    async fn extract(&self, parts: &Parts) -> String {
        parts
            .headers
            .get(&self.name)
            .and_then(|h| h.to_str().ok())
            .map(|value| value.trim().to_string())
            .unwrap_or_default()
    }
}
