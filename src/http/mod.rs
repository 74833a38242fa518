//! HTTP adapter: rate limits axum routes.
//!
//! ```rust,ignore
//! let limiter = RateLimiter::from_backend(config, Backend::from_env(Provider::Upstash)?)?;
//! let app = Router::new()
//!     .route("/api/hello", get(hello))
//!     .layer(RateLimitLayer::new(limiter, ClientIp));
//! ```

mod key;
mod layer;

pub use key::{ClientIp, HeaderKey, KeyExtractor};
pub use layer::{HttpErrorResponse, RateLimitLayer, RateLimitService};
