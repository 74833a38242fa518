//! Rate limiting logic and state management.

mod cache;
mod limiter;
mod state;

pub use cache::LruTtlCache;
pub use limiter::{Decision, RateLimiter, StatsSnapshot};
pub use state::{now_millis, RateLimitState};
