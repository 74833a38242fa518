//! Tierlimit - two-tier rate limiting for HTTP handlers
//!
//! Requests are decided from a bounded local LRU cache of per-key quota
//! while it holds a live window, and from a remote sliding-window counter
//! store otherwise. The cache keeps remote round-trips to roughly one per
//! key per window; the remote store owns the ceiling across processes.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;

#[cfg(test)]
mod testing;
