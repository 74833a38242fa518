//! Per-key rate limit state.

use std::time::Duration;

/// Milliseconds since the Unix epoch, read from the system clock.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Snapshot of a key's quota within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitState {
    /// Units left in the current window
    pub remaining: u64,
    /// When the window closes, in milliseconds since the Unix epoch
    pub reset_at: u64,
}

impl RateLimitState {
    /// Create a new state snapshot.
    pub fn new(remaining: u64, reset_at: u64) -> Self {
        Self {
            remaining,
            reset_at,
        }
    }

    /// Whether the window this state describes has closed.
    pub fn is_expired(&self, now: u64) -> bool {
        self.reset_at <= now
    }

    /// Time left until the window closes, zero once it has.
    pub fn time_to_reset(&self, now: u64) -> Duration {
        Duration::from_millis(self.reset_at.saturating_sub(now))
    }

    /// The state after one more unit is taken locally.
    pub fn consume_one(&self) -> Self {
        Self {
            remaining: self.remaining.saturating_sub(1),
            reset_at: self.reset_at,
        }
    }
}
