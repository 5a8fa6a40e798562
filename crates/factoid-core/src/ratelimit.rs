//! Per-factoid trigger cooldown.
//!
//! Every trigger attempt stamps the canonical key, whether or not it was
//! honored, so a channel that keeps spamming `!foo` stays muted until it goes
//! quiet for a full window.

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Default cooldown between two honored triggers of the same factoid.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

pub struct RateLimiter {
    cooldown: Duration,
    last_used: DashMap<String, Instant>,
}

impl RateLimiter {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_used: DashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// True when `key` was triggered less than one cooldown ago. Always restamps `key`.
    pub fn recently_used(&self, key: &str) -> bool {
        self.recently_used_at(key, Instant::now())
    }

    /// [`Self::recently_used`] against an explicit clock reading.
    pub fn recently_used_at(&self, key: &str, now: Instant) -> bool {
        let previous = self.last_used.insert(key.to_string(), now);
        let recent = previous
            .map(|stamp| now.saturating_duration_since(stamp) < self.cooldown)
            .unwrap_or(false);
        if recent {
            tracing::debug!(
                target: "factoid::trigger",
                key = %key,
                "Not handling factoid, it was used too recently"
            );
        }
        recent
    }

    /// Number of keys ever stamped.
    pub fn tracked(&self) -> usize {
        self.last_used.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
