//! Per-cluster token budgets. Breaches are reported to the caller, which only
//! logs them; requests are never blocked.

use std::num::NonZeroU32;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use nonzero_ext::nonzero;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub tokens_per_minute: NonZeroU32,
    pub tokens_per_hour: NonZeroU32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_minute: nonzero!(800_000u32),
            tokens_per_hour: nonzero!(8_000_000u32),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub minute_allowed: bool,
    pub hour_allowed: bool,
}

impl RateLimitDecision {
    pub fn allowed(&self) -> bool {
        self.minute_allowed && self.hour_allowed
    }
}

pub struct ClusterRateLimiter {
    per_minute: DefaultKeyedRateLimiter<String>,
    per_hour: DefaultKeyedRateLimiter<String>,
}

impl std::fmt::Debug for ClusterRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterRateLimiter").finish_non_exhaustive()
    }
}

impl Default for ClusterRateLimiter {
    fn default() -> Self {
        Self::new(&RateLimitConfig::default())
    }
}

impl ClusterRateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            per_minute: RateLimiter::keyed(Quota::per_minute(config.tokens_per_minute)),
            per_hour: RateLimiter::keyed(Quota::per_hour(config.tokens_per_hour)),
        }
    }

    /// Consumes `tokens` from both of the cluster's buckets.
    pub fn check(&self, cluster_id: &str, tokens: u32) -> RateLimitDecision {
        let Some(tokens) = NonZeroU32::new(tokens) else {
            return RateLimitDecision {
                minute_allowed: true,
                hour_allowed: true,
            };
        };
        let key = cluster_id.to_string();
        RateLimitDecision {
            minute_allowed: matches!(self.per_minute.check_key_n(&key, tokens), Ok(Ok(()))),
            hour_allowed: matches!(self.per_hour.check_key_n(&key, tokens), Ok(Ok(()))),
        }
    }
}
