//! Adaptive per-identity rate limiting.
//!
//! Sliding-window counters per user and per group, backed by the
//! cache. The base limit from configuration is scaled by a trust
//! multiplier derived from the user's moderation history: clean,
//! long-standing users get looser limits, flagged or previously
//! blocked users tighter ones. Fails open on store trouble so an
//! infrastructure outage never turns into a denial of service.

use std::time::Duration;

use crate::cache::{CacheService, UserStats};
use crate::types::MessageContext;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub user_limit: u64,
    pub user_window: Duration,
    pub group_limit: u64,
    pub group_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            user_limit: 20,
            user_window: Duration::from_secs(60),
            group_limit: 300,
            group_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    DeniedUser,
    DeniedGroup,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed)
    }
}

pub struct AdaptiveRateLimiter {
    config: RateLimitConfig,
}

impl AdaptiveRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        AdaptiveRateLimiter { config }
    }

    /// Check and count one event. The window entry is recorded even
    /// when the decision is a denial, so sustained floods stay denied.
    pub async fn check(&self, cache: &CacheService, ctx: &MessageContext) -> RateDecision {
        let personalized = self.personalized_limit(cache, ctx).await;

        let user_key = format!(
            "fg:rate:user:{}:{}:{}",
            ctx.group_id,
            ctx.user_id,
            self.config.user_window.as_secs()
        );
        match cache.window_add(&user_key, self.config.user_window).await {
            Some(count) if count > personalized => {
                log::info!(
                    "rate limit: user {} in group {} at {count}/{personalized}",
                    ctx.user_id,
                    ctx.group_id
                );
                return RateDecision::DeniedUser;
            }
            Some(_) => {}
            // Store unavailable: fail open rather than deny everyone.
            None => return RateDecision::Allowed,
        }

        let group_key = format!(
            "fg:rate:group:{}:{}",
            ctx.group_id,
            self.config.group_window.as_secs()
        );
        match cache.window_add(&group_key, self.config.group_window).await {
            Some(count) if count > self.config.group_limit => {
                log::info!(
                    "rate limit: group {} at {count}/{}",
                    ctx.group_id,
                    self.config.group_limit
                );
                RateDecision::DeniedGroup
            }
            _ => RateDecision::Allowed,
        }
    }

    /// Base limit scaled by a trust multiplier from moderation history.
    /// Stats unavailable means the base limit applies unchanged.
    async fn personalized_limit(&self, cache: &CacheService, ctx: &MessageContext) -> u64 {
        let stats = cache.user_stats(ctx.group_id, ctx.user_id).await;
        let multiplier = Self::trust_multiplier(stats.as_ref());
        ((self.config.user_limit as f64 * multiplier) as u64).max(1)
    }

    fn trust_multiplier(stats: Option<&UserStats>) -> f64 {
        let Some(stats) = stats else {
            return 1.0;
        };
        if stats.blocked > 0 {
            0.5
        } else if stats.flagged > 0 {
            0.75
        } else if stats.approved >= 10 {
            2.0
        } else if stats.approved >= 5 {
            1.5
        } else {
            1.0
        }
    }
}
