//! YAML configuration surface.
//!
//! All tunables live here; nothing in the pipeline reads ambient
//! state. Durations are expressed in seconds (or milliseconds where
//! named) so the file stays plain YAML scalars.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::action::ActionConfig;
use crate::backpressure::BackpressureConfig;
use crate::breaker::BreakerConfig;
use crate::cache::CacheTtls;
use crate::collectors::ContentPatterns;
use crate::pipeline::PipelineConfig;
use crate::rate_limiter::RateLimitConfig;
use crate::scorer::ScoringConfig;
use crate::types::GroupKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub failure_window_secs: u64,
    pub reset_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let base = BreakerConfig::default();
        BreakerSettings {
            failure_threshold: base.failure_threshold,
            failure_window_secs: base.failure_window.as_secs(),
            reset_timeout_secs: base.reset_timeout.as_secs(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            failure_window: Duration::from_secs(self.failure_window_secs),
            reset_timeout: Duration::from_secs(self.reset_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub user_limit: u64,
    pub user_window_secs: u64,
    pub group_limit: u64,
    pub group_window_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let base = RateLimitConfig::default();
        RateLimitSettings {
            user_limit: base.user_limit,
            user_window_secs: base.user_window.as_secs(),
            group_limit: base.group_limit,
            group_window_secs: base.group_window.as_secs(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            user_limit: self.user_limit,
            user_window: Duration::from_secs(self.user_window_secs),
            group_limit: self.group_limit,
            group_window: Duration::from_secs(self.group_window_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheTtlSettings {
    pub message_timestamps_secs: u64,
    pub user_stats_secs: u64,
    pub first_message_secs: u64,
    pub join_time_secs: u64,
    pub decision_secs: u64,
    pub subscription_secs: u64,
}

impl Default for CacheTtlSettings {
    fn default() -> Self {
        let base = CacheTtls::default();
        CacheTtlSettings {
            message_timestamps_secs: base.message_timestamps.as_secs(),
            user_stats_secs: base.user_stats.as_secs(),
            first_message_secs: base.first_message.as_secs(),
            join_time_secs: base.join_time.as_secs(),
            decision_secs: base.decision.as_secs(),
            subscription_secs: base.subscription.as_secs(),
        }
    }
}

impl CacheTtlSettings {
    pub fn to_cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            message_timestamps: Duration::from_secs(self.message_timestamps_secs),
            user_stats: Duration::from_secs(self.user_stats_secs),
            first_message: Duration::from_secs(self.first_message_secs),
            join_time: Duration::from_secs(self.join_time_secs),
            decision: Duration::from_secs(self.decision_secs),
            subscription: Duration::from_secs(self.subscription_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FloodgateConfig {
    pub pipeline: PipelineConfig,
    pub backpressure: BackpressureConfig,
    /// Breaker guarding the key-value store.
    pub cache_breaker: BreakerSettings,
    /// Breaker guarding the pipeline as a whole.
    pub pipeline_breaker: BreakerSettings,
    pub rate_limit: RateLimitSettings,
    pub cache_ttls: CacheTtlSettings,
    pub scoring: ScoringConfig,
    pub actions: ActionConfig,
    pub patterns: ContentPatterns,
    /// Deadline for one similarity-provider call.
    pub similarity_timeout_ms: u64,
}

impl FloodgateConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FloodgateConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for kind in [GroupKind::Public, GroupKind::Private, GroupKind::Restricted] {
            let t = self.scoring.thresholds(kind);
            anyhow::ensure!(
                t.valid(),
                "thresholds for {kind:?} must be strictly ascending (flag {} < restrict {} < ban {})",
                t.flag_min,
                t.restrict_min,
                t.ban_min
            );
        }
        let (lo, hi) = self.scoring.review_band;
        anyhow::ensure!(lo <= hi, "review band is inverted ({lo} > {hi})");

        let bp = &self.backpressure;
        anyhow::ensure!(bp.max_concurrent > 0, "max_concurrent must be positive");
        anyhow::ensure!(
            bp.light_pct < bp.heavy_pct && bp.heavy_pct < bp.shed_pct && bp.shed_pct <= 100,
            "degradation percentages must satisfy light < heavy < shed <= 100"
        );

        anyhow::ensure!(
            self.cache_breaker.failure_threshold > 0
                && self.pipeline_breaker.failure_threshold > 0,
            "breaker failure_threshold must be positive"
        );
        anyhow::ensure!(
            self.rate_limit.user_limit > 0 && self.rate_limit.group_limit > 0,
            "rate limits must be positive"
        );
        anyhow::ensure!(
            !self.actions.restriction_ladder_secs.is_empty(),
            "restriction ladder must have at least one entry"
        );
        anyhow::ensure!(
            self.pipeline.collector_timeout_ms < self.pipeline.message_deadline_ms,
            "collector timeout must be shorter than the message deadline"
        );
        Ok(())
    }

    pub fn similarity_timeout(&self) -> Duration {
        Duration::from_millis(self.similarity_timeout_ms)
    }
}

impl Default for FloodgateConfig {
    fn default() -> Self {
        FloodgateConfig {
            pipeline: PipelineConfig::default(),
            backpressure: BackpressureConfig::default(),
            cache_breaker: BreakerSettings::default(),
            pipeline_breaker: BreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
            cache_ttls: CacheTtlSettings::default(),
            scoring: ScoringConfig::default(),
            actions: ActionConfig::default(),
            patterns: ContentPatterns::default(),
            similarity_timeout_ms: 400,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        FloodgateConfig::default().validate().unwrap();
    }

    #[test]
    fn default_config_round_trips_through_yaml() {
        let config = FloodgateConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: FloodgateConfig = serde_yaml::from_str(&yaml).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.rate_limit.user_limit, config.rate_limit.user_limit);
        assert_eq!(parsed.scoring.thresholds_public.ban_min, 90);
    }

    #[test]
    fn partial_yaml_uses_section_defaults() {
        let yaml = "rate_limit:\n  user_limit: 5\n  user_window_secs: 60\n  group_limit: 100\n  group_window_secs: 60\n";
        let parsed: FloodgateConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.rate_limit.user_limit, 5);
        assert_eq!(parsed.backpressure.max_concurrent, 100);
    }

    #[test]
    fn inverted_thresholds_fail_validation() {
        let mut config = FloodgateConfig::default();
        config.scoring.thresholds_public.flag_min = 95;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_concurrency_fails_validation() {
        let mut config = FloodgateConfig::default();
        config.backpressure.max_concurrent = 0;
        assert!(config.validate().is_err());
    }
}
