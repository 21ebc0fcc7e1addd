//! Message pipeline: admission, rate limiting, signal collection,
//! scoring and bookkeeping for one inbound event.
//!
//! Stage order is fixed. Admission and rate limiting run before any
//! expensive work; the decision cache short-circuits repeat content;
//! collectors run under per-stage deadlines and the whole analysis
//! under one outer deadline. Any infrastructure failure degrades the
//! result toward allow, never toward ban.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::backpressure::{Admission, BackpressureController, DegradationLevel};
use crate::breaker::{BreakerConfig, CircuitBreaker, CircuitState};
use crate::cache::CacheService;
use crate::collectors::{BehaviorCollector, ContentCollector, ProfileCollector};
use crate::network::NetworkAnalyzer;
use crate::rate_limiter::{AdaptiveRateLimiter, RateDecision};
use crate::scorer::RiskScorer;
use crate::types::{
    CachedDecision, Collected, JoinEvent, MessageContext, RiskResult, Signals, ThreatType, Verdict,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaidConfig {
    /// Joins within `join_window` that flip the group into raid mode.
    pub join_threshold: u64,
    pub join_window_secs: u64,
    /// How long raid mode stays active once triggered.
    pub mode_ttl_secs: u64,
}

impl Default for RaidConfig {
    fn default() -> Self {
        RaidConfig {
            join_threshold: 10,
            join_window_secs: 60,
            mode_ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Outer deadline for one message end to end.
    pub message_deadline_ms: u64,
    /// Deadline for each collector stage.
    pub collector_timeout_ms: u64,
    pub raid: RaidConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            message_deadline_ms: 2000,
            collector_timeout_ms: 500,
            raid: RaidConfig::default(),
        }
    }
}

/// Terminal outcome for one message. Shed and rate-limited messages
/// never reach the scorer and carry no verdict.
#[derive(Debug)]
pub enum PipelineOutcome {
    Processed(RiskResult),
    /// Dropped at admission; the message passes through unexamined.
    Shed,
    /// Sender or group exceeded its message budget.
    RateLimited,
}

pub struct MessagePipeline {
    cache: Arc<CacheService>,
    network: Arc<NetworkAnalyzer>,
    backpressure: BackpressureController,
    rate_limiter: AdaptiveRateLimiter,
    behavior: BehaviorCollector,
    content: ContentCollector,
    profile: ProfileCollector,
    scorer: RiskScorer,
    /// Guards the pipeline as a whole; open means repeated analysis
    /// failures and forces shed-level degradation.
    breaker: CircuitBreaker,
    config: PipelineConfig,
}

impl MessagePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cache: Arc<CacheService>,
        network: Arc<NetworkAnalyzer>,
        backpressure: BackpressureController,
        rate_limiter: AdaptiveRateLimiter,
        content: ContentCollector,
        scorer: RiskScorer,
        breaker_config: BreakerConfig,
        config: PipelineConfig,
    ) -> Self {
        MessagePipeline {
            cache,
            network,
            backpressure,
            rate_limiter,
            behavior: BehaviorCollector::new(),
            content,
            profile: ProfileCollector::new(),
            scorer,
            breaker: CircuitBreaker::new("pipeline", breaker_config),
            config,
        }
    }

    pub fn degradation_level(&self) -> DegradationLevel {
        self.backpressure.level(&self.breaker)
    }

    /// Run one message through the pipeline.
    pub async fn process(&self, ctx: &MessageContext) -> PipelineOutcome {
        let permit = match self.backpressure.try_admit() {
            Admission::Admitted(permit) => permit,
            Admission::Shed => return PipelineOutcome::Shed,
        };

        let load = self.backpressure.load_level();
        if load == DegradationLevel::Shed {
            warn!(
                "pipeline saturated, passing message {} through unexamined",
                ctx.message_id
            );
            drop(permit);
            return PipelineOutcome::Shed;
        }

        match self.rate_limiter.check(&self.cache, ctx).await {
            RateDecision::Allowed => {}
            decision => {
                info!(
                    "rate limited message {} from user {} in group {} ({:?})",
                    ctx.message_id, ctx.user_id, ctx.group_id, decision
                );
                drop(permit);
                return PipelineOutcome::RateLimited;
            }
        }

        // Recorded before the decision cache so frequency windows
        // count repeats served from it; those are exactly the
        // messages a flood is made of.
        self.cache
            .record_message(ctx.group_id, ctx.user_id, ctx.timestamp.timestamp())
            .await;

        // Identical content that was just scored keeps its verdict.
        let content_hash = NetworkAnalyzer::hash_message(&ctx.text);
        let decision_key = format!("fg:decision:{content_hash}");
        if let Some(cached) = self.cache.get_json::<CachedDecision>(&decision_key).await {
            debug!(
                "decision cache hit for message {} (verdict {})",
                ctx.message_id,
                cached.verdict.as_str()
            );
            let result = cached.into_result();
            self.record_outcome(ctx, &result).await;
            drop(permit);
            return PipelineOutcome::Processed(result);
        }

        // Breaker admission happens last so a consumed half-open probe
        // is always followed by a recorded outcome.
        if !self.breaker.allow_request() {
            warn!(
                "pipeline breaker open, passing message {} through unexamined",
                ctx.message_id
            );
            drop(permit);
            return PipelineOutcome::Shed;
        }
        let level = match self.breaker.state() {
            CircuitState::HalfOpen => load.max(DegradationLevel::Heavy),
            _ => load,
        };

        let deadline = Duration::from_millis(self.config.message_deadline_ms);
        let result = match tokio::time::timeout(deadline, self.analyze(ctx, level)).await {
            Ok(result) => {
                self.breaker.record_success();
                result
            }
            Err(_) => {
                warn!(
                    "analysis deadline ({}ms) exceeded for message {}, allowing",
                    self.config.message_deadline_ms, ctx.message_id
                );
                self.breaker.record_failure();
                RiskResult::fail_open("Analysis deadline exceeded")
            }
        };

        self.record_outcome(ctx, &result).await;
        if Self::decision_is_cacheable(&result) {
            self.cache
                .set_json(&decision_key, &CachedDecision::from(&result), self.cache.ttls().decision)
                .await;
        }

        info!(
            "message {} user {} group {}: score {} verdict {} (level {})",
            ctx.message_id,
            ctx.user_id,
            ctx.group_id,
            result.score,
            result.verdict.as_str(),
            level.as_str()
        );

        drop(permit);
        PipelineOutcome::Processed(result)
    }

    /// Collect signals at the given degradation level and score them.
    async fn analyze(&self, ctx: &MessageContext, level: DegradationLevel) -> RiskResult {
        let stage = Duration::from_millis(self.config.collector_timeout_ms);
        let include_history = level == DegradationLevel::Normal;

        let network = match tokio::time::timeout(stage, self.network.analyze(ctx, include_history))
            .await
        {
            Ok(signals) => Collected::Available(signals),
            Err(_) => {
                warn!("network analysis timed out for message {}", ctx.message_id);
                Collected::Unavailable
            }
        };

        let (behavior, content, profile) = if level <= DegradationLevel::Light {
            let behavior =
                match tokio::time::timeout(stage, self.behavior.collect(&self.cache, ctx)).await {
                    Ok(signals) => signals,
                    Err(_) => {
                        warn!("behavior collection timed out for message {}", ctx.message_id);
                        Collected::Unavailable
                    }
                };
            (behavior, self.content.collect(ctx), self.profile.collect(ctx))
        } else {
            (Collected::Unavailable, Collected::Unavailable, Collected::Unavailable)
        };

        let signals = Signals { behavior, content, network, profile };
        self.scorer.score(&signals, ctx.group_kind)
    }

    /// Cached decisions apply to every sender of the same content, so
    /// only verdicts the content itself earned are stored. Allow
    /// verdicts and verdicts bound to a sender or group (blocklist,
    /// raid) must not leak across identities.
    fn decision_is_cacheable(result: &RiskResult) -> bool {
        result.verdict > Verdict::Allow
            && !result
                .threats
                .iter()
                .any(|t| matches!(t, ThreatType::BlocklistHit | ThreatType::RaidJoin))
    }

    async fn record_outcome(&self, ctx: &MessageContext, result: &RiskResult) {
        self.cache
            .record_verdict(ctx.group_id, ctx.user_id, result.verdict.as_str())
            .await;
    }

    /// Track a join event and flip the group into raid mode when the
    /// join rate crosses the threshold.
    pub async fn handle_join(&self, event: &JoinEvent) {
        self.cache
            .record_join_time(event.group_id, event.user_id, event.timestamp.timestamp())
            .await;

        let key = format!("fg:raid:joins:{}", event.group_id);
        let window = Duration::from_secs(self.config.raid.join_window_secs);
        let Some(joins) = self.cache.window_add(&key, window).await else {
            return;
        };

        if joins >= self.config.raid.join_threshold {
            let flag = format!("fg:raid:active:{}", event.group_id);
            let ttl = Duration::from_secs(self.config.raid.mode_ttl_secs);
            self.cache.set(&flag, "1", ttl).await;
            warn!(
                "raid mode active for group {}: {} joins in {}s",
                event.group_id, joins, self.config.raid.join_window_secs
            );
        }
    }

    pub async fn raid_mode_active(&self, group: i64) -> bool {
        self.cache
            .get(&format!("fg:raid:active:{group}"))
            .await
            .as_deref()
            == Some("1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheTtls;
    use crate::collectors::ContentPatterns;
    use crate::network::NoopSimilarityProvider;
    use crate::rate_limiter::RateLimitConfig;
    use crate::scorer::ScoringConfig;
    use crate::store::MemoryStore;
    use crate::types::{GroupKind, SenderProfile, Verdict};
    use crate::backpressure::BackpressureConfig;
    use chrono::Utc;

    fn pipeline_with_store(store: Arc<dyn crate::store::KeyValueStore>) -> MessagePipeline {
        let cache = Arc::new(CacheService::new(
            store,
            BreakerConfig::default(),
            CacheTtls::default(),
        ));
        pipeline_with_cache(cache)
    }

    fn pipeline_with_cache(cache: Arc<CacheService>) -> MessagePipeline {
        let network = Arc::new(NetworkAnalyzer::new(
            Arc::clone(&cache),
            Arc::new(NoopSimilarityProvider),
            Duration::from_millis(100),
        ));
        MessagePipeline::new(
            cache,
            network,
            BackpressureController::new(BackpressureConfig::default()),
            AdaptiveRateLimiter::new(RateLimitConfig::default()),
            ContentCollector::new(ContentPatterns::default()),
            RiskScorer::new(ScoringConfig::default()),
            BreakerConfig::default(),
            PipelineConfig::default(),
        )
    }

    fn pipeline() -> MessagePipeline {
        pipeline_with_store(Arc::new(MemoryStore::new()))
    }

    fn message(text: &str) -> MessageContext {
        MessageContext {
            message_id: 1,
            group_id: 100,
            user_id: 7,
            group_kind: GroupKind::Public,
            text: text.to_string(),
            has_attachment: false,
            has_links: false,
            is_forward: false,
            forward_from_channel: false,
            is_reply: false,
            timestamp: Utc::now(),
            sender: SenderProfile {
                username: Some("carol".to_string()),
                has_avatar: true,
                ..SenderProfile::default()
            },
        }
    }

    fn join(group: i64, user: i64) -> JoinEvent {
        JoinEvent {
            group_id: group,
            user_id: user,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn benign_message_is_allowed() {
        let pipeline = pipeline();
        match pipeline.process(&message("hello everyone")).await {
            PipelineOutcome::Processed(result) => assert_eq!(result.verdict, Verdict::Allow),
            other => panic!("expected processed outcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn repeat_content_hits_decision_cache() {
        let pipeline = pipeline();
        let first = pipeline.process(&message("Guaranteed profit! Send BTC now")).await;
        let PipelineOutcome::Processed(first) = first else {
            panic!("expected processed outcome");
        };

        let mut again = message("Guaranteed profit! Send BTC now");
        again.message_id = 2;
        again.user_id = 8;
        let PipelineOutcome::Processed(second) = pipeline.process(&again).await else {
            panic!("expected processed outcome");
        };
        assert_eq!(second.verdict, first.verdict);
        assert_eq!(second.score, first.score);
        assert!(second
            .contributing_factors
            .iter()
            .any(|f| f.contains("Cached decision")));
    }

    #[tokio::test]
    async fn allow_verdicts_are_not_cached() {
        let pipeline = pipeline();
        let PipelineOutcome::Processed(first) = pipeline.process(&message("good morning")).await
        else {
            panic!("expected processed outcome");
        };
        assert_eq!(first.verdict, Verdict::Allow);

        let mut again = message("good morning");
        again.message_id = 2;
        let PipelineOutcome::Processed(second) = pipeline.process(&again).await else {
            panic!("expected processed outcome");
        };
        assert!(!second
            .contributing_factors
            .iter()
            .any(|f| f.contains("Cached decision")));
    }

    #[tokio::test]
    async fn cached_decisions_still_count_toward_frequency_windows() {
        let cache = Arc::new(CacheService::new(
            Arc::new(MemoryStore::new()),
            BreakerConfig::default(),
            CacheTtls::default(),
        ));
        let pipeline = pipeline_with_cache(Arc::clone(&cache));

        let first = pipeline.process(&message("Guaranteed profit! Send BTC now")).await;
        assert!(matches!(first, PipelineOutcome::Processed(_)));

        let mut again = message("Guaranteed profit! Send BTC now");
        again.message_id = 2;
        let PipelineOutcome::Processed(second) = pipeline.process(&again).await else {
            panic!("expected processed outcome");
        };
        assert!(second
            .contributing_factors
            .iter()
            .any(|f| f.contains("Cached decision")));
        let count = cache.message_count(100, 7, Duration::from_secs(3600)).await;
        assert_eq!(count, Some(2));
    }

    #[tokio::test]
    async fn over_limit_sender_is_rate_limited() {
        let pipeline = pipeline();
        // Approvals loosen the personalized limit as they accumulate,
        // so the denial lands well past the base limit of 20.
        let mut saw_rate_limited = false;
        for i in 0..60 {
            let mut ctx = message(&format!("message number {i}"));
            ctx.message_id = i;
            if matches!(pipeline.process(&ctx).await, PipelineOutcome::RateLimited) {
                saw_rate_limited = true;
                break;
            }
        }
        assert!(saw_rate_limited);
    }

    #[tokio::test]
    async fn join_burst_activates_raid_mode() {
        let pipeline = pipeline();
        for user in 0..10 {
            pipeline.handle_join(&join(100, user)).await;
        }
        assert!(pipeline.raid_mode_active(100).await);
        assert!(!pipeline.raid_mode_active(200).await);
    }

    #[tokio::test]
    async fn fast_message_during_raid_is_restricted() {
        let pipeline = pipeline();
        for user in 0..10 {
            pipeline.handle_join(&join(100, user)).await;
        }
        // The raider posts immediately after joining.
        pipeline.handle_join(&join(100, 99)).await;
        let mut ctx = message("check out my channel");
        ctx.user_id = 99;
        let PipelineOutcome::Processed(result) = pipeline.process(&ctx).await else {
            panic!("expected processed outcome");
        };
        assert!(result.verdict >= Verdict::Restrict);
    }

    #[tokio::test]
    async fn store_outage_fails_open() {
        let flaky = Arc::new(crate::store::FlakyStore::new(MemoryStore::new()));
        flaky.set_down(true);
        let pipeline = pipeline_with_store(flaky);
        let PipelineOutcome::Processed(result) = pipeline.process(&message("hello")).await else {
            panic!("expected processed outcome");
        };
        assert_eq!(result.verdict, Verdict::Allow);
    }
}
