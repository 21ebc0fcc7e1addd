//! Behavior signal collection: message-frequency windows, join/first-
//! message timing, moderation history and the group raid flag.
//!
//! Every lookup goes through the fail-open cache, so individual
//! fields degrade to `None` rather than failing the collector.

use std::time::Duration;

use crate::cache::CacheService;
use crate::types::{BehaviorSignals, Collected, MessageContext};

pub struct BehaviorCollector;

impl BehaviorCollector {
    pub fn new() -> Self {
        BehaviorCollector
    }

    pub async fn collect(
        &self,
        cache: &CacheService,
        ctx: &MessageContext,
    ) -> Collected<BehaviorSignals> {
        let group = ctx.group_id;
        let user = ctx.user_id;
        let now = ctx.timestamp.timestamp();

        let messages_last_minute = cache.message_count(group, user, Duration::from_secs(60)).await;
        let messages_last_hour = cache.message_count(group, user, Duration::from_secs(3600)).await;
        let messages_last_day = cache.message_count(group, user, Duration::from_secs(86400)).await;

        let join_time = cache.join_time(group, user).await;
        let join_to_message_secs = join_time.map(|t| now - t);

        // Join to first message. Without a recorded join there is no
        // interval, so the field stays unknown.
        let time_to_first_message_secs =
            match (join_time, cache.first_message_time(group, user).await) {
                (Some(joined), Some(first)) => Some((first - joined).max(0)),
                _ => None,
            };

        let stats = cache.user_stats(group, user).await;
        let (approved, flagged, blocked) = match &stats {
            Some(s) => (Some(s.approved), Some(s.flagged), Some(s.blocked)),
            None => (None, None, None),
        };
        // Outcome stats are written after scoring, so an absent or
        // empty entry means no earlier message finished the pipeline.
        // Gated on the window lookup to keep the field unknown during
        // a store outage.
        let is_first_message =
            messages_last_day.map(|_| stats.as_ref().map_or(0, |s| s.total_messages) == 0);

        let channel_subscriber = cache.subscription_status(group, user).await;
        let raid_mode_active = cache
            .get(&format!("fg:raid:active:{group}"))
            .await
            .map(|v| v == "1")
            .unwrap_or(false);

        Collected::Available(BehaviorSignals {
            messages_last_minute,
            messages_last_hour,
            messages_last_day,
            join_to_message_secs,
            time_to_first_message_secs,
            is_first_message,
            approved_messages: approved,
            flagged_messages: flagged,
            blocked_messages: blocked,
            channel_subscriber,
            raid_mode_active,
            is_reply: ctx.is_reply,
        })
    }
}

impl Default for BehaviorCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::cache::CacheTtls;
    use crate::store::{FlakyStore, MemoryStore};
    use crate::types::{GroupKind, SenderProfile};
    use chrono::Utc;
    use std::sync::Arc;

    fn cache(store: Arc<dyn crate::store::KeyValueStore>) -> CacheService {
        CacheService::new(store, BreakerConfig::default(), CacheTtls::default())
    }

    fn ctx() -> MessageContext {
        MessageContext {
            message_id: 1,
            group_id: 10,
            user_id: 42,
            group_kind: GroupKind::Public,
            text: "hi".to_string(),
            has_attachment: false,
            has_links: false,
            is_forward: false,
            forward_from_channel: false,
            is_reply: false,
            timestamp: Utc::now(),
            sender: SenderProfile::default(),
        }
    }

    async fn collect(cache: &CacheService, ctx: &MessageContext) -> BehaviorSignals {
        match BehaviorCollector::new().collect(cache, ctx).await {
            Collected::Available(s) => s,
            Collected::Unavailable => panic!("behavior collector returns available"),
        }
    }

    #[tokio::test]
    async fn counts_recent_messages() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ctx = ctx();
        for _ in 0..4 {
            cache.record_message(10, 42, ctx.timestamp.timestamp()).await;
        }
        let s = collect(&cache, &ctx).await;
        assert_eq!(s.messages_last_minute, Some(4));
        assert_eq!(s.messages_last_hour, Some(4));
    }

    #[tokio::test]
    async fn join_timing_and_raid_flag() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ctx = ctx();
        cache.record_join_time(10, 42, ctx.timestamp.timestamp() - 5).await;
        cache.set("fg:raid:active:10", "1", Duration::from_secs(60)).await;

        let s = collect(&cache, &ctx).await;
        assert_eq!(s.join_to_message_secs, Some(5));
        assert!(s.raid_mode_active);
    }

    #[tokio::test]
    async fn first_message_flag_follows_outcome_history() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ctx = ctx();
        cache.record_message(10, 42, ctx.timestamp.timestamp()).await;
        let s = collect(&cache, &ctx).await;
        assert_eq!(s.is_first_message, Some(true));

        cache.record_verdict(10, 42, "allow").await;
        cache.record_message(10, 42, ctx.timestamp.timestamp()).await;
        let s = collect(&cache, &ctx).await;
        assert_eq!(s.is_first_message, Some(false));
    }

    #[tokio::test]
    async fn ttfm_needs_a_recorded_join() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ctx = ctx();
        cache.record_message(10, 42, ctx.timestamp.timestamp()).await;
        let s = collect(&cache, &ctx).await;
        assert_eq!(s.time_to_first_message_secs, None);
    }

    #[tokio::test]
    async fn ttfm_is_the_join_to_first_message_interval() {
        let cache = cache(Arc::new(MemoryStore::new()));
        let ctx = ctx();
        let now = ctx.timestamp.timestamp();
        cache.record_join_time(10, 42, now - 100).await;
        cache.record_message(10, 42, now - 80).await;
        // Later messages keep reporting the original interval.
        cache.record_message(10, 42, now).await;
        let s = collect(&cache, &ctx).await;
        assert_eq!(s.time_to_first_message_secs, Some(20));
        assert_eq!(s.join_to_message_secs, Some(100));
    }

    #[tokio::test]
    async fn outage_leaves_fields_unknown() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        let cache = cache(flaky.clone());
        flaky.set_down(true);

        let s = collect(&cache, &ctx()).await;
        assert_eq!(s.messages_last_minute, None);
        assert_eq!(s.approved_messages, None);
        assert_eq!(s.is_first_message, None);
        assert!(!s.raid_mode_active);
    }
}
