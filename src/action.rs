//! Verdict enforcement against the messaging platform.
//!
//! The engine maps verdicts to platform calls behind the
//! `PlatformAdapter` trait, retries transient failures with
//! exponential backoff, and uses cache markers to keep actions
//! idempotent and admin notifications throttled. Enforcement failures
//! are logged and surfaced, never escalated into harsher action.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheService;
use crate::network::NetworkAnalyzer;
use crate::types::{GroupId, MessageId, RiskResult, UserId, Verdict};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform call timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("platform rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl PlatformError {
    /// Transient failures are worth retrying; permission and request
    /// errors will fail the same way every time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Timeout | PlatformError::Network(_) | PlatformError::RateLimited { .. }
        )
    }
}

/// Surface the engine drives. One implementation per platform; tests
/// substitute a recording mock.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    async fn delete_message(&self, group: GroupId, message: MessageId)
        -> Result<(), PlatformError>;

    /// Mute the user for `duration`; the platform enforces expiry.
    async fn restrict_user(
        &self,
        group: GroupId,
        user: UserId,
        duration: Duration,
    ) -> Result<(), PlatformError>;

    async fn ban_user(&self, group: GroupId, user: UserId) -> Result<(), PlatformError>;

    async fn unrestrict_user(&self, group: GroupId, user: UserId) -> Result<(), PlatformError>;

    /// Post a moderation notice to the group's admin channel.
    async fn notify_admins(&self, group: GroupId, text: &str) -> Result<(), PlatformError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    /// Escalating mute durations for repeat restrictions; the last
    /// entry repeats once exhausted.
    pub restriction_ladder_secs: Vec<u64>,
    /// Delete the offending message on restrict and ban verdicts.
    pub delete_on_restrict: bool,
    /// Minimum gap between admin notifications for the same user.
    pub notify_throttle_secs: u64,
    /// How long an executed action stays remembered for idempotency.
    pub action_marker_ttl_secs: u64,
}

impl Default for ActionConfig {
    fn default() -> Self {
        ActionConfig {
            max_retries: 3,
            retry_base_delay_ms: 1000,
            restriction_ladder_secs: vec![3600, 86400, 86400 * 7],
            delete_on_restrict: true,
            notify_throttle_secs: 3600,
            action_marker_ttl_secs: 86400,
        }
    }
}

/// What actually happened for one verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Allow verdicts and successfully applied actions.
    Applied,
    /// Another worker already actioned this message.
    AlreadyApplied,
    /// All attempts exhausted or a permanent platform error.
    Failed(String),
}

pub struct ActionEngine {
    adapter: Arc<dyn PlatformAdapter>,
    cache: Arc<CacheService>,
    network: Arc<NetworkAnalyzer>,
    config: ActionConfig,
}

impl ActionEngine {
    pub fn new(
        adapter: Arc<dyn PlatformAdapter>,
        cache: Arc<CacheService>,
        network: Arc<NetworkAnalyzer>,
        config: ActionConfig,
    ) -> Self {
        ActionEngine { adapter, cache, network, config }
    }

    /// Apply the verdict for one scored message.
    pub async fn execute(
        &self,
        group: GroupId,
        user: UserId,
        message: MessageId,
        result: &RiskResult,
    ) -> ExecutionResult {
        if result.verdict == Verdict::Allow {
            return ExecutionResult::Applied;
        }

        // First writer wins; a second worker scoring the same message
        // must not double-apply the action. Marker unavailable means
        // we act anyway: a duplicate restriction beats a missed one.
        let marker = format!("fg:action:{group}:{message}");
        let ttl = Duration::from_secs(self.config.action_marker_ttl_secs);
        if self.cache.set_nx(&marker, ttl).await == Some(false) {
            debug!("action for message {message} in group {group} already applied");
            return ExecutionResult::AlreadyApplied;
        }

        let outcome = match result.verdict {
            Verdict::Allow => unreachable!("allow handled above"),
            Verdict::FlagForReview => self.flag(group, user, result).await,
            Verdict::Restrict => self.restrict(group, user, message, result).await,
            Verdict::Ban => self.ban(group, user, message, result).await,
        };

        if let ExecutionResult::Failed(reason) = &outcome {
            warn!(
                "enforcement failed for message {message} (user {user}, group {group}): {reason}"
            );
        }
        outcome
    }

    /// Flagging takes no action against the user; it only informs the
    /// admins, throttled per user.
    async fn flag(&self, group: GroupId, user: UserId, result: &RiskResult) -> ExecutionResult {
        self.notify(group, user, result).await;
        ExecutionResult::Applied
    }

    async fn restrict(
        &self,
        group: GroupId,
        user: UserId,
        message: MessageId,
        result: &RiskResult,
    ) -> ExecutionResult {
        let duration = self.restriction_duration(group, user).await;
        if self.config.delete_on_restrict {
            if let Err(e) = self
                .with_retry(|| self.adapter.delete_message(group, message))
                .await
            {
                warn!("failed to delete message {message} in group {group}: {e}");
            }
        }
        match self
            .with_retry(|| self.adapter.restrict_user(group, user, duration))
            .await
        {
            Ok(()) => {
                info!(
                    "restricted user {user} in group {group} for {}s (score {})",
                    duration.as_secs(),
                    result.score
                );
                self.network.record_flag(user, group).await;
                self.notify(group, user, result).await;
                ExecutionResult::Applied
            }
            Err(e) => ExecutionResult::Failed(e.to_string()),
        }
    }

    async fn ban(
        &self,
        group: GroupId,
        user: UserId,
        message: MessageId,
        result: &RiskResult,
    ) -> ExecutionResult {
        if let Err(e) = self
            .with_retry(|| self.adapter.delete_message(group, message))
            .await
        {
            warn!("failed to delete message {message} in group {group}: {e}");
        }
        match self.with_retry(|| self.adapter.ban_user(group, user)).await {
            Ok(()) => {
                info!("banned user {user} in group {group} (score {})", result.score);
                self.network.record_ban(user, group).await;
                self.notify(group, user, result).await;
                ExecutionResult::Applied
            }
            Err(e) => ExecutionResult::Failed(e.to_string()),
        }
    }

    /// Lift a restriction, for admin reversal of a false positive.
    pub async fn unrestrict(&self, group: GroupId, user: UserId) -> ExecutionResult {
        match self
            .with_retry(|| self.adapter.unrestrict_user(group, user))
            .await
        {
            Ok(()) => ExecutionResult::Applied,
            Err(e) => ExecutionResult::Failed(e.to_string()),
        }
    }

    /// Escalate mute duration with each prior restriction in this
    /// group, walking the configured ladder.
    async fn restriction_duration(&self, group: GroupId, user: UserId) -> Duration {
        let prior = self
            .cache
            .user_stats(group, user)
            .await
            .map(|s| s.flagged + s.blocked)
            .unwrap_or(0) as usize;
        let ladder = &self.config.restriction_ladder_secs;
        let secs = ladder
            .get(prior.min(ladder.len().saturating_sub(1)))
            .copied()
            .unwrap_or(3600);
        Duration::from_secs(secs)
    }

    /// Admin notification, throttled per (group, user). Throttle state
    /// unavailable suppresses the notification; a missed notice is
    /// cheaper than a spammed admin channel during an outage.
    async fn notify(&self, group: GroupId, user: UserId, result: &RiskResult) {
        let key = format!("fg:notify:{group}:{user}");
        let ttl = Duration::from_secs(self.config.notify_throttle_secs);
        if self.cache.set_nx(&key, ttl).await != Some(true) {
            debug!("notification for user {user} in group {group} throttled");
            return;
        }

        let threats: Vec<&str> = result.threats.iter().map(|t| t.as_str()).collect();
        let text = format!(
            "User {user}: verdict {}, score {}, threats [{}]",
            result.verdict.as_str(),
            result.score,
            threats.join(", ")
        );
        if let Err(e) = self
            .with_retry(|| self.adapter.notify_admins(group, &text))
            .await
        {
            warn!("failed to notify admins of group {group}: {e}");
        }
    }

    /// Retry transient platform errors with exponential backoff,
    /// honoring an explicit retry-after when the platform supplies
    /// one. Permanent errors return immediately.
    async fn with_retry<T, F, Fut>(&self, mut op: F) -> Result<T, PlatformError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PlatformError>>,
    {
        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let backoff =
                        Duration::from_millis(self.config.retry_base_delay_ms * (1 << attempt));
                    let delay = match &e {
                        PlatformError::RateLimited { retry_after: Some(after) } => *after,
                        _ => backoff,
                    };
                    debug!(
                        "platform call failed (attempt {}): {e}, retrying in {}ms",
                        attempt + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or(PlatformError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::cache::CacheTtls;
    use crate::store::MemoryStore;
    use crate::types::{ThreatType, Verdict};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct RecordingAdapter {
        calls: Mutex<Vec<String>>,
        restrict_failures: AtomicU32,
        restrict_attempts: AtomicU32,
        forbid_restricts: AtomicBool,
    }

    impl RecordingAdapter {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn fail_restricts(&self, n: u32) {
            self.restrict_failures.store(n, Ordering::SeqCst);
        }

        fn forbid_restricts(&self) {
            self.forbid_restricts.store(true, Ordering::SeqCst);
        }

        fn restrict_attempts(&self) -> u32 {
            self.restrict_attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlatformAdapter for RecordingAdapter {
        async fn delete_message(
            &self,
            group: GroupId,
            message: MessageId,
        ) -> Result<(), PlatformError> {
            self.record(format!("delete {group} {message}"));
            Ok(())
        }

        async fn restrict_user(
            &self,
            group: GroupId,
            user: UserId,
            duration: Duration,
        ) -> Result<(), PlatformError> {
            self.restrict_attempts.fetch_add(1, Ordering::SeqCst);
            if self.forbid_restricts.load(Ordering::SeqCst) {
                return Err(PlatformError::Forbidden("bot lacks admin rights".to_string()));
            }
            if self.restrict_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_sub(1)
            }).is_ok()
            {
                return Err(PlatformError::Timeout);
            }
            self.record(format!("restrict {group} {user} {}", duration.as_secs()));
            Ok(())
        }

        async fn ban_user(&self, group: GroupId, user: UserId) -> Result<(), PlatformError> {
            self.record(format!("ban {group} {user}"));
            Ok(())
        }

        async fn unrestrict_user(&self, group: GroupId, user: UserId) -> Result<(), PlatformError> {
            self.record(format!("unrestrict {group} {user}"));
            Ok(())
        }

        async fn notify_admins(&self, group: GroupId, text: &str) -> Result<(), PlatformError> {
            self.record(format!("notify {group}: {text}"));
            Ok(())
        }
    }

    fn engine(adapter: Arc<RecordingAdapter>, config: ActionConfig) -> ActionEngine {
        let cache = Arc::new(CacheService::new(
            Arc::new(MemoryStore::new()),
            BreakerConfig::default(),
            CacheTtls::default(),
        ));
        let network = Arc::new(NetworkAnalyzer::new(
            Arc::clone(&cache),
            Arc::new(crate::network::NoopSimilarityProvider),
            Duration::from_millis(100),
        ));
        ActionEngine::new(adapter, cache, network, config)
    }

    fn result_with(verdict: Verdict, score: i32) -> RiskResult {
        RiskResult {
            score,
            verdict,
            threats: vec![ThreatType::Spam],
            ..RiskResult::fail_open("test")
        }
    }

    #[tokio::test]
    async fn allow_takes_no_action() {
        let adapter = Arc::new(RecordingAdapter::default());
        let engine = engine(Arc::clone(&adapter), ActionConfig::default());
        let outcome = engine.execute(1, 2, 3, &result_with(Verdict::Allow, 5)).await;
        assert_eq!(outcome, ExecutionResult::Applied);
        assert!(adapter.calls().is_empty());
    }

    #[tokio::test]
    async fn ban_deletes_then_bans_then_notifies() {
        let adapter = Arc::new(RecordingAdapter::default());
        let engine = engine(Arc::clone(&adapter), ActionConfig::default());
        let outcome = engine.execute(1, 2, 3, &result_with(Verdict::Ban, 95)).await;
        assert_eq!(outcome, ExecutionResult::Applied);
        let calls = adapter.calls();
        assert_eq!(calls[0], "delete 1 3");
        assert_eq!(calls[1], "ban 1 2");
        assert!(calls[2].starts_with("notify 1:"));
    }

    #[tokio::test]
    async fn second_execution_for_same_message_is_noop() {
        let adapter = Arc::new(RecordingAdapter::default());
        let engine = engine(Arc::clone(&adapter), ActionConfig::default());
        let result = result_with(Verdict::Ban, 95);
        assert_eq!(engine.execute(1, 2, 3, &result).await, ExecutionResult::Applied);
        let before = adapter.calls().len();
        assert_eq!(engine.execute(1, 2, 3, &result).await, ExecutionResult::AlreadyApplied);
        assert_eq!(adapter.calls().len(), before);
    }

    #[tokio::test]
    async fn transient_restrict_failure_is_retried() {
        let adapter = Arc::new(RecordingAdapter::default());
        adapter.fail_restricts(2);
        let config = ActionConfig {
            retry_base_delay_ms: 1,
            ..ActionConfig::default()
        };
        let engine = engine(Arc::clone(&adapter), config);
        let outcome = engine.execute(1, 2, 3, &result_with(Verdict::Restrict, 70)).await;
        assert_eq!(outcome, ExecutionResult::Applied);
        assert!(adapter.calls().iter().any(|c| c.starts_with("restrict")));
    }

    #[tokio::test]
    async fn retries_exhausted_reports_failure() {
        let adapter = Arc::new(RecordingAdapter::default());
        adapter.fail_restricts(10);
        let config = ActionConfig {
            max_retries: 2,
            retry_base_delay_ms: 1,
            ..ActionConfig::default()
        };
        let engine = engine(Arc::clone(&adapter), config);
        let outcome = engine.execute(1, 2, 3, &result_with(Verdict::Restrict, 70)).await;
        assert!(matches!(outcome, ExecutionResult::Failed(_)));
        assert_eq!(adapter.restrict_attempts(), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let adapter = Arc::new(RecordingAdapter::default());
        adapter.forbid_restricts();
        let config = ActionConfig {
            retry_base_delay_ms: 1,
            ..ActionConfig::default()
        };
        let engine = engine(Arc::clone(&adapter), config);
        let outcome = engine.execute(1, 2, 3, &result_with(Verdict::Restrict, 70)).await;
        assert!(matches!(outcome, ExecutionResult::Failed(_)));
        assert_eq!(adapter.restrict_attempts(), 1);
    }

    #[tokio::test]
    async fn notifications_are_throttled_per_user() {
        let adapter = Arc::new(RecordingAdapter::default());
        let engine = engine(Arc::clone(&adapter), ActionConfig::default());
        engine.execute(1, 2, 3, &result_with(Verdict::FlagForReview, 40)).await;
        engine.execute(1, 2, 4, &result_with(Verdict::FlagForReview, 45)).await;
        let notifies = adapter
            .calls()
            .iter()
            .filter(|c| c.starts_with("notify"))
            .count();
        assert_eq!(notifies, 1);
    }

    #[tokio::test]
    async fn restriction_duration_escalates() {
        let adapter = Arc::new(RecordingAdapter::default());
        let cache = Arc::new(CacheService::new(
            Arc::new(MemoryStore::new()),
            BreakerConfig::default(),
            CacheTtls::default(),
        ));
        // Two prior flagged verdicts move the user up the ladder.
        cache.record_verdict(1, 2, "restrict").await;
        cache.record_verdict(1, 2, "restrict").await;
        let network = Arc::new(NetworkAnalyzer::new(
            Arc::clone(&cache),
            Arc::new(crate::network::NoopSimilarityProvider),
            Duration::from_millis(100),
        ));
        let engine = ActionEngine::new(
            Arc::clone(&adapter) as Arc<dyn PlatformAdapter>,
            cache,
            network,
            ActionConfig::default(),
        );
        engine.execute(1, 2, 3, &result_with(Verdict::Restrict, 70)).await;
        let calls = adapter.calls();
        let restrict = calls.iter().find(|c| c.starts_with("restrict")).unwrap();
        assert_eq!(restrict, &format!("restrict 1 2 {}", 86400 * 7));
    }
}
