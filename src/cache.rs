//! TTL cache over the key-value store, guarded by a circuit breaker.
//!
//! Contract: fails open. On circuit-open or store error every read is
//! a miss and every write is a no-op, logged at low severity. Callers
//! must treat the cache as best-effort and pick a safe default on
//! miss; no key's absence is itself a risk signal.
//!
//! Key schema:
//!     fg:msg_ts:{group}:{user}        message timestamps (window)
//!     fg:stats:{group}:{user}         user stats json
//!     fg:first_msg:{group}:{user}     first message time, unix secs
//!     fg:join:{group}:{user}          join time, unix secs
//!     fg:rate:{scope}:{id}:{window}   rate-limit windows
//!     fg:decision:{hash}              cached decision json
//!     fg:sub:{group}:{user}           channel subscription "1"/"0"
//!     fg:raid:joins:{group}           join window for raid detection
//!     fg:raid:active:{group}          raid mode flag
//!     fg:notify:{group}:{user}        admin-notification throttle
//!     fg:action:{group}:{message}     action idempotency marker

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
use crate::store::{KeyValueStore, StoreError};

/// TTLs per key class.
#[derive(Debug, Clone)]
pub struct CacheTtls {
    pub message_timestamps: Duration,
    pub user_stats: Duration,
    pub first_message: Duration,
    pub join_time: Duration,
    pub decision: Duration,
    pub subscription: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        CacheTtls {
            message_timestamps: Duration::from_secs(86400),
            user_stats: Duration::from_secs(86400 * 30),
            first_message: Duration::from_secs(86400 * 7),
            join_time: Duration::from_secs(86400 * 7),
            decision: Duration::from_secs(300),
            subscription: Duration::from_secs(3600),
        }
    }
}

/// Per-user moderation counters, consumed by the behavior collector
/// and the rate limiter's trust multiplier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    pub total_messages: u64,
    pub approved: u64,
    pub flagged: u64,
    pub blocked: u64,
}

pub struct CacheService {
    store: Arc<dyn KeyValueStore>,
    breaker: CircuitBreaker,
    ttls: CacheTtls,
}

impl CacheService {
    pub fn new(store: Arc<dyn KeyValueStore>, breaker_config: BreakerConfig, ttls: CacheTtls) -> Self {
        CacheService {
            store,
            breaker: CircuitBreaker::new("cache", breaker_config),
            ttls,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn ttls(&self) -> &CacheTtls {
        &self.ttls
    }

    // ── Generic operations ──────────────────────────────────────────

    /// Read a key; circuit-open and store errors both read as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let store = Arc::clone(&self.store);
        match self.breaker.call(|| async move { store.get(key).await }).await {
            Ok(value) => value,
            Err(e) => {
                self.log_miss("get", key, &e);
                None
            }
        }
    }

    /// Write a key; silently dropped on failure.
    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let store = Arc::clone(&self.store);
        if let Err(e) = self
            .breaker
            .call(|| async move { store.set(key, value, ttl).await })
            .await
        {
            self.log_miss("set", key, &e);
        }
    }

    pub async fn delete(&self, key: &str) {
        let store = Arc::clone(&self.store);
        if let Err(e) = self
            .breaker
            .call(|| async move { store.delete(key).await })
            .await
        {
            self.log_miss("delete", key, &e);
        }
    }

    /// Atomic set-if-absent. `None` means the store was unavailable;
    /// callers decide which way to fail open.
    pub async fn set_nx(&self, key: &str, ttl: Duration) -> Option<bool> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.set_nx(key, "1", ttl).await })
            .await
        {
            Ok(acquired) => Some(acquired),
            Err(e) => {
                self.log_miss("set_nx", key, &e);
                None
            }
        }
    }

    /// Record an event in a sliding window; `None` when unavailable.
    pub async fn window_add(&self, key: &str, window: Duration) -> Option<u64> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.window_add(key, window).await })
            .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                self.log_miss("window_add", key, &e);
                None
            }
        }
    }

    pub async fn window_count(&self, key: &str, window: Duration) -> Option<u64> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.window_count(key, window).await })
            .await
        {
            Ok(count) => Some(count),
            Err(e) => {
                self.log_miss("window_count", key, &e);
                None
            }
        }
    }

    pub async fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Option<u64> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.set_add(key, member, ttl).await })
            .await
        {
            Ok(card) => Some(card),
            Err(e) => {
                self.log_miss("set_add", key, &e);
                None
            }
        }
    }

    pub async fn set_card(&self, key: &str) -> Option<u64> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.set_card(key).await })
            .await
        {
            Ok(card) => Some(card),
            Err(e) => {
                self.log_miss("set_card", key, &e);
                None
            }
        }
    }

    pub async fn set_contains(&self, key: &str, member: &str) -> Option<bool> {
        let store = Arc::clone(&self.store);
        match self
            .breaker
            .call(|| async move { store.set_contains(key, member).await })
            .await
        {
            Ok(found) => Some(found),
            Err(e) => {
                self.log_miss("set_contains", key, &e);
                None
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("invalid json in cache key {key}: {e}");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => log::warn!("failed to serialize cache value for {key}: {e}"),
        }
    }

    // ── Message history ─────────────────────────────────────────────

    /// Record a message timestamp and, if this is the first message
    /// from the user in the group, its first-message time.
    pub async fn record_message(&self, group: i64, user: i64, unix_secs: i64) {
        let ts_key = format!("fg:msg_ts:{group}:{user}");
        self.window_add(&ts_key, self.ttls.message_timestamps).await;

        let first_key = format!("fg:first_msg:{group}:{user}");
        let store = Arc::clone(&self.store);
        let ttl = self.ttls.first_message;
        let value = unix_secs.to_string();
        if let Err(e) = self
            .breaker
            .call(|| async move { store.set_nx(&first_key, &value, ttl).await })
            .await
        {
            self.log_miss("set_nx", "fg:first_msg", &e);
        }
    }

    pub async fn message_count(&self, group: i64, user: i64, window: Duration) -> Option<u64> {
        let key = format!("fg:msg_ts:{group}:{user}");
        self.window_count(&key, window).await
    }

    pub async fn first_message_time(&self, group: i64, user: i64) -> Option<i64> {
        let key = format!("fg:first_msg:{group}:{user}");
        self.get(&key).await?.parse().ok()
    }

    pub async fn record_join_time(&self, group: i64, user: i64, unix_secs: i64) {
        let key = format!("fg:join:{group}:{user}");
        self.set(&key, &unix_secs.to_string(), self.ttls.join_time).await;
    }

    pub async fn join_time(&self, group: i64, user: i64) -> Option<i64> {
        let key = format!("fg:join:{group}:{user}");
        self.get(&key).await?.parse().ok()
    }

    // ── User stats ──────────────────────────────────────────────────

    pub async fn user_stats(&self, group: i64, user: i64) -> Option<UserStats> {
        let key = format!("fg:stats:{group}:{user}");
        self.get_json(&key).await
    }

    /// Fold a verdict into the per-user counters. Read-modify-write is
    /// acceptable here: stats are advisory trust input, not a counter
    /// the correctness of rate limiting depends on.
    pub async fn record_verdict(&self, group: i64, user: i64, verdict: &str) {
        let key = format!("fg:stats:{group}:{user}");
        let mut stats: UserStats = self.get_json(&key).await.unwrap_or_default();
        stats.total_messages += 1;
        match verdict {
            "allow" => stats.approved += 1,
            "flag_for_review" | "restrict" => stats.flagged += 1,
            "ban" => stats.blocked += 1,
            other => {
                log::debug!("not counting unknown verdict '{other}'");
                return;
            }
        }
        self.set_json(&key, &stats, self.ttls.user_stats).await;
    }

    // ── Subscription cache ──────────────────────────────────────────

    pub async fn subscription_status(&self, group: i64, user: i64) -> Option<bool> {
        let key = format!("fg:sub:{group}:{user}");
        self.get(&key).await.map(|v| v == "1")
    }

    pub async fn cache_subscription_status(&self, group: i64, user: i64, subscribed: bool) {
        let key = format!("fg:sub:{group}:{user}");
        self.set(&key, if subscribed { "1" } else { "0" }, self.ttls.subscription)
            .await;
    }

    fn log_miss(&self, op: &str, key: &str, err: &BreakerError<StoreError>) {
        match err {
            BreakerError::Open => {
                log::debug!("cache {op} on {key}: circuit open, treating as miss")
            }
            BreakerError::Inner(e) => {
                log::debug!("cache {op} on {key} failed, treating as miss: {e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FlakyStore, MemoryStore};

    fn cache_over(store: Arc<dyn KeyValueStore>) -> CacheService {
        CacheService::new(store, BreakerConfig::default(), CacheTtls::default())
    }

    #[tokio::test]
    async fn reads_and_writes_round_trip() {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        cache.set("fg:test", "42", Duration::from_secs(5)).await;
        assert_eq!(cache.get("fg:test").await, Some("42".to_string()));
    }

    #[tokio::test]
    async fn outage_reads_as_miss_and_never_errors() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        let cache = cache_over(flaky.clone());
        cache.set("fg:test", "42", Duration::from_secs(5)).await;
        flaky.set_down(true);

        assert_eq!(cache.get("fg:test").await, None);
        assert_eq!(cache.window_add("fg:w", Duration::from_secs(60)).await, None);
        assert_eq!(cache.set_nx("fg:lock", Duration::from_secs(5)).await, None);
        // Writes are dropped silently.
        cache.set("fg:other", "1", Duration::from_secs(5)).await;

        flaky.set_down(false);
        assert_eq!(cache.get("fg:other").await, None);
    }

    #[tokio::test]
    async fn repeated_outage_opens_circuit() {
        let flaky = Arc::new(FlakyStore::new(MemoryStore::new()));
        let cache = CacheService::new(
            flaky.clone(),
            BreakerConfig {
                failure_threshold: 3,
                ..BreakerConfig::default()
            },
            CacheTtls::default(),
        );
        flaky.set_down(true);
        for _ in 0..3 {
            cache.get("fg:k").await;
        }
        assert_eq!(cache.circuit_state(), CircuitState::Open);
        // Open circuit still reads as a miss, not an error.
        assert_eq!(cache.get("fg:k").await, None);
    }

    #[tokio::test]
    async fn record_verdict_updates_stats() {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        cache.record_verdict(1, 2, "allow").await;
        cache.record_verdict(1, 2, "allow").await;
        cache.record_verdict(1, 2, "ban").await;
        let stats = cache.user_stats(1, 2).await.unwrap();
        assert_eq!(stats.approved, 2);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.total_messages, 3);
    }

    #[tokio::test]
    async fn first_message_time_is_set_once() {
        let cache = cache_over(Arc::new(MemoryStore::new()));
        cache.record_message(1, 2, 1000).await;
        cache.record_message(1, 2, 2000).await;
        assert_eq!(cache.first_message_time(1, 2).await, Some(1000));
        assert_eq!(cache.message_count(1, 2, Duration::from_secs(60)).await, Some(2));
    }
}
