//! Cross-group correlation analysis.
//!
//! Tracks a content-hash index (same normalized text seen in several
//! groups is the classic cross-posting signature), ban/flag history
//! per user, and the global block/whitelist. Also owns the seam to the
//! vector-similarity provider. Every lookup is best-effort: a failed
//! query yields "unknown", treated as neutral by the scorer, never as
//! a risk signal.
//!
//! Key schema (on top of the cache's namespace):
//!     fg:net:msg:{hash}        set of group ids where the hash was seen
//!     fg:net:bans:{user}       set of group ids the user was banned in
//!     fg:net:flags:{user}      set of group ids the user was flagged in
//!     fg:net:blocklist         global blocklist (user ids)
//!     fg:net:whitelist         global whitelist (user ids)

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheService;
use crate::types::{MessageContext, NetworkSignals};

const TTL_MESSAGE_HASH: Duration = Duration::from_secs(86400);
const TTL_BAN_HISTORY: Duration = Duration::from_secs(86400 * 30);
const TTL_FLAG_HISTORY: Duration = Duration::from_secs(86400 * 14);
// Global lists are operator-managed; the long TTL stands in for "no
// expiry" on stores that require one.
const TTL_GLOBAL_LIST: Duration = Duration::from_secs(86400 * 365);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("similarity provider timed out")]
    Timeout,
    #[error("similarity provider rate limited")]
    RateLimited,
    #[error("similarity provider failed: {0}")]
    Other(String),
}

/// Embedding/vector-similarity collaborator: given text, a similarity
/// score in [0, 1] against known spam.
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    async fn similarity(&self, text: &str) -> Result<f32, ProviderError>;
}

/// Provider used when no embedding backend is configured; reports
/// every text as unavailable-equivalent (similarity 0).
pub struct NoopSimilarityProvider;

#[async_trait]
impl SimilarityProvider for NoopSimilarityProvider {
    async fn similarity(&self, _text: &str) -> Result<f32, ProviderError> {
        Ok(0.0)
    }
}

pub struct NetworkAnalyzer {
    cache: Arc<CacheService>,
    provider: Arc<dyn SimilarityProvider>,
    provider_timeout: Duration,
}

impl NetworkAnalyzer {
    pub fn new(
        cache: Arc<CacheService>,
        provider: Arc<dyn SimilarityProvider>,
        provider_timeout: Duration,
    ) -> Self {
        NetworkAnalyzer {
            cache,
            provider,
            provider_timeout,
        }
    }

    /// SHA-256 of the normalized text, truncated to 16 hex chars.
    /// Normalization: lowercase, whitespace collapsed.
    pub fn hash_message(text: &str) -> String {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        if normalized.is_empty() {
            return String::new();
        }
        let digest = Sha256::digest(normalized.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Record this sighting of the hash and return how many OTHER
    /// groups have seen it recently. `None` when the store is down.
    pub async fn record_duplicate(&self, hash: &str, group: i64) -> Option<u64> {
        if hash.is_empty() {
            return Some(0);
        }
        let key = format!("fg:net:msg:{hash}");
        let total = self
            .cache
            .set_add(&key, &group.to_string(), TTL_MESSAGE_HASH)
            .await?;
        let others = total.saturating_sub(1);
        if others > 0 {
            log::info!("content hash {hash} seen in {others} other group(s)");
        }
        Some(others)
    }

    pub async fn record_ban(&self, user: i64, group: i64) {
        let key = format!("fg:net:bans:{user}");
        self.cache.set_add(&key, &group.to_string(), TTL_BAN_HISTORY).await;
    }

    pub async fn record_flag(&self, user: i64, group: i64) {
        let key = format!("fg:net:flags:{user}");
        self.cache.set_add(&key, &group.to_string(), TTL_FLAG_HISTORY).await;
    }

    pub async fn ban_count(&self, user: i64) -> Option<u64> {
        self.cache.set_card(&format!("fg:net:bans:{user}")).await
    }

    pub async fn flag_count(&self, user: i64) -> Option<u64> {
        self.cache.set_card(&format!("fg:net:flags:{user}")).await
    }

    // ── Global lists ────────────────────────────────────────────────

    pub async fn add_to_blocklist(&self, user: i64) {
        self.cache
            .set_add("fg:net:blocklist", &user.to_string(), TTL_GLOBAL_LIST)
            .await;
    }

    pub async fn add_to_whitelist(&self, user: i64) {
        self.cache
            .set_add("fg:net:whitelist", &user.to_string(), TTL_GLOBAL_LIST)
            .await;
    }

    /// `None` = lookup unavailable (unknown), not "no".
    pub async fn is_blocklisted(&self, user: i64) -> Option<bool> {
        self.cache
            .set_contains("fg:net:blocklist", &user.to_string())
            .await
    }

    pub async fn is_whitelisted(&self, user: i64) -> Option<bool> {
        self.cache
            .set_contains("fg:net:whitelist", &user.to_string())
            .await
    }

    // ── Full analysis ───────────────────────────────────────────────

    /// Build the network signal set for one message. `include_history`
    /// false is the cheap degraded path: duplicate index and global
    /// lists only, skipping ban/flag history and the provider.
    pub async fn analyze(&self, ctx: &MessageContext, include_history: bool) -> NetworkSignals {
        let hash = Self::hash_message(&ctx.text);
        let duplicate_groups = self.record_duplicate(&hash, ctx.group_id).await;
        let blocklisted = self.is_blocklisted(ctx.user_id).await;
        let whitelisted = self.is_whitelisted(ctx.user_id).await;

        let (banned_in_groups, flagged_in_groups, spam_similarity) = if include_history {
            let bans = self.ban_count(ctx.user_id).await;
            let flags = self.flag_count(ctx.user_id).await;
            let similarity = self.similarity_of(&ctx.text).await;
            (bans, flags, similarity)
        } else {
            (None, None, None)
        };

        NetworkSignals {
            duplicate_groups,
            banned_in_groups,
            flagged_in_groups,
            blocklisted,
            whitelisted,
            spam_similarity,
        }
    }

    /// Query the similarity provider under its own deadline. Timeouts,
    /// rate limits and errors all read as "unavailable".
    async fn similarity_of(&self, text: &str) -> Option<f32> {
        if text.is_empty() {
            return None;
        }
        match tokio::time::timeout(self.provider_timeout, self.provider.similarity(text)).await {
            Ok(Ok(score)) => Some(score.clamp(0.0, 1.0)),
            Ok(Err(e)) => {
                log::warn!("similarity provider failed, signal unavailable: {e}");
                None
            }
            Err(_) => {
                log::warn!(
                    "similarity provider exceeded {}ms, signal unavailable",
                    self.provider_timeout.as_millis()
                );
                None
            }
        }
    }
}
