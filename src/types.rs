//! Domain types shared across the pipeline.
//!
//! These are pure data types with no dependency on the cache, the
//! platform adapter, or any other collaborator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type GroupId = i64;
pub type MessageId = i64;

/// Group classification. Thresholds and some content weights are
/// calibrated per kind: public groups get the baseline, private groups
/// a looser one, restricted (channel-style) groups the tightest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKind {
    Public,
    Private,
    Restricted,
}

impl Default for GroupKind {
    fn default() -> Self {
        GroupKind::Public
    }
}

/// Immutable snapshot of one inbound message event.
///
/// Built once by the platform adapter, read-only afterwards, dropped
/// when the pipeline run completes.
#[derive(Debug, Clone)]
pub struct MessageContext {
    pub message_id: MessageId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub group_kind: GroupKind,
    /// Normalized message text; empty for media-only messages.
    pub text: String,
    pub has_attachment: bool,
    pub has_links: bool,
    pub is_forward: bool,
    pub forward_from_channel: bool,
    pub is_reply: bool,
    pub timestamp: DateTime<Utc>,
    pub sender: SenderProfile,
}

/// Sender profile data carried with the event. Fields the platform
/// did not provide stay `None` so collectors can tell "absent" from
/// "unknown".
#[derive(Debug, Clone, Default)]
pub struct SenderProfile {
    pub account_age_days: Option<u32>,
    pub username: Option<String>,
    pub display_name: Option<String>,
    pub has_avatar: bool,
    pub has_bio: bool,
    pub bio: Option<String>,
    pub is_premium: bool,
    pub is_bot: bool,
}

/// A member-join event, used for raid tracking and join-to-message
/// timing.
#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub timestamp: DateTime<Utc>,
}

/// A collector's output: either the computed signal set or an explicit
/// unavailable marker. Unavailable sets contribute nothing to the
/// score, which is how infrastructure failure stays neutral.
#[derive(Debug, Clone, PartialEq)]
pub enum Collected<T> {
    Available(T),
    Unavailable,
}

impl<T> Collected<T> {
    pub fn is_available(&self) -> bool {
        matches!(self, Collected::Available(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Collected::Available(v) => Some(v),
            Collected::Unavailable => None,
        }
    }
}

impl<T: Default> Default for Collected<T> {
    fn default() -> Self {
        Collected::Unavailable
    }
}

/// Signals from the sender's activity history in this group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorSignals {
    pub messages_last_minute: Option<u64>,
    pub messages_last_hour: Option<u64>,
    pub messages_last_day: Option<u64>,
    /// Seconds between joining the group and this message.
    pub join_to_message_secs: Option<i64>,
    /// Seconds between first sighting and first message.
    pub time_to_first_message_secs: Option<i64>,
    pub is_first_message: Option<bool>,
    pub approved_messages: Option<u64>,
    pub flagged_messages: Option<u64>,
    pub blocked_messages: Option<u64>,
    /// Subscriber of the group's linked channel. `None` = not cached.
    pub channel_subscriber: Option<bool>,
    pub raid_mode_active: bool,
    pub is_reply: bool,
}

/// Signals computed from the message text itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentSignals {
    pub text_length: usize,
    pub word_count: usize,
    pub caps_ratio: f32,
    pub emoji_count: usize,
    pub url_count: usize,
    pub unique_domains: usize,
    pub has_shortened_urls: bool,
    pub has_suspicious_tld: bool,
    pub has_whitelisted_urls: bool,
    pub has_scam_phrases: bool,
    pub has_money_patterns: bool,
    pub has_urgency_patterns: bool,
    pub has_phone_numbers: bool,
    pub has_wallet_addresses: bool,
    pub has_attachment: bool,
    pub is_forward: bool,
    pub forward_from_channel: bool,
}

/// Cross-group correlation signals. `None` fields mean the lookup was
/// unavailable; the scorer treats them as neutral, never negative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkSignals {
    /// Other groups where the same normalized text appeared recently.
    pub duplicate_groups: Option<u64>,
    pub banned_in_groups: Option<u64>,
    pub flagged_in_groups: Option<u64>,
    pub blocklisted: Option<bool>,
    pub whitelisted: Option<bool>,
    /// Similarity against known spam, in [0, 1].
    pub spam_similarity: Option<f32>,
}

/// Account-surface signals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSignals {
    pub account_age_days: Option<u32>,
    pub has_username: bool,
    pub has_avatar: bool,
    pub has_bio: bool,
    pub is_premium: bool,
    pub is_bot: bool,
    pub username_random_chars: bool,
    pub name_emoji_spam: bool,
    pub bio_has_links: bool,
}

/// All signal sets for one event, each built once and immutable.
#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub behavior: Collected<BehaviorSignals>,
    pub content: Collected<ContentSignals>,
    pub network: Collected<NetworkSignals>,
    pub profile: Collected<ProfileSignals>,
}

/// Final admission decision, ordered least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    FlagForReview,
    Restrict,
    Ban,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::FlagForReview => "flag_for_review",
            Verdict::Restrict => "restrict",
            Verdict::Ban => "ban",
        }
    }
}

/// Named high-confidence threat patterns. The override-class variants
/// force a terminal verdict regardless of the weighted score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    BlocklistHit,
    DuplicateSpamBurst,
    RaidJoin,
    Flood,
    Spam,
    Scam,
    Promotion,
    Unknown,
}

impl ThreatType {
    /// Terminal verdict for override-class threats. The order in which
    /// overrides are checked is fixed (severity-ordered, first match
    /// wins): BlocklistHit, DuplicateSpamBurst, RaidJoin.
    pub fn override_verdict(&self) -> Option<Verdict> {
        match self {
            ThreatType::BlocklistHit => Some(Verdict::Ban),
            ThreatType::DuplicateSpamBurst => Some(Verdict::Ban),
            ThreatType::RaidJoin => Some(Verdict::Restrict),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::BlocklistHit => "blocklist_hit",
            ThreatType::DuplicateSpamBurst => "duplicate_spam_burst",
            ThreatType::RaidJoin => "raid_join",
            ThreatType::Flood => "flood",
            ThreatType::Spam => "spam",
            ThreatType::Scam => "scam",
            ThreatType::Promotion => "promotion",
            ThreatType::Unknown => "unknown",
        }
    }
}

/// Output of scoring. Immutable once produced; logged, not mutated.
#[derive(Debug, Clone)]
pub struct RiskResult {
    /// Weighted score clamped to 0..=100. Reported even when an
    /// override decided the verdict, for audit.
    pub score: i32,
    pub verdict: Verdict,
    /// Contributing threats, most severe first. The first entry is the
    /// override that decided the verdict, when one fired.
    pub threats: Vec<ThreatType>,
    pub behavior_score: i32,
    pub content_score: i32,
    pub network_score: i32,
    pub profile_score: i32,
    /// Signal name -> contribution, for the explanation surface.
    pub breakdown: Vec<(String, i32)>,
    pub contributing_factors: Vec<String>,
    pub mitigating_factors: Vec<String>,
    /// Score landed in the configured gray zone; callers may route the
    /// event to an external review surface.
    pub needs_review: bool,
}

impl RiskResult {
    /// A fail-open result used when the pipeline cannot score at all.
    pub fn fail_open(reason: &str) -> Self {
        RiskResult {
            score: 0,
            verdict: Verdict::Allow,
            threats: Vec::new(),
            behavior_score: 0,
            content_score: 0,
            network_score: 0,
            profile_score: 0,
            breakdown: Vec::new(),
            contributing_factors: vec![reason.to_string()],
            mitigating_factors: Vec::new(),
            needs_review: false,
        }
    }
}

/// Cacheable projection of a RiskResult, stored in the decision cache
/// keyed by content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    pub score: i32,
    pub verdict: Verdict,
    pub threats: Vec<ThreatType>,
}

impl From<&RiskResult> for CachedDecision {
    fn from(r: &RiskResult) -> Self {
        CachedDecision {
            score: r.score,
            verdict: r.verdict,
            threats: r.threats.clone(),
        }
    }
}

impl CachedDecision {
    pub fn into_result(self) -> RiskResult {
        RiskResult {
            score: self.score,
            verdict: self.verdict,
            threats: self.threats,
            behavior_score: 0,
            content_score: 0,
            network_score: 0,
            profile_score: 0,
            breakdown: Vec::new(),
            contributing_factors: vec!["Cached decision for identical content".to_string()],
            mitigating_factors: Vec::new(),
            needs_review: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_ordering_is_monotonic() {
        assert!(Verdict::Allow < Verdict::FlagForReview);
        assert!(Verdict::FlagForReview < Verdict::Restrict);
        assert!(Verdict::Restrict < Verdict::Ban);
    }

    #[test]
    fn override_verdicts() {
        assert_eq!(ThreatType::BlocklistHit.override_verdict(), Some(Verdict::Ban));
        assert_eq!(ThreatType::RaidJoin.override_verdict(), Some(Verdict::Restrict));
        assert_eq!(ThreatType::Flood.override_verdict(), None);
    }

    #[test]
    fn unavailable_collected_has_no_value() {
        let c: Collected<ContentSignals> = Collected::Unavailable;
        assert!(!c.is_available());
        assert!(c.value().is_none());
    }
}
