//! Weighted risk scoring and verdict selection.
//!
//! Combines the four signal sets into a cumulative score: positive
//! weights are risk, negative weights are trust, and no single signal
//! decides the outcome. The exceptions are the hard overrides: a
//! handful of high-confidence threat patterns that map straight to a
//! terminal verdict. Overrides are checked in a fixed severity order
//! (BlocklistHit, then DuplicateSpamBurst, then RaidJoin; first match
//! wins), and even then the weighted score is still computed and
//! reported so the audit trail survives the short-circuit.
//!
//! Unavailable signal sets and unknown fields contribute nothing:
//! infrastructure failure must never read as suspicion.

use serde::{Deserialize, Serialize};

use crate::types::{
    BehaviorSignals, ContentSignals, GroupKind, NetworkSignals, ProfileSignals, RiskResult,
    Signals, ThreatType, Verdict,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorWeights {
    pub flood_hour_10: i32,
    pub flood_hour_5: i32,
    pub flood_day_50: i32,
    pub join_to_message_under_10s: i32,
    pub first_message_under_30s: i32,
    pub first_message_under_5m: i32,
    pub is_first_message: i32,
    pub previously_blocked: i32,
    pub previously_flagged: i32,
    pub approved_10_plus: i32,
    pub approved_5_plus: i32,
    pub approved_1_plus: i32,
    pub channel_subscriber: i32,
    pub is_reply: i32,
    pub raid_mode_first_message: i32,
}

impl Default for BehaviorWeights {
    fn default() -> Self {
        BehaviorWeights {
            flood_hour_10: 20,
            flood_hour_5: 12,
            flood_day_50: 10,
            join_to_message_under_10s: 18,
            first_message_under_30s: 15,
            first_message_under_5m: 8,
            is_first_message: 8,
            previously_blocked: 25,
            previously_flagged: 15,
            approved_10_plus: -15,
            approved_5_plus: -10,
            approved_1_plus: -5,
            channel_subscriber: -25,
            is_reply: -3,
            raid_mode_first_message: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentWeights {
    pub scam_phrase: i32,
    pub wallet_address: i32,
    pub has_urls: i32,
    pub multiple_urls_3_plus: i32,
    pub shortened_urls: i32,
    pub suspicious_tld: i32,
    pub whitelisted_domains: i32,
    pub caps_over_80: i32,
    pub caps_over_50: i32,
    pub emoji_20_plus: i32,
    pub emoji_10_plus: i32,
    pub money_pattern: i32,
    pub urgency_pattern: i32,
    pub phone_number: i32,
    pub forward_from_channel: i32,
    pub forward: i32,
}

impl Default for ContentWeights {
    fn default() -> Self {
        ContentWeights {
            scam_phrase: 35,
            wallet_address: 20,
            has_urls: 5,
            multiple_urls_3_plus: 12,
            shortened_urls: 15,
            suspicious_tld: 18,
            whitelisted_domains: -8,
            caps_over_80: 15,
            caps_over_50: 8,
            emoji_20_plus: 18,
            emoji_10_plus: 10,
            money_pattern: 12,
            urgency_pattern: 10,
            phone_number: 8,
            forward_from_channel: 12,
            forward: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkWeights {
    pub blocklisted: i32,
    pub whitelisted: i32,
    pub similarity_95: i32,
    pub similarity_88: i32,
    pub similarity_80: i32,
    pub similarity_70: i32,
    pub duplicate_in_other_groups: i32,
    pub banned_in_other_groups: i32,
    pub flagged_in_other_groups: i32,
}

impl Default for NetworkWeights {
    fn default() -> Self {
        NetworkWeights {
            blocklisted: 50,
            whitelisted: -30,
            similarity_95: 50,
            similarity_88: 45,
            similarity_80: 35,
            similarity_70: 25,
            duplicate_in_other_groups: 35,
            banned_in_other_groups: 40,
            flagged_in_other_groups: 25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileWeights {
    pub account_under_1_day: i32,
    pub account_under_7_days: i32,
    pub account_over_1_year: i32,
    pub account_over_3_years: i32,
    pub has_avatar: i32,
    pub no_avatar: i32,
    pub has_username: i32,
    pub no_username: i32,
    pub is_premium: i32,
    pub is_bot: i32,
    pub username_random_chars: i32,
    pub name_emoji_spam: i32,
    pub bio_has_links: i32,
}

impl Default for ProfileWeights {
    fn default() -> Self {
        ProfileWeights {
            account_under_1_day: 25,
            account_under_7_days: 15,
            account_over_1_year: -10,
            account_over_3_years: -15,
            has_avatar: -5,
            no_avatar: 8,
            has_username: -3,
            no_username: 5,
            is_premium: -10,
            is_bot: 20,
            username_random_chars: 12,
            name_emoji_spam: 15,
            bio_has_links: 8,
        }
    }
}

/// Ascending verdict thresholds. Scores below `flag_min` allow; at or
/// above `ban_min` ban.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VerdictThresholds {
    pub flag_min: i32,
    pub restrict_min: i32,
    pub ban_min: i32,
}

impl VerdictThresholds {
    pub fn for_kind(kind: GroupKind) -> Self {
        match kind {
            GroupKind::Public => VerdictThresholds { flag_min: 30, restrict_min: 60, ban_min: 90 },
            GroupKind::Private => VerdictThresholds { flag_min: 40, restrict_min: 70, ban_min: 95 },
            GroupKind::Restricted => {
                VerdictThresholds { flag_min: 25, restrict_min: 50, ban_min: 85 }
            }
        }
    }

    pub fn valid(&self) -> bool {
        self.flag_min < self.restrict_min && self.restrict_min < self.ban_min
    }
}

/// Versioned scoring configuration. Constructed once, injected into
/// the scorer; never read from ambient state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub version: u32,
    pub behavior: BehaviorWeights,
    pub content: ContentWeights,
    pub network: NetworkWeights,
    pub profile: ProfileWeights,
    pub thresholds_public: VerdictThresholds,
    pub thresholds_private: VerdictThresholds,
    pub thresholds_restricted: VerdictThresholds,
    /// Distinct groups at which a duplicate becomes the
    /// DuplicateSpamBurst override.
    pub duplicate_burst_groups: u64,
    /// Join-to-message window under which a message during raid mode
    /// becomes the RaidJoin override.
    pub raid_fast_message_secs: i64,
    /// Inclusive score band flagged for external review.
    pub review_band: (i32, i32),
}

impl Default for ScoringConfig {
    fn default() -> Self {
        ScoringConfig {
            version: 1,
            behavior: BehaviorWeights::default(),
            content: ContentWeights::default(),
            network: NetworkWeights::default(),
            profile: ProfileWeights::default(),
            thresholds_public: VerdictThresholds::for_kind(GroupKind::Public),
            thresholds_private: VerdictThresholds::for_kind(GroupKind::Private),
            thresholds_restricted: VerdictThresholds::for_kind(GroupKind::Restricted),
            duplicate_burst_groups: 3,
            raid_fast_message_secs: 60,
            review_band: (35, 85),
        }
    }
}

impl ScoringConfig {
    pub fn thresholds(&self, kind: GroupKind) -> VerdictThresholds {
        match kind {
            GroupKind::Public => self.thresholds_public,
            GroupKind::Private => self.thresholds_private,
            GroupKind::Restricted => self.thresholds_restricted,
        }
    }
}

/// Mutable accumulator for one scoring pass.
#[derive(Default)]
struct Tally {
    score: i32,
    breakdown: Vec<(String, i32)>,
    contributing: Vec<String>,
    mitigating: Vec<String>,
}

impl Tally {
    fn add(&mut self, name: &str, weight: i32) {
        if weight == 0 {
            return;
        }
        self.score += weight;
        self.breakdown.push((name.to_string(), weight));
    }

    fn risk(&mut self, name: &str, weight: i32, note: &str) {
        self.add(name, weight);
        self.contributing.push(note.to_string());
    }

    fn trust(&mut self, name: &str, weight: i32, note: &str) {
        self.add(name, weight);
        self.mitigating.push(note.to_string());
    }
}

pub struct RiskScorer {
    config: ScoringConfig,
}

impl RiskScorer {
    pub fn new(config: ScoringConfig) -> Self {
        RiskScorer { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, signals: &Signals, kind: GroupKind) -> RiskResult {
        let mut tally = Tally::default();

        let behavior_score = self.score_behavior(signals.behavior.value(), &mut tally);
        let content_score = self.score_content(signals.content.value(), &mut tally);
        let network_score = self.score_network(signals.network.value(), &mut tally);
        let profile_score = self.score_profile(signals.profile.value(), &mut tally);

        let score = tally.score.clamp(0, 100);
        let thresholds = self.config.thresholds(kind);

        // Whitelist short-circuits to allow, independent of score.
        if let Some(net) = signals.network.value() {
            if net.whitelisted == Some(true) {
                tally.mitigating.push("Sender on global whitelist".to_string());
                return RiskResult {
                    score,
                    verdict: Verdict::Allow,
                    threats: Vec::new(),
                    behavior_score,
                    content_score,
                    network_score,
                    profile_score,
                    breakdown: tally.breakdown,
                    contributing_factors: tally.contributing,
                    mitigating_factors: tally.mitigating,
                    needs_review: false,
                };
            }
        }

        let mut threats = self.detect_threats(signals, score);

        let verdict = match self.check_overrides(signals) {
            Some(override_threat) => {
                threats.retain(|t| *t != override_threat);
                threats.insert(0, override_threat);
                tally
                    .contributing
                    .push(format!("Hard override: {}", override_threat.as_str()));
                // Override verdicts are always present for the three
                // override-class variants.
                override_threat.override_verdict().unwrap_or(Verdict::Ban)
            }
            None => self.verdict_for(score, &thresholds),
        };

        let (review_lo, review_hi) = self.config.review_band;
        RiskResult {
            score,
            verdict,
            threats,
            behavior_score,
            content_score,
            network_score,
            profile_score,
            breakdown: tally.breakdown,
            contributing_factors: tally.contributing,
            mitigating_factors: tally.mitigating,
            needs_review: score >= review_lo && score <= review_hi,
        }
    }

    /// Override-class checks, fixed severity order, first match wins.
    fn check_overrides(&self, signals: &Signals) -> Option<ThreatType> {
        let net = signals.network.value();

        if net.and_then(|n| n.blocklisted) == Some(true) {
            return Some(ThreatType::BlocklistHit);
        }
        if let Some(dupes) = net.and_then(|n| n.duplicate_groups) {
            if dupes >= self.config.duplicate_burst_groups {
                return Some(ThreatType::DuplicateSpamBurst);
            }
        }
        if let Some(b) = signals.behavior.value() {
            if b.raid_mode_active {
                if let Some(secs) = b.join_to_message_secs {
                    if secs <= self.config.raid_fast_message_secs {
                        return Some(ThreatType::RaidJoin);
                    }
                }
            }
        }
        None
    }

    fn verdict_for(&self, score: i32, t: &VerdictThresholds) -> Verdict {
        if score >= t.ban_min {
            Verdict::Ban
        } else if score >= t.restrict_min {
            Verdict::Restrict
        } else if score >= t.flag_min {
            Verdict::FlagForReview
        } else {
            Verdict::Allow
        }
    }

    fn detect_threats(&self, signals: &Signals, score: i32) -> Vec<ThreatType> {
        let mut threats = Vec::new();
        if score < 30 {
            return threats;
        }
        if let Some(c) = signals.content.value() {
            if c.has_scam_phrases {
                threats.push(ThreatType::Scam);
            }
        }
        if let Some(n) = signals.network.value() {
            if n.spam_similarity.unwrap_or(0.0) >= 0.80 {
                threats.push(ThreatType::Spam);
            }
        }
        if let Some(b) = signals.behavior.value() {
            if b.messages_last_hour.unwrap_or(0) >= 10 {
                threats.push(ThreatType::Flood);
            }
        }
        if let Some(c) = signals.content.value() {
            if c.url_count >= 3 || c.has_money_patterns {
                threats.push(ThreatType::Promotion);
            }
        }
        if threats.is_empty() && score >= 50 {
            threats.push(ThreatType::Unknown);
        }
        threats
    }

    fn score_behavior(&self, behavior: Option<&BehaviorSignals>, tally: &mut Tally) -> i32 {
        let Some(b) = behavior else { return 0 };
        let start = tally.score;
        let w = &self.config.behavior;

        if let Some(hour) = b.messages_last_hour {
            if hour >= 10 {
                tally.risk("behavior.flood_hour_10", w.flood_hour_10, "Message flood (10+/hour)");
            } else if hour >= 5 {
                tally.risk("behavior.flood_hour_5", w.flood_hour_5, "Elevated message rate");
            }
        }
        if b.messages_last_day.unwrap_or(0) >= 50 {
            tally.risk("behavior.flood_day_50", w.flood_day_50, "Heavy daily volume");
        }
        if let Some(secs) = b.join_to_message_secs {
            if secs <= 10 {
                tally.risk(
                    "behavior.join_to_message_under_10s",
                    w.join_to_message_under_10s,
                    "Message immediately after join",
                );
            }
        }
        if let Some(secs) = b.time_to_first_message_secs {
            if secs <= 30 {
                tally.risk(
                    "behavior.first_message_under_30s",
                    w.first_message_under_30s,
                    "Very fast first message",
                );
            } else if secs <= 300 {
                tally.add("behavior.first_message_under_5m", w.first_message_under_5m);
            }
        }
        if b.is_first_message == Some(true) {
            tally.add("behavior.is_first_message", w.is_first_message);
            if b.raid_mode_active {
                tally.risk(
                    "behavior.raid_mode_first_message",
                    w.raid_mode_first_message,
                    "First message during raid mode",
                );
            }
        }
        if b.blocked_messages.unwrap_or(0) > 0 {
            tally.risk("behavior.previously_blocked", w.previously_blocked, "Previously blocked");
        }
        if b.flagged_messages.unwrap_or(0) > 0 {
            tally.risk("behavior.previously_flagged", w.previously_flagged, "Previously flagged");
        }
        match b.approved_messages {
            Some(n) if n >= 10 => {
                tally.trust("behavior.approved_10_plus", w.approved_10_plus, "10+ approved messages")
            }
            Some(n) if n >= 5 => tally.add("behavior.approved_5_plus", w.approved_5_plus),
            Some(n) if n >= 1 => tally.add("behavior.approved_1_plus", w.approved_1_plus),
            _ => {}
        }
        if b.channel_subscriber == Some(true) {
            tally.trust(
                "behavior.channel_subscriber",
                w.channel_subscriber,
                "Channel subscriber",
            );
        }
        if b.is_reply {
            tally.add("behavior.is_reply", w.is_reply);
        }

        tally.score - start
    }

    fn score_content(&self, content: Option<&ContentSignals>, tally: &mut Tally) -> i32 {
        let Some(c) = content else { return 0 };
        let start = tally.score;
        let w = &self.config.content;

        if c.has_scam_phrases {
            tally.risk("content.scam_phrase", w.scam_phrase, "Known scam phrasing");
        }
        if c.has_wallet_addresses {
            tally.risk("content.wallet_address", w.wallet_address, "Wallet address in text");
        }
        if c.url_count > 0 {
            tally.add("content.has_urls", w.has_urls);
            if c.url_count >= 3 {
                tally.risk("content.multiple_urls_3_plus", w.multiple_urls_3_plus, "Multiple links");
            }
            if c.has_shortened_urls {
                tally.risk("content.shortened_urls", w.shortened_urls, "Shortened links");
            }
            if c.has_suspicious_tld {
                tally.risk("content.suspicious_tld", w.suspicious_tld, "Suspicious link TLD");
            }
            if c.has_whitelisted_urls {
                tally.trust(
                    "content.whitelisted_domains",
                    w.whitelisted_domains,
                    "Links to whitelisted domains",
                );
            }
        }
        if c.caps_ratio > 0.8 {
            tally.risk("content.caps_over_80", w.caps_over_80, "Excessive caps");
        } else if c.caps_ratio > 0.5 {
            tally.add("content.caps_over_50", w.caps_over_50);
        }
        if c.emoji_count >= 20 {
            tally.add("content.emoji_20_plus", w.emoji_20_plus);
        } else if c.emoji_count >= 10 {
            tally.add("content.emoji_10_plus", w.emoji_10_plus);
        }
        if c.has_money_patterns {
            tally.add("content.money_pattern", w.money_pattern);
        }
        if c.has_urgency_patterns {
            tally.add("content.urgency_pattern", w.urgency_pattern);
        }
        if c.has_phone_numbers {
            tally.add("content.phone_number", w.phone_number);
        }
        if c.forward_from_channel {
            tally.add("content.forward_from_channel", w.forward_from_channel);
        } else if c.is_forward {
            tally.add("content.forward", w.forward);
        }

        tally.score - start
    }

    fn score_network(&self, network: Option<&NetworkSignals>, tally: &mut Tally) -> i32 {
        let Some(n) = network else { return 0 };
        let start = tally.score;
        let w = &self.config.network;

        if n.blocklisted == Some(true) {
            tally.risk("network.blocklisted", w.blocklisted, "On global blocklist");
        }
        if n.whitelisted == Some(true) {
            tally.trust("network.whitelisted", w.whitelisted, "On global whitelist");
        }
        if let Some(sim) = n.spam_similarity {
            if sim >= 0.95 {
                tally.risk("network.similarity_95", w.similarity_95, "Near-exact spam match");
            } else if sim >= 0.88 {
                tally.risk("network.similarity_88", w.similarity_88, "High spam similarity");
            } else if sim >= 0.80 {
                tally.add("network.similarity_80", w.similarity_80);
            } else if sim >= 0.70 {
                tally.add("network.similarity_70", w.similarity_70);
            }
        }
        if n.duplicate_groups.unwrap_or(0) > 0 {
            tally.risk(
                "network.duplicate_in_other_groups",
                w.duplicate_in_other_groups,
                "Same content posted in other groups",
            );
        }
        if n.banned_in_groups.unwrap_or(0) > 0 {
            tally.risk(
                "network.banned_in_other_groups",
                w.banned_in_other_groups,
                "Banned in other groups",
            );
        }
        if n.flagged_in_groups.unwrap_or(0) > 0 {
            tally.add("network.flagged_in_other_groups", w.flagged_in_other_groups);
        }

        tally.score - start
    }

    fn score_profile(&self, profile: Option<&ProfileSignals>, tally: &mut Tally) -> i32 {
        let Some(p) = profile else { return 0 };
        let start = tally.score;
        let w = &self.config.profile;

        match p.account_age_days {
            Some(age) if age < 1 => {
                tally.risk("profile.account_under_1_day", w.account_under_1_day, "Account under 24h")
            }
            Some(age) if age < 7 => tally.add("profile.account_under_7_days", w.account_under_7_days),
            Some(age) if age >= 365 * 3 => {
                tally.trust("profile.account_over_3_years", w.account_over_3_years, "Account 3+ years")
            }
            Some(age) if age >= 365 => tally.add("profile.account_over_1_year", w.account_over_1_year),
            _ => {}
        }
        if p.has_avatar {
            tally.add("profile.has_avatar", w.has_avatar);
        } else {
            tally.add("profile.no_avatar", w.no_avatar);
        }
        if p.has_username {
            tally.add("profile.has_username", w.has_username);
        } else {
            tally.add("profile.no_username", w.no_username);
        }
        if p.is_premium {
            tally.trust("profile.is_premium", w.is_premium, "Premium account");
        }
        if p.is_bot {
            tally.risk("profile.is_bot", w.is_bot, "Bot account");
        }
        if p.username_random_chars {
            tally.add("profile.username_random_chars", w.username_random_chars);
        }
        if p.name_emoji_spam {
            tally.risk("profile.name_emoji_spam", w.name_emoji_spam, "Emoji-stuffed name");
        }
        if p.bio_has_links {
            tally.add("profile.bio_has_links", w.bio_has_links);
        }

        tally.score - start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Collected;

    fn scorer() -> RiskScorer {
        RiskScorer::new(ScoringConfig::default())
    }

    fn empty_signals() -> Signals {
        Signals::default()
    }

    #[test]
    fn all_unavailable_signals_allow() {
        let result = scorer().score(&empty_signals(), GroupKind::Public);
        assert_eq!(result.verdict, Verdict::Allow);
        assert_eq!(result.score, 0);
        assert!(result.threats.is_empty());
    }

    #[test]
    fn blocklist_overrides_regardless_of_score() {
        let mut signals = empty_signals();
        signals.network = Collected::Available(NetworkSignals {
            blocklisted: Some(true),
            ..NetworkSignals::default()
        });
        // Strong trust signals elsewhere keep the weighted score low.
        signals.behavior = Collected::Available(BehaviorSignals {
            channel_subscriber: Some(true),
            approved_messages: Some(50),
            ..BehaviorSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        assert_eq!(result.verdict, Verdict::Ban);
        assert_eq!(result.threats.first(), Some(&ThreatType::BlocklistHit));
        // Score is still reported for audit.
        assert!(result.breakdown.iter().any(|(n, _)| n == "network.blocklisted"));
    }

    #[test]
    fn override_precedence_is_deterministic() {
        let mut signals = empty_signals();
        signals.network = Collected::Available(NetworkSignals {
            blocklisted: Some(true),
            duplicate_groups: Some(10),
            ..NetworkSignals::default()
        });
        signals.behavior = Collected::Available(BehaviorSignals {
            raid_mode_active: true,
            join_to_message_secs: Some(3),
            ..BehaviorSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        // Blocklist outranks duplicate burst and raid join.
        assert_eq!(result.threats.first(), Some(&ThreatType::BlocklistHit));
        assert_eq!(result.verdict, Verdict::Ban);
    }

    #[test]
    fn duplicate_burst_override_requires_threshold() {
        let mut signals = empty_signals();
        signals.network = Collected::Available(NetworkSignals {
            duplicate_groups: Some(2),
            ..NetworkSignals::default()
        });
        let below = scorer().score(&signals, GroupKind::Public);
        assert_ne!(below.threats.first(), Some(&ThreatType::DuplicateSpamBurst));

        signals.network = Collected::Available(NetworkSignals {
            duplicate_groups: Some(3),
            ..NetworkSignals::default()
        });
        let at = scorer().score(&signals, GroupKind::Public);
        assert_eq!(at.threats.first(), Some(&ThreatType::DuplicateSpamBurst));
        assert_eq!(at.verdict, Verdict::Ban);
    }

    #[test]
    fn whitelist_short_circuits_to_allow() {
        let mut signals = empty_signals();
        signals.network = Collected::Available(NetworkSignals {
            whitelisted: Some(true),
            blocklisted: Some(false),
            spam_similarity: Some(0.99),
            ..NetworkSignals::default()
        });
        signals.content = Collected::Available(ContentSignals {
            has_scam_phrases: true,
            has_wallet_addresses: true,
            ..ContentSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        assert_eq!(result.verdict, Verdict::Allow);
        assert!(result
            .mitigating_factors
            .iter()
            .any(|f| f.contains("whitelist")));
    }

    #[test]
    fn raid_mode_tightens_behavior_score() {
        let base = BehaviorSignals {
            is_first_message: Some(true),
            join_to_message_secs: Some(200),
            ..BehaviorSignals::default()
        };

        let mut calm = empty_signals();
        calm.behavior = Collected::Available(base.clone());
        let calm_result = scorer().score(&calm, GroupKind::Public);

        let mut raided = empty_signals();
        raided.behavior = Collected::Available(BehaviorSignals {
            raid_mode_active: true,
            ..base
        });
        let raid_result = scorer().score(&raided, GroupKind::Public);

        assert!(raid_result.behavior_score > calm_result.behavior_score);
        // Slow first message during a raid is tightened scoring, not
        // the RaidJoin override.
        assert_ne!(raid_result.threats.first(), Some(&ThreatType::RaidJoin));
    }

    #[test]
    fn fast_message_during_raid_is_override() {
        let mut signals = empty_signals();
        signals.behavior = Collected::Available(BehaviorSignals {
            raid_mode_active: true,
            join_to_message_secs: Some(5),
            ..BehaviorSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        assert_eq!(result.threats.first(), Some(&ThreatType::RaidJoin));
        assert_eq!(result.verdict, Verdict::Restrict);
    }

    #[test]
    fn heavy_spam_content_crosses_thresholds() {
        let mut signals = empty_signals();
        signals.content = Collected::Available(ContentSignals {
            has_scam_phrases: true,
            has_wallet_addresses: true,
            url_count: 4,
            has_shortened_urls: true,
            has_suspicious_tld: true,
            caps_ratio: 0.9,
            has_money_patterns: true,
            has_urgency_patterns: true,
            ..ContentSignals::default()
        });
        signals.profile = Collected::Available(ProfileSignals {
            account_age_days: Some(0),
            ..ProfileSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        assert!(result.score >= 90, "score was {}", result.score);
        assert_eq!(result.verdict, Verdict::Ban);
        assert!(result.threats.contains(&ThreatType::Scam));
    }

    #[test]
    fn trust_signals_offset_risk() {
        let risky_content = ContentSignals {
            url_count: 1,
            has_money_patterns: true,
            ..ContentSignals::default()
        };

        let mut fresh = empty_signals();
        fresh.content = Collected::Available(risky_content.clone());
        let fresh_score = scorer().score(&fresh, GroupKind::Public).score;

        let mut established = empty_signals();
        established.content = Collected::Available(risky_content);
        established.behavior = Collected::Available(BehaviorSignals {
            approved_messages: Some(20),
            channel_subscriber: Some(true),
            ..BehaviorSignals::default()
        });
        let established_score = scorer().score(&established, GroupKind::Public).score;

        assert!(established_score < fresh_score);
    }

    #[test]
    fn thresholds_vary_by_group_kind() {
        let mut signals = empty_signals();
        signals.content = Collected::Available(ContentSignals {
            has_scam_phrases: true,
            ..ContentSignals::default()
        });
        // Score 35: flagged in public, allowed in private groups.
        let public = scorer().score(&signals, GroupKind::Public);
        let private = scorer().score(&signals, GroupKind::Private);
        assert_eq!(public.verdict, Verdict::FlagForReview);
        assert_eq!(private.verdict, Verdict::Allow);
    }

    #[test]
    fn review_band_marks_gray_zone() {
        let mut signals = empty_signals();
        signals.content = Collected::Available(ContentSignals {
            has_scam_phrases: true,
            url_count: 1,
            ..ContentSignals::default()
        });
        let result = scorer().score(&signals, GroupKind::Public);
        assert!(result.score >= 35 && result.score <= 85);
        assert!(result.needs_review);
    }
}
