//! Content signal collection: text features, link analysis, known-bad
//! pattern matching. Pure CPU, no suspension points.

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{Collected, ContentSignals, MessageContext};

/// Pattern configuration. Lists are matched case-insensitively against
/// the message text and extracted link domains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentPatterns {
    pub scam_phrases: Vec<String>,
    pub suspicious_tlds: Vec<String>,
    pub whitelisted_domains: Vec<String>,
    pub shortener_domains: Vec<String>,
}

impl Default for ContentPatterns {
    fn default() -> Self {
        ContentPatterns {
            scam_phrases: vec![
                "guaranteed profit".to_string(),
                "double your money".to_string(),
                "investment opportunity".to_string(),
                "passive income".to_string(),
                "dm me to earn".to_string(),
                "airdrop".to_string(),
                "claim your reward".to_string(),
                "trading signals".to_string(),
            ],
            suspicious_tlds: vec![
                "tk".to_string(),
                "ml".to_string(),
                "ga".to_string(),
                "cf".to_string(),
                "gq".to_string(),
                "top".to_string(),
                "xyz".to_string(),
                "click".to_string(),
            ],
            whitelisted_domains: vec![
                "github.com".to_string(),
                "wikipedia.org".to_string(),
                "youtube.com".to_string(),
                "stackoverflow.com".to_string(),
            ],
            shortener_domains: vec![
                "bit.ly".to_string(),
                "t.co".to_string(),
                "tinyurl.com".to_string(),
                "goo.gl".to_string(),
                "is.gd".to_string(),
            ],
        }
    }
}

pub struct ContentCollector {
    patterns: ContentPatterns,
    url_re: Regex,
    money_re: Regex,
    urgency_re: Regex,
    phone_re: Regex,
    wallet_re: Regex,
}

impl ContentCollector {
    pub fn new(patterns: ContentPatterns) -> Self {
        ContentCollector {
            patterns,
            url_re: Regex::new(r"https?://[^\s<>]+").unwrap(),
            money_re: Regex::new(r"(?i)[$€£]\s?\d+|(\d+\s?(usd|eur|usdt|btc|eth))|free money|cash prize")
                .unwrap(),
            urgency_re: Regex::new(
                r"(?i)act now|limited time|hurry|last chance|only today|don't miss|expires",
            )
            .unwrap(),
            phone_re: Regex::new(r"\+?\d[\d\s\-()]{8,}\d").unwrap(),
            // BTC base58 and EVM hex address shapes.
            wallet_re: Regex::new(r"\b(0x[0-9a-fA-F]{40}|[13][1-9A-HJ-NP-Za-km-z]{25,34})\b")
                .unwrap(),
        }
    }

    pub fn collect(&self, ctx: &MessageContext) -> Collected<ContentSignals> {
        let text = &ctx.text;
        let lower = text.to_lowercase();

        let urls: Vec<&str> = self.url_re.find_iter(text).map(|m| m.as_str()).collect();
        let mut domains: Vec<String> = Vec::new();
        for raw in &urls {
            if let Ok(parsed) = Url::parse(raw.trim_end_matches(['.', ',', ')', ']'])) {
                if let Some(host) = parsed.host_str() {
                    let host = host.trim_start_matches("www.").to_lowercase();
                    if !domains.contains(&host) {
                        domains.push(host);
                    }
                }
            }
        }

        let has_shortened_urls = domains
            .iter()
            .any(|d| self.patterns.shortener_domains.iter().any(|s| d == s));
        let has_whitelisted_urls = domains.iter().any(|d| {
            self.patterns
                .whitelisted_domains
                .iter()
                .any(|w| d == w || d.ends_with(&format!(".{w}")))
        });
        let has_suspicious_tld = domains.iter().any(|d| {
            d.rsplit('.')
                .next()
                .map(|tld| self.patterns.suspicious_tlds.iter().any(|s| tld == s))
                .unwrap_or(false)
        });

        let alphabetic = text.chars().filter(|c| c.is_alphabetic()).count();
        let uppercase = text.chars().filter(|c| c.is_uppercase()).count();
        let caps_ratio = if alphabetic > 0 {
            uppercase as f32 / alphabetic as f32
        } else {
            0.0
        };

        Collected::Available(ContentSignals {
            text_length: text.chars().count(),
            word_count: text.split_whitespace().count(),
            caps_ratio,
            emoji_count: text.chars().filter(|c| is_emoji(*c)).count(),
            url_count: urls.len(),
            unique_domains: domains.len(),
            has_shortened_urls,
            has_suspicious_tld,
            has_whitelisted_urls,
            has_scam_phrases: self.patterns.scam_phrases.iter().any(|p| lower.contains(p)),
            has_money_patterns: self.money_re.is_match(text),
            has_urgency_patterns: self.urgency_re.is_match(text),
            has_phone_numbers: self.phone_re.is_match(text),
            has_wallet_addresses: self.wallet_re.is_match(text),
            has_attachment: ctx.has_attachment,
            is_forward: ctx.is_forward,
            forward_from_channel: ctx.forward_from_channel,
        })
    }
}

fn is_emoji(c: char) -> bool {
    matches!(c,
        '\u{1F300}'..='\u{1FAFF}'
        | '\u{2600}'..='\u{27BF}'
        | '\u{FE00}'..='\u{FE0F}'
        | '\u{1F000}'..='\u{1F0FF}')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GroupKind, SenderProfile};
    use chrono::Utc;

    fn ctx(text: &str) -> MessageContext {
        MessageContext {
            message_id: 1,
            group_id: 1,
            user_id: 1,
            group_kind: GroupKind::Public,
            text: text.to_string(),
            has_attachment: false,
            has_links: false,
            is_forward: false,
            forward_from_channel: false,
            is_reply: false,
            timestamp: Utc::now(),
            sender: SenderProfile::default(),
        }
    }

    fn collect(text: &str) -> ContentSignals {
        let collector = ContentCollector::new(ContentPatterns::default());
        match collector.collect(&ctx(text)) {
            Collected::Available(s) => s,
            Collected::Unavailable => panic!("content collector is infallible"),
        }
    }

    #[test]
    fn clean_text_has_no_flags() {
        let s = collect("Thanks for the pointer, that fixed my build.");
        assert!(!s.has_scam_phrases);
        assert!(!s.has_money_patterns);
        assert!(!s.has_urgency_patterns);
        assert!(!s.has_wallet_addresses);
        assert_eq!(s.url_count, 0);
    }

    #[test]
    fn detects_scam_phrases_and_urgency() {
        let s = collect("Guaranteed PROFIT! Act now, limited time airdrop!!!");
        assert!(s.has_scam_phrases);
        assert!(s.has_urgency_patterns);
    }

    #[test]
    fn url_analysis_flags_shorteners_and_tlds() {
        let s = collect("check https://bit.ly/xyz and https://totally-legit.tk/page");
        assert_eq!(s.url_count, 2);
        assert!(s.has_shortened_urls);
        assert!(s.has_suspicious_tld);
        assert!(!s.has_whitelisted_urls);
    }

    #[test]
    fn whitelisted_domain_is_recognized() {
        let s = collect("see https://github.com/rust-lang/rust for the source");
        assert!(s.has_whitelisted_urls);
        assert!(!s.has_suspicious_tld);
        assert_eq!(s.unique_domains, 1);
    }

    #[test]
    fn detects_wallet_addresses() {
        let s = collect("send to 0x52908400098527886E0F7030069857D2E4169EE7 today");
        assert!(s.has_wallet_addresses);
    }

    #[test]
    fn caps_ratio_measures_shouting() {
        let quiet = collect("hello there friends");
        let loud = collect("BUY THIS NOW EVERYONE");
        assert!(quiet.caps_ratio < 0.2);
        assert!(loud.caps_ratio > 0.8);
    }

    #[test]
    fn counts_emoji() {
        let s = collect("🚀🚀🚀 to the moon 🌕");
        assert_eq!(s.emoji_count, 4);
    }
}
