//! Profile signal collection: account-age proxies and completeness
//! heuristics from the sender snapshot carried with the event.

use regex::Regex;

use crate::types::{Collected, MessageContext, ProfileSignals};

pub struct ProfileCollector {
    random_username_re: Regex,
}

impl ProfileCollector {
    pub fn new() -> Self {
        ProfileCollector {
            // Trailing digit runs are the throwaway-account pattern
            // ("user84921"); short names with digits inside are normal.
            random_username_re: Regex::new(r"\d{4,}$|^[a-z]{1,3}\d{5,}").unwrap(),
        }
    }

    pub fn collect(&self, ctx: &MessageContext) -> Collected<ProfileSignals> {
        let sender = &ctx.sender;

        let username_random_chars = sender
            .username
            .as_deref()
            .map(|u| self.random_username_re.is_match(&u.to_lowercase()))
            .unwrap_or(false);

        let name_emoji_spam = sender
            .display_name
            .as_deref()
            .map(|n| n.chars().filter(|c| !c.is_ascii()).count() >= 3)
            .unwrap_or(false);

        let bio_has_links = sender
            .bio
            .as_deref()
            .map(|b| b.contains("http://") || b.contains("https://") || b.contains("t.me/"))
            .unwrap_or(false);

        Collected::Available(ProfileSignals {
            account_age_days: sender.account_age_days,
            has_username: sender.username.is_some(),
            has_avatar: sender.has_avatar,
            has_bio: sender.has_bio,
            is_premium: sender.is_premium,
            is_bot: sender.is_bot,
            username_random_chars,
            name_emoji_spam,
            bio_has_links,
        })
    }
}

impl Default for ProfileCollector {
    fn default() -> Self {
        Self::new()
    }
}
