//! Notification predicate and message formatting.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

use crate::model::{Item, TrackedAccount};

/// Everything besides the item that decides whether it is notified.
#[derive(Debug, Clone, Copy)]
pub struct PredicateContext<'a> {
    pub watched: &'a BTreeSet<String>,
    pub muted: bool,
    pub now: DateTime<Utc>,
    pub window: Duration,
}

/// Should `item` produce a notification?
///
/// Both kinds require a watched subreddit, an unmuted account and an item
/// created inside the recency window. Comments on the redditor's own posts
/// are skipped.
pub fn should_notify(item: &Item, ctx: &PredicateContext<'_>) -> bool {
    if ctx.muted {
        return false;
    }
    if !ctx.watched.contains(&item.subreddit().to_ascii_lowercase()) {
        return false;
    }
    if item.created() <= ctx.now - ctx.window {
        return false;
    }
    match item {
        Item::Submission(_) => true,
        Item::Comment(c) => !c.is_submitter,
    }
}

/// Most rockets a message shows, whatever the rating.
pub const MAX_ROCKETS: i32 = 20;

/// One rocket per rating point, clamped to `0..=MAX_ROCKETS`.
pub fn rockets(rating: i32) -> String {
    "🚀".repeat(rating.clamp(0, MAX_ROCKETS) as usize)
}

/// Render the chat message for `item`.
pub fn format_message(account: &TrackedAccount, item: &Item) -> String {
    let rating = rockets(account.rating);
    match item {
        Item::Submission(s) => format!(
            "RATING: {rating}\n🎆New submission from {}:\n{}\n{}\n🎆",
            account.key, s.title, s.url
        ),
        Item::Comment(c) => format!(
            "RATING: {rating}\n🎇New comment from {}:\n{}\nwww.reddit.com{}\n🎇",
            account.key, c.body, c.permalink
        ),
    }
}
