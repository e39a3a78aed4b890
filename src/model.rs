//! Core data model.
//!
//! A tracked account is a redditor being watched. Items are the submissions
//! and comments the polling source yields for it; control events add and
//! remove accounts while the daemon runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Tracked account
// ---------------------------------------------------------------------------

/// A redditor tracked by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAccount {
    /// Redditor name. Unique key across the registry and the live pair set.
    pub key: String,

    /// Number of rockets shown in each notification. Adjustable by
    /// `/giverockets`, so it may drift outside the 1-10 range `/add` accepts.
    pub rating: i32,

    /// Notifications are suppressed until this instant.
    pub mute_until: Option<DateTime<Utc>>,
}

impl TrackedAccount {
    pub fn new(key: impl Into<String>, rating: i32) -> Self {
        Self {
            key: key.into(),
            rating,
            mute_until: None,
        }
    }

    /// Is the account muted at `now`?
    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.mute_until.is_some_and(|until| until > now)
    }
}

/// Reddit usernames: 3-20 ASCII letters, digits, `_` or `-`.
pub fn is_valid_redditor_name(name: &str) -> bool {
    (3..=20).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// When a mute of `days` starting at `now` ends. `None` if it does not fit in
/// a timestamp.
pub fn mute_deadline(now: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    now.checked_add_signed(chrono::Duration::try_days(days)?)
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Which listing a worker follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Submission,
    Comment,
}

impl ItemKind {
    pub const ALL: [ItemKind; 2] = [ItemKind::Submission, ItemKind::Comment];

    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Submission => "submission",
            ItemKind::Comment => "comment",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A post made by a tracked redditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Reddit fullname (`t3_...`).
    pub id: String,
    pub subreddit: String,
    pub title: String,
    pub url: String,
    pub permalink: String,
    pub created: DateTime<Utc>,
}

/// A comment made by a tracked redditor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    /// Reddit fullname (`t1_...`).
    pub id: String,
    pub subreddit: String,
    pub body: String,
    pub permalink: String,
    /// The comment author also submitted the post it was made on.
    pub is_submitter: bool,
    pub created: DateTime<Utc>,
}

/// One entry yielded by a cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Item {
    Submission(Submission),
    Comment(Comment),
}

impl Item {
    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Submission(_) => ItemKind::Submission,
            Item::Comment(_) => ItemKind::Comment,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Item::Submission(s) => &s.id,
            Item::Comment(c) => &c.id,
        }
    }

    pub fn subreddit(&self) -> &str {
        match self {
            Item::Submission(s) => &s.subreddit,
            Item::Comment(c) => &c.subreddit,
        }
    }

    pub fn created(&self) -> DateTime<Utc> {
        match self {
            Item::Submission(s) => s.created,
            Item::Comment(c) => c.created,
        }
    }
}

// ---------------------------------------------------------------------------
// Control events + destinations
// ---------------------------------------------------------------------------

/// Emitted by the command producer when the tracked set changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    Created(TrackedAccount),
    Removed(String),
}

/// A Telegram chat that receives notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub i64);

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn redditor_names_are_restricted_to_reddit_charset() {
        assert!(is_valid_redditor_name("alice"));
        assert!(is_valid_redditor_name("Deep-F_V123"));
        assert!(!is_valid_redditor_name("al"));
        assert!(!is_valid_redditor_name("a_name_far_too_long_x"));
        assert!(!is_valid_redditor_name("../api/v1/me"));
        assert!(!is_valid_redditor_name("bob?x=1"));
        assert!(!is_valid_redditor_name("jörg"));
    }

    #[test]
    fn mute_deadline_rejects_overflow() {
        let now = Utc::now();
        assert_eq!(mute_deadline(now, 2), Some(now + Duration::days(2)));
        assert_eq!(mute_deadline(now, 9_999_999_999_999), None);
        assert_eq!(mute_deadline(now, i64::MAX), None);
    }

    #[test]
    fn mute_expires() {
        let now = Utc::now();
        let mut account = TrackedAccount::new("alice", 3);
        assert!(!account.is_muted_at(now));

        account.mute_until = Some(now + Duration::days(1));
        assert!(account.is_muted_at(now));
        assert!(!account.is_muted_at(now + Duration::days(2)));
    }

    #[test]
    fn item_accessors_follow_variant() {
        let now = Utc::now();
        let item = Item::Comment(Comment {
            id: "t1_abc".into(),
            subreddit: "thetagang".into(),
            body: "sold puts".into(),
            permalink: "/r/thetagang/comments/x/y/abc/".into(),
            is_submitter: false,
            created: now,
        });
        assert_eq!(item.kind(), ItemKind::Comment);
        assert_eq!(item.id(), "t1_abc");
        assert_eq!(item.subreddit(), "thetagang");
        assert_eq!(item.created(), now);
    }
}
