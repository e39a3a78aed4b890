//! Account registry: the persistent record of tracked redditors, their
//! ratings and mute state, plus the chats that receive notifications.
//!
//! The daemon uses the Postgres implementation in [`crate::db`];
//! [`MemoryRegistry`] keeps everything in process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::error::{Error, Result};
use crate::model::{ChatId, TrackedAccount, mute_deadline};

#[async_trait]
pub trait AccountRegistry: Send + Sync {
    /// All tracked accounts, ordered by key.
    async fn list_tracked(&self) -> Result<Vec<TrackedAccount>>;

    async fn get(&self, key: &str) -> Result<Option<TrackedAccount>>;

    /// Unknown keys are never muted.
    async fn is_muted(&self, key: &str) -> Result<bool>;

    /// Insert a new account. Returns `false` if the key is already tracked.
    async fn add(&self, account: &TrackedAccount) -> Result<bool>;

    /// Returns `false` if the key was not tracked.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Mute for `days` from now. Returns the new mute deadline, or `None`
    /// for an unknown key. A deadline past the representable range is an
    /// error.
    async fn mute(&self, key: &str, days: i64) -> Result<Option<DateTime<Utc>>>;

    async fn unmute(&self, key: &str) -> Result<bool>;

    /// Add `delta` (may be negative) to the rating. Returns the new rating.
    async fn adjust_rating(&self, key: &str, delta: i32) -> Result<Option<i32>>;

    /// Chats that receive notifications.
    async fn destinations(&self) -> Result<Vec<ChatId>>;

    async fn add_destination(&self, chat: ChatId, name: Option<&str>) -> Result<bool>;

    async fn remove_destination(&self, chat: ChatId) -> Result<bool>;

    /// Last Telegram update id that was processed, 0 if none.
    async fn update_offset(&self) -> Result<i64>;

    async fn save_update_offset(&self, offset: i64) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<String, TrackedAccount>,
    chats: BTreeSet<ChatId>,
    offset: i64,
}

/// In-process registry.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<MemoryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with accounts and destinations.
    pub fn with(accounts: impl IntoIterator<Item = TrackedAccount>, chats: &[ChatId]) -> Self {
        let registry = Self::new();
        {
            let mut state = registry.state();
            for account in accounts {
                state.accounts.insert(account.key.clone(), account);
            }
            state.chats.extend(chats.iter().copied());
        }
        registry
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // Every update is a single map operation; poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl AccountRegistry for MemoryRegistry {
    async fn list_tracked(&self) -> Result<Vec<TrackedAccount>> {
        Ok(self.state().accounts.values().cloned().collect())
    }

    async fn get(&self, key: &str) -> Result<Option<TrackedAccount>> {
        Ok(self.state().accounts.get(key).cloned())
    }

    async fn is_muted(&self, key: &str) -> Result<bool> {
        let now = Utc::now();
        Ok(self
            .state()
            .accounts
            .get(key)
            .is_some_and(|a| a.is_muted_at(now)))
    }

    async fn add(&self, account: &TrackedAccount) -> Result<bool> {
        let mut state = self.state();
        if state.accounts.contains_key(&account.key) {
            return Ok(false);
        }
        state.accounts.insert(account.key.clone(), account.clone());
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.state().accounts.remove(key).is_some())
    }

    async fn mute(&self, key: &str, days: i64) -> Result<Option<DateTime<Utc>>> {
        let until = mute_deadline(Utc::now(), days)
            .ok_or_else(|| Error::Other(format!("mute of {days} days is out of range")))?;
        Ok(self.state().accounts.get_mut(key).map(|a| {
            a.mute_until = Some(until);
            until
        }))
    }

    async fn unmute(&self, key: &str) -> Result<bool> {
        Ok(self
            .state()
            .accounts
            .get_mut(key)
            .map(|a| a.mute_until = None)
            .is_some())
    }

    async fn adjust_rating(&self, key: &str, delta: i32) -> Result<Option<i32>> {
        Ok(self.state().accounts.get_mut(key).map(|a| {
            a.rating = a.rating.saturating_add(delta);
            a.rating
        }))
    }

    async fn destinations(&self) -> Result<Vec<ChatId>> {
        Ok(self.state().chats.iter().copied().collect())
    }

    async fn add_destination(&self, chat: ChatId, _name: Option<&str>) -> Result<bool> {
        Ok(self.state().chats.insert(chat))
    }

    async fn remove_destination(&self, chat: ChatId) -> Result<bool> {
        Ok(self.state().chats.remove(&chat))
    }

    async fn update_offset(&self) -> Result<i64> {
        Ok(self.state().offset)
    }

    async fn save_update_offset(&self, offset: i64) -> Result<()> {
        self.state().offset = offset;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_is_rejected_for_existing_key() {
        let registry = MemoryRegistry::new();
        assert!(registry.add(&TrackedAccount::new("alice", 5)).await.unwrap());
        assert!(!registry.add(&TrackedAccount::new("alice", 9)).await.unwrap());
        assert_eq!(registry.get("alice").await.unwrap().unwrap().rating, 5);
    }

    #[tokio::test]
    async fn mute_and_unmute_round_trip() {
        let registry = MemoryRegistry::with([TrackedAccount::new("bob", 2)], &[]);
        assert!(!registry.is_muted("bob").await.unwrap());

        assert!(registry.mute("bob", 3).await.unwrap().is_some());
        assert!(registry.is_muted("bob").await.unwrap());

        assert!(registry.unmute("bob").await.unwrap());
        assert!(!registry.is_muted("bob").await.unwrap());
    }

    #[tokio::test]
    async fn oversized_mute_is_an_error_and_leaves_state_alone() {
        let registry = MemoryRegistry::with([TrackedAccount::new("bob", 2)], &[]);
        assert!(registry.mute("bob", 9_999_999_999_999).await.is_err());
        assert!(!registry.is_muted("bob").await.unwrap());
        assert!(registry.get("bob").await.unwrap().unwrap().mute_until.is_none());
    }

    #[tokio::test]
    async fn unknown_keys_are_misses_not_errors() {
        let registry = MemoryRegistry::new();
        assert!(!registry.is_muted("ghost").await.unwrap());
        assert!(registry.mute("ghost", 1).await.unwrap().is_none());
        assert!(registry.adjust_rating("ghost", 1).await.unwrap().is_none());
        assert!(!registry.remove("ghost").await.unwrap());
    }

    #[tokio::test]
    async fn rating_adjusts_by_signed_delta() {
        let registry = MemoryRegistry::with([TrackedAccount::new("carol", 4)], &[]);
        assert_eq!(registry.adjust_rating("carol", 3).await.unwrap(), Some(7));
        assert_eq!(registry.adjust_rating("carol", -10).await.unwrap(), Some(-3));
    }

    #[tokio::test]
    async fn list_is_ordered_by_key() {
        let registry = MemoryRegistry::with(
            [TrackedAccount::new("zed", 1), TrackedAccount::new("amy", 1)],
            &[ChatId(1)],
        );
        let keys: Vec<_> = registry
            .list_tracked()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.key)
            .collect();
        assert_eq!(keys, vec!["amy", "zed"]);
        assert_eq!(registry.destinations().await.unwrap(), vec![ChatId(1)]);
    }
}
