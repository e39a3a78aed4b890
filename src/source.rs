//! Polling source: where workers pull new items from.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Item, ItemKind};

/// Opens cursors over a redditor's listings.
#[async_trait]
pub trait PollingSource: Send + Sync {
    /// Open a cursor that yields only items created after it was opened.
    async fn open_cursor(&self, kind: ItemKind, key: &str) -> Result<Box<dyn Cursor>>;

    /// Does the redditor exist upstream?
    async fn account_exists(&self, key: &str) -> Result<bool>;
}

/// A stateful handle into one redditor's listing of one item kind.
#[async_trait]
pub trait Cursor: Send {
    /// Return the next new item, or `None` when nothing new is available.
    /// Never waits for items to appear; errors are transient and the caller
    /// should drop the cursor and open a fresh one.
    async fn poll_next(&mut self) -> Result<Option<Item>>;
}
