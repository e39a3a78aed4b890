//! Retry wrapper: the poll/backoff state machine one worker runs for one
//! redditor and one item kind.
//!
//! ```text
//! Init -> Streaming -> { Error -> Backoff -> Streaming }* -> Stopped
//! ```
//!
//! Polling failures never escape the worker. Only the pair's cancellation
//! token (a child of the global shutdown token) ends it.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, warn};

use super::WatchContext;
use super::predicate::{PredicateContext, format_message, should_notify};
use crate::error::Error;
use crate::model::{Item, ItemKind, TrackedAccount};
use crate::source::Cursor;
use crate::telemetry::metrics;
use crate::telemetry::watch::record_state_transition;

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Spawned, no cursor yet.
    Init,
    /// Holding a cursor and pulling from it.
    Streaming,
    /// A pull failed; the cursor is being discarded.
    Error,
    /// Waiting before opening a fresh cursor.
    Backoff,
    /// Cancelled. Terminal.
    Stopped,
}

impl WorkerState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Init => "init",
            WorkerState::Streaming => "streaming",
            WorkerState::Error => "error",
            WorkerState::Backoff => "backoff",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) struct RetryWrapper {
    account: TrackedAccount,
    kind: ItemKind,
    ctx: WatchContext,
    cancel: CancellationToken,
    state: WorkerState,
    state_tx: watch::Sender<WorkerState>,
    span: Span,
}

impl RetryWrapper {
    pub(crate) fn new(
        account: TrackedAccount,
        kind: ItemKind,
        ctx: WatchContext,
        cancel: CancellationToken,
        state_tx: watch::Sender<WorkerState>,
        span: Span,
    ) -> Self {
        Self {
            account,
            kind,
            ctx,
            cancel,
            state: WorkerState::Init,
            state_tx,
            span,
        }
    }

    /// Run until cancelled.
    pub(crate) async fn run(mut self) {
        let span = self.span.clone();
        async move {
            info!("worker started");
            self.stream_until_cancelled().await;
            self.transition(WorkerState::Stopped);
            info!("worker stopped");
        }
        .instrument(span)
        .await
    }

    async fn stream_until_cancelled(&mut self) {
        loop {
            let Some(opened) = self.cancellable(self.open_cursor()).await else {
                return;
            };
            let mut cursor = match opened {
                Ok(cursor) => cursor,
                Err(e) => {
                    if !self.recover(e).await {
                        return;
                    }
                    continue;
                }
            };
            self.transition(WorkerState::Streaming);

            match self.stream(cursor.as_mut()).await {
                // Cancelled while streaming.
                None => return,
                Some(e) => {
                    drop(cursor);
                    if !self.recover(e).await {
                        return;
                    }
                }
            }
        }
    }

    async fn open_cursor(&self) -> crate::error::Result<Box<dyn Cursor>> {
        self.ctx
            .source
            .open_cursor(self.kind, &self.account.key)
            .await
    }

    /// Pull from `cursor` until it fails (returns the error) or the worker is
    /// cancelled (returns `None`).
    async fn stream(&mut self, cursor: &mut dyn Cursor) -> Option<Error> {
        loop {
            match self.cancellable(cursor.poll_next()).await? {
                Ok(Some(item)) => {
                    metrics::items_polled().add(1, &[KeyValue::new("kind", self.kind.as_str())]);
                    // A delivery still in flight when the pair is stopped is dropped.
                    self.cancellable(self.handle_item(&item)).await?;
                }
                Ok(None) => {}
                Err(e) => return Some(e),
            }
            if !self.sleep(self.ctx.config.poll_interval).await {
                return None;
            }
        }
    }

    /// Error -> Backoff. Returns `false` if cancelled during the backoff.
    async fn recover(&mut self, err: Error) -> bool {
        self.transition(WorkerState::Error);
        warn!(error = %err, "polling failed; backing off");
        metrics::poll_errors().add(1, &[KeyValue::new("kind", self.kind.as_str())]);

        self.transition(WorkerState::Backoff);
        self.sleep(self.ctx.config.backoff_interval).await
    }

    async fn handle_item(&self, item: &Item) {
        debug!(item = item.id(), subreddit = item.subreddit(), "received item");

        let muted = match self.ctx.registry.is_muted(&self.account.key).await {
            Ok(muted) => muted,
            Err(e) => {
                warn!(item = item.id(), error = %e, "mute check failed; skipping item");
                return;
            }
        };
        let predicate = PredicateContext {
            watched: &self.ctx.config.watched_subreddits,
            muted,
            now: Utc::now(),
            window: self.ctx.config.recency_window,
        };
        if !should_notify(item, &predicate) {
            return;
        }

        let message = format_message(&self.account, item);
        let deliveries = match self.ctx.broadcast(&message).await {
            Ok(deliveries) => deliveries,
            Err(e) => {
                warn!(item = item.id(), error = %e, "could not load destinations");
                return;
            }
        };
        for delivery in &deliveries {
            let result = if delivery.is_ok() { "ok" } else { "error" };
            metrics::notifications_delivered().add(
                1,
                &[
                    KeyValue::new("kind", self.kind.as_str()),
                    KeyValue::new("result", result),
                ],
            );
        }
        info!(item = item.id(), chats = deliveries.len(), "notification sent");
    }

    /// Sleep for `duration`. Returns `false` if cancelled first.
    async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Race `fut` against cancellation. `None` means cancelled.
    async fn cancellable<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn transition(&mut self, to: WorkerState) {
        if self.state == to {
            return;
        }
        record_state_transition(&self.span, self.state.as_str(), to.as_str());
        self.state = to;
        self.state_tx.send_replace(to);
    }
}
