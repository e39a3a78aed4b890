//! Worker pairs: the submission and comment workers of one redditor,
//! sharing one cancellation token.

use futures::FutureExt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;
use uuid::Uuid;

use super::worker::{RetryWrapper, WorkerState};
use super::{WatchContext, join_with_timeout, panic_message};
use crate::model::{ItemKind, TrackedAccount};
use crate::telemetry::watch::start_worker_span;

/// How a join attempt on one worker ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// The deadline passed and the task was aborted.
    TimedOut,
}

/// Join results for both workers of a pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PairJoin {
    pub joined: usize,
    pub timed_out: usize,
}

impl PairJoin {
    fn record(&mut self, outcome: JoinOutcome) {
        match outcome {
            JoinOutcome::Joined => self.joined += 1,
            JoinOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

/// A spawned worker running the retry wrapper for one item kind.
pub struct WorkerHandle {
    kind: ItemKind,
    task: JoinHandle<()>,
    state: watch::Receiver<WorkerState>,
}

impl WorkerHandle {
    fn spawn(
        account: TrackedAccount,
        kind: ItemKind,
        pair_id: Uuid,
        ctx: WatchContext,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, state) = watch::channel(WorkerState::Init);
        let span = start_worker_span(&account.key, kind.as_str(), &pair_id);
        let key = account.key.clone();
        let panic_state = state_tx.clone();
        let wrapper = RetryWrapper::new(account, kind, ctx, cancel, state_tx, span);

        let task = tokio::spawn(async move {
            let result = std::panic::AssertUnwindSafe(wrapper.run())
                .catch_unwind()
                .await;
            if let Err(payload) = result {
                error!(
                    account = %key,
                    kind = kind.as_str(),
                    panic = %panic_message(payload.as_ref()),
                    "worker panicked"
                );
                panic_state.send_replace(WorkerState::Stopped);
            }
        });

        Self { kind, task, state }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Last state the worker reported.
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver for observing state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    async fn join(self, account: &str, timeout: Duration) -> JoinOutcome {
        let name = format!("{account}/{}", self.kind);
        join_with_timeout(&name, self.task, timeout).await
    }
}

/// The two workers watching one redditor.
pub struct WorkerPair {
    id: Uuid,
    account: TrackedAccount,
    cancel: CancellationToken,
    workers: [WorkerHandle; 2],
}

impl WorkerPair {
    /// Spawn both workers under a fresh child of `parent`.
    pub(crate) fn spawn(
        account: TrackedAccount,
        ctx: &WatchContext,
        parent: &CancellationToken,
    ) -> Self {
        let id = Uuid::new_v4();
        let cancel = parent.child_token();
        let workers = ItemKind::ALL.map(|kind| {
            WorkerHandle::spawn(account.clone(), kind, id, ctx.clone(), cancel.clone())
        });
        Self {
            id,
            account,
            cancel,
            workers,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.account.key
    }

    pub fn account(&self) -> &TrackedAccount {
        &self.account
    }

    pub fn workers(&self) -> &[WorkerHandle; 2] {
        &self.workers
    }

    /// Both workers are still running.
    pub fn is_healthy(&self) -> bool {
        !self.cancel.is_cancelled() && self.workers.iter().all(|w| !w.is_finished())
    }

    /// Request both workers to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for both workers, giving each up to `timeout`.
    pub async fn stop(self, timeout: Duration) -> PairJoin {
        self.cancel.cancel();
        let key = self.account.key;
        let outcomes =
            futures::future::join_all(self.workers.map(|w| w.join(&key, timeout))).await;

        let mut join = PairJoin::default();
        for outcome in outcomes {
            join.record(outcome);
        }
        join
    }
}
