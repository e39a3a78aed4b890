//! Worker pair manager: owns the live set of pairs keyed by redditor.
//!
//! Every lookup and mutation holds the same async mutex, including the join
//! in [`PairManager::stop_pair`], so a key never has two live pairs and a
//! removed key's workers are gone by the time the lock is released.

use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::pair::{PairJoin, WorkerPair};
use super::worker::WorkerState;
use super::{ShutdownReport, WatchContext};
use crate::model::{ItemKind, TrackedAccount};
use crate::telemetry::metrics;

/// What [`PairManager::start_pair`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new pair is running.
    Started { pair_id: Uuid },
    /// A healthy pair already runs for the key; nothing was spawned.
    AlreadyRunning { pair_id: Uuid },
    /// The previous pair for the key had lost a worker; it was stopped and a
    /// new one spawned.
    Replaced { old: Uuid, pair_id: Uuid },
    /// Shutdown has begun; nothing was spawned.
    ShuttingDown,
}

/// What [`PairManager::stop_pair`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No pair for the key.
    NotFound,
    Stopped(PairJoin),
}

#[derive(Default)]
struct LiveSet {
    pairs: HashMap<String, WorkerPair>,
    closed: bool,
}

pub struct PairManager {
    ctx: WatchContext,
    shutdown: CancellationToken,
    live: Mutex<LiveSet>,
}

impl PairManager {
    pub fn new(ctx: WatchContext, shutdown: CancellationToken) -> Self {
        Self {
            ctx,
            shutdown,
            live: Mutex::new(LiveSet::default()),
        }
    }

    /// Spawn the submission and comment workers for `account`.
    ///
    /// Starting a key that already has a healthy pair is a no-op. If any
    /// worker of the existing pair has exited, that pair is stopped and
    /// joined under the lock before the new one is spawned.
    pub async fn start_pair(&self, account: TrackedAccount) -> StartOutcome {
        let mut live = self.live.lock().await;
        if live.closed || self.shutdown.is_cancelled() {
            debug!(account = %account.key, "start ignored during shutdown");
            return StartOutcome::ShuttingDown;
        }

        let mut replaced = None;
        if let Some(existing) = live.pairs.get(&account.key) {
            if existing.is_healthy() {
                debug!(account = %account.key, pair = %existing.id(), "pair already running");
                return StartOutcome::AlreadyRunning {
                    pair_id: existing.id(),
                };
            }
            if let Some(stale) = live.pairs.remove(&account.key) {
                let old = stale.id();
                let join = stale.stop(self.ctx.config.join_timeout).await;
                metrics::live_pairs().add(-1, &[]);
                warn!(account = %account.key, pair = %old, ?join, "replacing degraded pair");
                replaced = Some(old);
            }
        }

        let pair = WorkerPair::spawn(account, &self.ctx, &self.shutdown);
        let pair_id = pair.id();
        info!(account = %pair.key(), pair = %pair_id, "pair started");
        live.pairs.insert(pair.key().to_string(), pair);
        metrics::live_pairs().add(1, &[]);

        match replaced {
            Some(old) => StartOutcome::Replaced { old, pair_id },
            None => StartOutcome::Started { pair_id },
        }
    }

    /// Cancel the pair for `key` and wait for both workers to exit.
    ///
    /// Unknown keys are a no-op. Returns only after both workers have
    /// finished or been aborted at the join timeout.
    pub async fn stop_pair(&self, key: &str) -> StopOutcome {
        let mut live = self.live.lock().await;
        let Some(pair) = live.pairs.remove(key) else {
            debug!(account = key, "stop for unknown redditor ignored");
            return StopOutcome::NotFound;
        };

        let pair_id = pair.id();
        let join = pair.stop(self.ctx.config.join_timeout).await;
        metrics::live_pairs().add(-1, &[]);
        drop(live);

        info!(
            account = key,
            pair = %pair_id,
            joined = join.joined,
            timed_out = join.timed_out,
            "pair stopped"
        );
        StopOutcome::Stopped(join)
    }

    /// Refuse further starts, then stop and join every live pair.
    pub async fn shutdown(&self) -> ShutdownReport {
        let mut live = self.live.lock().await;
        live.closed = true;
        let pairs: Vec<WorkerPair> = live.pairs.drain().map(|(_, pair)| pair).collect();
        for pair in &pairs {
            pair.cancel();
        }

        let timeout = self.ctx.config.join_timeout;
        let joins = futures::future::join_all(pairs.into_iter().map(|pair| pair.stop(timeout))).await;
        metrics::live_pairs().add(-(joins.len() as i64), &[]);

        let mut report = ShutdownReport {
            pairs: joins.len(),
            ..ShutdownReport::default()
        };
        for join in joins {
            report.workers_joined += join.joined;
            report.workers_timed_out += join.timed_out;
        }
        report
    }

    /// Keys with a live pair, sorted.
    pub async fn live_keys(&self) -> Vec<String> {
        let live = self.live.lock().await;
        let mut keys: Vec<String> = live.pairs.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of live pairs.
    pub async fn len(&self) -> usize {
        self.live.lock().await.pairs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of worker handles across all live pairs.
    pub async fn worker_count(&self) -> usize {
        let live = self.live.lock().await;
        live.pairs.values().map(|pair| pair.workers().len()).sum()
    }

    /// Current state of each worker of `key`'s pair.
    pub async fn states(&self, key: &str) -> Option<Vec<(ItemKind, WorkerState)>> {
        let live = self.live.lock().await;
        live.pairs.get(key).map(|pair| {
            pair.workers()
                .iter()
                .map(|w| (w.kind(), w.state()))
                .collect()
        })
    }

    /// Observe a worker's state changes.
    pub async fn subscribe(
        &self,
        key: &str,
        kind: ItemKind,
    ) -> Option<tokio::sync::watch::Receiver<WorkerState>> {
        let live = self.live.lock().await;
        live.pairs
            .get(key)?
            .workers()
            .iter()
            .find(|w| w.kind() == kind)
            .map(|w| w.subscribe())
    }
}
