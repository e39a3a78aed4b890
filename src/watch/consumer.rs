//! Control-event queues and the consumers that drain them into the pair
//! manager.

use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::manager::{PairManager, StartOutcome, StopOutcome};
use super::panic_message;
use crate::error::{Error, Result};
use crate::model::{ControlEvent, TrackedAccount};

/// Receiving end of the `Created` queue.
pub type AddQueue = mpsc::UnboundedReceiver<TrackedAccount>;
/// Receiving end of the `Removed` queue.
pub type RemoveQueue = mpsc::UnboundedReceiver<String>;

/// Routes control events onto the add and remove queues. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ControlSender {
    created: mpsc::UnboundedSender<TrackedAccount>,
    removed: mpsc::UnboundedSender<String>,
}

impl ControlSender {
    pub fn send(&self, event: ControlEvent) -> Result<()> {
        match event {
            ControlEvent::Created(account) => self
                .created
                .send(account)
                .map_err(|_| Error::Other("add queue closed".to_string())),
            ControlEvent::Removed(key) => self
                .removed
                .send(key)
                .map_err(|_| Error::Other("remove queue closed".to_string())),
        }
    }
}

/// Create the two FIFO control queues.
pub fn control_channels() -> (ControlSender, AddQueue, RemoveQueue) {
    let (created, adds) = mpsc::unbounded_channel();
    let (removed, removes) = mpsc::unbounded_channel();
    (ControlSender { created, removed }, adds, removes)
}

/// Wait up to `wait` for the next queued event. `Some(None)` is a timeout;
/// `None` means the queue closed or shutdown fired.
async fn next_event<T>(
    rx: &mut mpsc::UnboundedReceiver<T>,
    shutdown: &CancellationToken,
    wait: Duration,
) -> Option<Option<T>> {
    tokio::select! {
        biased;
        _ = shutdown.cancelled() => None,
        next = tokio::time::timeout(wait, rx.recv()) => match next {
            Ok(Some(event)) => Some(Some(event)),
            Ok(None) => None,
            Err(_) => Some(None),
        },
    }
}

/// Start a pair for every `Created` event until shutdown.
pub async fn run_add_consumer(
    manager: Arc<PairManager>,
    mut queue: AddQueue,
    shutdown: CancellationToken,
    wait: Duration,
) {
    info!("add consumer started");
    while let Some(next) = next_event(&mut queue, &shutdown, wait).await {
        let Some(account) = next else { continue };
        let key = account.key.clone();

        match std::panic::AssertUnwindSafe(manager.start_pair(account))
            .catch_unwind()
            .await
        {
            Ok(StartOutcome::Started { pair_id }) => {
                info!(account = %key, pair = %pair_id, "redditor added")
            }
            Ok(StartOutcome::Replaced { old, pair_id }) => {
                info!(account = %key, %old, pair = %pair_id, "redditor restarted")
            }
            Ok(StartOutcome::AlreadyRunning { .. }) => {
                debug!(account = %key, "redditor already watched")
            }
            Ok(StartOutcome::ShuttingDown) => break,
            Err(panic) => error!(
                account = %key,
                panic = %panic_message(panic.as_ref()),
                "starting pair panicked"
            ),
        }
    }
    info!("add consumer stopped");
}

/// Stop the pair for every `Removed` event until shutdown. Each stop is
/// awaited before the next event is taken.
pub async fn run_remove_consumer(
    manager: Arc<PairManager>,
    mut queue: RemoveQueue,
    shutdown: CancellationToken,
    wait: Duration,
) {
    info!("remove consumer started");
    while let Some(next) = next_event(&mut queue, &shutdown, wait).await {
        let Some(key) = next else { continue };

        match std::panic::AssertUnwindSafe(manager.stop_pair(&key))
            .catch_unwind()
            .await
        {
            Ok(StopOutcome::Stopped(join)) => info!(account = %key, ?join, "redditor removed"),
            Ok(StopOutcome::NotFound) => debug!(account = %key, "redditor was not watched"),
            Err(panic) => error!(
                account = %key,
                panic = %panic_message(panic.as_ref()),
                "stopping pair panicked"
            ),
        }
    }
    info!("remove consumer stopped");
}
