//! Watch engine: worker pairs per tracked redditor, the control-event
//! consumers that add and remove them, and graceful shutdown.

pub mod consumer;
pub mod manager;
pub mod pair;
pub mod predicate;
pub mod shutdown;
pub mod worker;

pub use consumer::{AddQueue, ControlSender, RemoveQueue, control_channels};
pub use manager::{PairManager, StartOutcome, StopOutcome};
pub use pair::{JoinOutcome, PairJoin, WorkerHandle, WorkerPair};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use worker::WorkerState;

use std::any::Any;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::default_subreddits;
use crate::error::Result;
use crate::registry::AccountRegistry;
use crate::sink::{Delivery, NotificationSink};
use crate::source::PollingSource;

/// Timing and filtering knobs for the watch engine.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Pause after every pull from a cursor.
    pub poll_interval: Duration,
    /// Pause after a polling failure before opening a fresh cursor.
    pub backoff_interval: Duration,
    /// Longest a consumer waits on its queue before looping.
    pub queue_wait: Duration,
    /// Items older than this are never notified.
    pub recency_window: chrono::Duration,
    /// Longest shutdown waits for any single task before aborting it.
    pub join_timeout: Duration,
    /// Subreddits whose items are notified. Lowercase.
    pub watched_subreddits: BTreeSet<String>,
    /// Local hour at which the daily liveness message goes out.
    pub liveness_hour: u32,
    /// How often the supervisor checks whether the liveness message is due.
    pub liveness_check: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            backoff_interval: Duration::from_secs(10),
            queue_wait: Duration::from_secs(10),
            recency_window: chrono::Duration::hours(24),
            join_timeout: Duration::from_secs(10),
            watched_subreddits: default_subreddits(),
            liveness_hour: 22,
            liveness_check: Duration::from_secs(60),
        }
    }
}

/// Collaborators shared by every worker, consumer and the coordinator.
#[derive(Clone)]
pub struct WatchContext {
    pub source: Arc<dyn PollingSource>,
    pub sink: Arc<dyn NotificationSink>,
    pub registry: Arc<dyn AccountRegistry>,
    pub config: Arc<WatchConfig>,
}

impl WatchContext {
    pub fn new(
        source: Arc<dyn PollingSource>,
        sink: Arc<dyn NotificationSink>,
        registry: Arc<dyn AccountRegistry>,
        config: WatchConfig,
    ) -> Self {
        Self {
            source,
            sink,
            registry,
            config: Arc::new(config),
        }
    }

    /// Deliver `message` to every registered chat.
    pub async fn broadcast(&self, message: &str) -> Result<Vec<Delivery>> {
        let destinations = self.registry.destinations().await?;
        Ok(self.sink.deliver(message, &destinations).await)
    }
}

/// The running watch engine: the pair manager, both consumers, and the
/// coordinator that tears everything down.
pub struct Watcher {
    ctx: WatchContext,
    manager: Arc<PairManager>,
    control: ControlSender,
    coordinator: ShutdownCoordinator,
}

impl Watcher {
    /// Spawn the add and remove consumers. Pairs are started separately via
    /// [`Watcher::start_tracked`] or control events.
    pub fn start(ctx: WatchContext, shutdown: CancellationToken) -> Self {
        let manager = Arc::new(PairManager::new(ctx.clone(), shutdown.clone()));
        let (control, adds, removes) = control_channels();
        let queue_wait = ctx.config.queue_wait;

        let mut coordinator = ShutdownCoordinator::new(shutdown.clone(), manager.clone(), ctx.clone());
        coordinator.track(
            "add-consumer",
            tokio::spawn(consumer::run_add_consumer(
                manager.clone(),
                adds,
                shutdown.clone(),
                queue_wait,
            )),
        );
        coordinator.track(
            "remove-consumer",
            tokio::spawn(consumer::run_remove_consumer(
                manager.clone(),
                removes,
                shutdown,
                queue_wait,
            )),
        );

        Self {
            ctx,
            manager,
            control,
            coordinator,
        }
    }

    /// Handle for emitting control events.
    pub fn control(&self) -> ControlSender {
        self.control.clone()
    }

    pub fn manager(&self) -> Arc<PairManager> {
        self.manager.clone()
    }

    /// Register another long-lived control task to be joined on shutdown.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.coordinator.track(name, handle);
    }

    /// Start a pair for every account in the registry. Returns how many
    /// pairs were started.
    pub async fn start_tracked(&self) -> Result<usize> {
        let accounts = self.ctx.registry.list_tracked().await?;
        let mut started = 0;
        for account in accounts {
            if matches!(
                self.manager.start_pair(account).await,
                StartOutcome::Started { .. } | StartOutcome::Replaced { .. }
            ) {
                started += 1;
            }
        }
        info!(started, "tracked redditors started");
        Ok(started)
    }

    /// Block until the shutdown token fires, then join everything.
    pub async fn run_until_stopped(self) -> ShutdownReport {
        self.coordinator.run().await
    }
}

/// Wait up to `timeout` for `handle`, then abort it and wait for the abort
/// to land.
pub(crate) async fn join_with_timeout(
    name: &str,
    mut handle: JoinHandle<()>,
    timeout: Duration,
) -> JoinOutcome {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => JoinOutcome::Joined,
        Ok(Err(err)) => {
            warn!(task = name, error = %err, "task ended abnormally");
            JoinOutcome::Joined
        }
        Err(_) => {
            handle.abort();
            // Wait for the abort to land.
            let _ = handle.await;
            warn!(task = name, ?timeout, "task did not terminate in time; aborted");
            JoinOutcome::TimedOut
        }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SetOnDrop(Arc<AtomicBool>);

    impl Drop for SetOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_task_is_aborted_and_gone_on_return() {
        let dropped = Arc::new(AtomicBool::new(false));
        let guard = SetOnDrop(dropped.clone());
        let handle = tokio::spawn(async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        });

        let began = tokio::time::Instant::now();
        let outcome = join_with_timeout("stuck", handle, Duration::from_secs(3)).await;

        assert_eq!(outcome, JoinOutcome::TimedOut);
        assert!(began.elapsed() >= Duration::from_secs(3));
        assert!(began.elapsed() < Duration::from_secs(4));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn finished_task_joins() {
        let handle = tokio::spawn(async {});
        assert_eq!(
            join_with_timeout("quick", handle, Duration::from_secs(3)).await,
            JoinOutcome::Joined
        );
    }

    #[test]
    fn panic_payloads_render() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&7_u8), "unknown panic payload");
    }
}
