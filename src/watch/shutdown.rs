//! Shutdown coordination: the supervisory loop, OS signal handling, and the
//! ordered, bounded join of control tasks and worker pairs.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Timelike};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::pair::JoinOutcome;
use super::{PairManager, WatchContext, join_with_timeout};

pub const LIVENESS_MESSAGE: &str = "🕒Still running hihi🏃‍♂️‍➡️";
pub const SHUTDOWN_MESSAGE: &str = "shutting down⛔";

/// What the final join sequence observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Control tasks (update poller, consumers) that exited.
    pub control_joined: usize,
    /// Control tasks aborted at the join timeout.
    pub control_timed_out: usize,
    /// Worker pairs still live when shutdown began.
    pub pairs: usize,
    pub workers_joined: usize,
    pub workers_timed_out: usize,
}

impl ShutdownReport {
    /// Every task exited on its own.
    pub fn is_clean(&self) -> bool {
        self.control_timed_out == 0 && self.workers_timed_out == 0
    }
}

/// Fires once per day during a fixed local hour.
#[derive(Debug, Clone)]
pub struct LivenessSchedule {
    hour: u32,
    last_sent: Option<NaiveDate>,
}

impl LivenessSchedule {
    pub fn new(hour: u32) -> Self {
        Self {
            hour,
            last_sent: None,
        }
    }

    /// Is a liveness message due at `now`? Marks it sent if so.
    pub fn due<Tz: TimeZone>(&mut self, now: DateTime<Tz>) -> bool {
        let today = now.date_naive();
        if now.hour() != self.hour || self.last_sent == Some(today) {
            return false;
        }
        self.last_sent = Some(today);
        true
    }
}

/// Owns the global stop token and everything that must be joined when it
/// fires.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    manager: Arc<PairManager>,
    ctx: WatchContext,
    control_tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken, manager: Arc<PairManager>, ctx: WatchContext) -> Self {
        Self {
            token,
            manager,
            ctx,
            control_tasks: Vec::new(),
        }
    }

    /// Register a control task. Control tasks are joined, in registration
    /// order, before any worker pair, each bounded by twice the worker join
    /// timeout.
    pub fn track(&mut self, name: &'static str, handle: JoinHandle<()>) {
        self.control_tasks.push((name, handle));
    }

    /// Supervise until the token is cancelled, then join everything.
    pub async fn run(mut self) -> ShutdownReport {
        let config = self.ctx.config.clone();
        let mut schedule = LivenessSchedule::new(config.liveness_hour);
        let mut tick = tokio::time::interval(config.liveness_check);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => break,
                _ = tick.tick() => {
                    if schedule.due(Local::now()) {
                        self.notify(LIVENESS_MESSAGE).await;
                    }
                }
            }
        }

        info!("shutdown requested; joining control tasks");
        let mut report = ShutdownReport::default();
        // A remove consumer may be inside its own bounded pair join.
        let control_timeout = config.join_timeout * 2;
        for (name, handle) in std::mem::take(&mut self.control_tasks) {
            match join_with_timeout(name, handle, control_timeout).await {
                JoinOutcome::Joined => report.control_joined += 1,
                JoinOutcome::TimedOut => report.control_timed_out += 1,
            }
        }

        info!("joining worker pairs");
        let pairs = self.manager.shutdown().await;
        report.pairs = pairs.pairs;
        report.workers_joined = pairs.workers_joined;
        report.workers_timed_out = pairs.workers_timed_out;

        if report.is_clean() {
            info!(?report, "all tasks joined");
        } else {
            warn!(?report, "some tasks did not terminate and were aborted");
        }

        self.notify(SHUTDOWN_MESSAGE).await;
        report
    }

    async fn notify(&self, message: &str) {
        if let Err(e) = self.ctx.broadcast(message).await {
            warn!(error = %e, "status notification failed");
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM.
pub fn cancel_on_signal(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                info!("shutdown signal received");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM; waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn liveness_fires_once_per_day_in_its_hour() {
        let mut schedule = LivenessSchedule::new(22);
        let at = |d: u32, h: u32, m: u32| Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap();

        assert!(!schedule.due(at(1, 21, 59)));
        assert!(schedule.due(at(1, 22, 0)));
        assert!(!schedule.due(at(1, 22, 30)));
        assert!(!schedule.due(at(1, 23, 0)));
        assert!(schedule.due(at(2, 22, 1)));
    }

    #[test]
    fn report_is_clean_without_timeouts() {
        let mut report = ShutdownReport {
            control_joined: 3,
            pairs: 2,
            workers_joined: 4,
            ..Default::default()
        };
        assert!(report.is_clean());
        report.workers_timed_out = 1;
        assert!(!report.is_clean());
    }
}
