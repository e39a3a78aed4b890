//! Worker span helpers.
//!
//! Provides span creation and state-transition recording for the polling
//! workers of each tracked redditor.

use tracing::Span;
use uuid::Uuid;

/// Start a span covering one worker's lifetime.
pub fn start_worker_span(account: &str, kind: &str, pair_id: &Uuid) -> Span {
    tracing::info_span!(
        "watch.worker",
        "watch.account" = account,
        "watch.kind" = kind,
        "watch.pair" = %pair_id,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
