//! Metric instrument factories for wsbwatch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"wsbwatch"` meter.

use opentelemetry::metrics::{Counter, Meter, UpDownCounter};

/// Returns the shared meter for wsbwatch instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("wsbwatch")
}

/// Counter: items yielded by cursors.
/// Labels: `kind` ("submission" | "comment").
pub fn items_polled() -> Counter<u64> {
    meter()
        .u64_counter("wsbwatch.items.polled")
        .with_description("Number of new items pulled from the polling source")
        .build()
}

/// Counter: notification deliveries.
/// Labels: `kind`, `result` ("ok" | "error").
pub fn notifications_delivered() -> Counter<u64> {
    meter()
        .u64_counter("wsbwatch.notifications.delivered")
        .with_description("Number of per-chat notification deliveries")
        .build()
}

/// Counter: polling failures that sent a worker into backoff.
/// Labels: `kind`.
pub fn poll_errors() -> Counter<u64> {
    meter()
        .u64_counter("wsbwatch.poll.errors")
        .with_description("Number of polling source failures")
        .build()
}

/// Up/down counter: live worker pairs.
pub fn live_pairs() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("wsbwatch.pairs.live")
        .with_description("Number of live worker pairs")
        .build()
}

/// Counter: registry operations.
/// Labels: `operation`.
pub fn registry_operations() -> Counter<u64> {
    meter()
        .u64_counter("wsbwatch.registry.operations")
        .with_description("Number of account registry operations")
        .build()
}
