//! Metric instrument factories for taskscale.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"taskscale"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

/// Returns the shared meter for taskscale instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("taskscale")
}

/// Counter: work item status transitions performed by workers.
/// Labels: `from`, `to`.
pub fn work_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("taskscale.work.state_transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: store-level operations (submit, claim, complete, count).
/// Labels: `store`, `operation`.
pub fn store_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskscale.store.operations")
        .with_description("Number of work item store operations")
        .build()
}

/// Counter: store calls that failed and will be retried.
/// Labels: `operation`.
pub fn store_errors() -> Counter<u64> {
    meter()
        .u64_counter("taskscale.store.errors")
        .with_description("Number of failed store operations")
        .build()
}

/// Histogram: time spent processing one work item, in milliseconds.
pub fn processing_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskscale.work.processing_ms")
        .with_description("Work item processing duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Up/down counter: live worker handles in the pool.
pub fn active_workers() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("taskscale.pool.active_workers")
        .with_description("Number of registered workers")
        .build()
}

/// Counter: scale operations.
/// Labels: `direction` ("up" | "down"), `result` ("ok" | "timeout" | "at_limit").
pub fn scale_events() -> Counter<u64> {
    meter()
        .u64_counter("taskscale.pool.scale_events")
        .with_description("Number of pool scale operations")
        .build()
}

/// Counter: completion notifications that failed.
pub fn notification_failures() -> Counter<u64> {
    meter()
        .u64_counter("taskscale.notify.failures")
        .with_description("Completion notifications that could not be delivered")
        .build()
}
