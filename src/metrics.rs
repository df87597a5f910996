//! A handful of `metrics` counters/gauges for the engine, scoped to what an
//! operator of this specific system would want — not a general framework.
//! The recorder (Prometheus) is installed once at process startup in
//! `main.rs`; these calls are no-ops until that happens.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions once at startup.
pub fn describe() {
    describe_counter!(
        "deferred_publish_deadlines_registered_total",
        "Deadlines registered or re-registered by the Delayed Publisher"
    );
    describe_counter!(
        "deferred_publish_deadlines_cancelled_total",
        "Deadlines cancelled (superseded, made non-private, or already past)"
    );
    describe_counter!(
        "deferred_publish_republishes_total",
        "Records re-emitted into the input stream after their deadline elapsed"
    );
    describe_counter!(
        "deferred_publish_scan_ticks_total",
        "Wall-clock scan ticks fired"
    );
    describe_gauge!(
        "deferred_publish_deadlines_active",
        "Deadlines currently pending in the time-index"
    );
}

/// Record a scan tick firing, with the number of keys republished.
pub fn record_scan(republished: usize) {
    counter!("deferred_publish_scan_ticks_total").increment(1);
    if republished > 0 {
        counter!("deferred_publish_republishes_total").increment(republished as u64);
    }
}

/// Record a deadline registration (fresh or re-registered).
pub fn record_deadline_registered() {
    counter!("deferred_publish_deadlines_registered_total").increment(1);
}

/// Record a deadline cancellation.
pub fn record_deadline_cancelled() {
    counter!("deferred_publish_deadlines_cancelled_total").increment(1);
}

/// Set the current count of active (pending) deadlines.
pub fn set_deadlines_active(count: u64) {
    gauge!("deferred_publish_deadlines_active").set(count as f64);
}
