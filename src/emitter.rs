//! The Publishing-Aware Emitter.
//!
//! A pure, stateless transform on the lookup-table change stream: rewrites a
//! record to a tombstone whenever it is still effectively private at the
//! current instant, and passes it through otherwise. No side effects, no
//! failures, no mutation of the stored value — a record that was private
//! when stored and is republished after its deadline elapses is exposed
//! without ever being rewritten.

use serde_json::Value;

use crate::model::read_policy;

/// Apply the publishing-aware emission filter to a single change event,
/// evaluated at `now_millis`.
///
/// Returns `None` for a tombstone (the output value the caller should treat
/// as "suppressed" / "deleted"), `Some(value)` otherwise.
pub fn emit(value: Option<&Value>, now_millis: i64) -> Option<Value> {
    let value = value?;
    if read_policy(value).is_effectively_private(now_millis) {
        None
    } else {
        Some(value.clone())
    }
}
