//! Wires the Normalizer, Lookup Table, Delayed Publisher, and
//! Publishing-Aware Emitter into the single entry point the rest of this
//! crate drives: [`Pipeline::ingest`].
//!
//! Each partition is single-threaded, so the fan-out to the Delayed
//! Publisher and the emitter is a direct in-process call rather than a
//! broadcast to independent subscribers: one `ingest` drives the
//! lookup-table update, the Delayed Publisher's decision table, and the
//! emitter, in that order, without yielding.

use std::sync::Arc;

use serde_json::Value;
use tracing::trace;

use crate::clock::Clock;
use crate::delayed_publisher::DelayedPublisher;
use crate::emitter;
use crate::error::Result;
use crate::model::normalize;
use crate::store::IndexStore;

/// One change event as the emitter sees it: the key and the (possibly
/// tombstoned) output value.
pub type OutputEvent = (String, Option<Value>);

/// The assembled processor for one partition.
pub struct Pipeline<S> {
    delayed_publisher: DelayedPublisher<S>,
    clock: Arc<dyn Clock>,
}

impl<S: IndexStore> Pipeline<S> {
    /// Build a pipeline over `store`, driven by `clock`.
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            delayed_publisher: DelayedPublisher::new(store),
            clock,
        }
    }

    /// Ingest one `(key, value)` input event. This is the single entry point
    /// for both externally-produced events and events the Delayed Publisher
    /// re-emits through its loopback — both paths go through the Normalizer
    /// and the Lookup Table exactly once.
    ///
    /// Returns the event the Publishing-Aware Emitter produces for this
    /// update (the system's output stream).
    pub fn ingest(&mut self, key: &str, value: Option<Value>) -> Result<Option<Value>> {
        let normalized = value.map(normalize);

        match &normalized {
            Some(v) => self.delayed_publisher.store_mut().put_lookup(key, v)?,
            None => self.delayed_publisher.store_mut().delete_lookup(key)?,
        }

        let now = self.clock.now_millis();
        self.delayed_publisher.on_event(key, normalized.as_ref(), now)?;

        Ok(emitter::emit(normalized.as_ref(), now))
    }

    /// Fire the wall-clock scan and re-ingest every key whose deadline has
    /// elapsed, returning the emitter's output for each republish, in the
    /// order the republishes occurred.
    ///
    /// Each republish re-enters [`Pipeline::ingest`] exactly once — the
    /// decision table's own past-deadline Cancel rule stops it from
    /// registering a new deadline and looping, so no recursion-depth guard is
    /// needed beyond this single re-entry per republished key.
    pub fn scan_now(&mut self) -> Result<Vec<OutputEvent>> {
        let now = self.clock.now_millis();
        let republishes = self.delayed_publisher.scan(now)?;

        let mut outputs = Vec::with_capacity(republishes.len());
        for (key, value) in republishes {
            trace!(key, "republishing via loopback");
            let output = self.ingest(&key, Some(value))?;
            outputs.push((key, output));
        }

        crate::metrics::set_deadlines_active(self.active_deadline_count(now));
        Ok(outputs)
    }

    /// Read the materialized view for `key`.
    pub fn lookup(&self, key: &str) -> Result<Option<Value>> {
        self.delayed_publisher.store().get_lookup(key)
    }

    /// Count of deadlines still pending, for the metrics gauge (a cheap,
    /// approximate read — it walks every registered bucket, which is fine at
    /// the cadence metrics are sampled on, not on the hot event path).
    fn active_deadline_count(&self, _now_millis: i64) -> u64 {
        // i64::MAX millis is far beyond any real deadline; due_buckets
        // returns everything with deadline <= it, i.e. every bucket still
        // registered.
        self.delayed_publisher
            .store()
            .due_buckets(i64::MAX)
            .map(|buckets| buckets.into_iter().map(|(_, keys)| keys.len() as u64).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryIndexStore;
    use serde_json::json;

    fn pipeline_at(start_millis: i64) -> (Pipeline<MemoryIndexStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start_millis));
        let pipeline = Pipeline::new(MemoryIndexStore::new(), clock.clone());
        (pipeline, clock)
    }

    #[test]
    fn non_private_record_passes_through() {
        let (mut p, _clock) = pipeline_at(0);
        let out = p
            .ingest("A", Some(json!({"publishing": {"private": false}})))
            .unwrap();
        assert_eq!(out, Some(json!({"publishing": {"private": false}})));
    }

    #[test]
    fn private_record_emits_tombstone() {
        let (mut p, _clock) = pipeline_at(0);
        let out = p
            .ingest("A", Some(json!({"publishing": {"private": true}})))
            .unwrap();
        assert_eq!(out, None);
        assert_eq!(
            p.lookup("A").unwrap(),
            Some(json!({"publishing": {"private": true}}))
        );
    }

    #[test]
    fn null_input_tombstones_lookup_and_output() {
        let (mut p, _clock) = pipeline_at(0);
        p.ingest("A", Some(json!({"publishing": {"private": true}})))
            .unwrap();
        let out = p.ingest("A", None).unwrap();
        assert_eq!(out, None);
        assert_eq!(p.lookup("A").unwrap(), None);
    }

    #[test]
    fn scan_republishes_after_deadline_elapses() {
        let (mut p, clock) = pipeline_at(0);
        p.ingest(
            "A",
            Some(json!({"publishing": {"private": true, "until": "1970-01-01T00:00:06Z"}})),
        )
        .unwrap();

        clock.advance_to(8_000);
        let outputs = p.scan_now().unwrap();
        assert_eq!(
            outputs,
            vec![(
                "A".to_string(),
                Some(json!({"publishing": {"private": true, "until": "1970-01-01T00:00:06Z"}}))
            )]
        );
    }
}
