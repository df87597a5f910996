//! The Delayed Publisher: the stateful heart of the engine.
//!
//! Consumes `(key, value)` change events from the lookup table, maintains the
//! key-index/time-index via an [`IndexStore`], and decides which keys to
//! republish on each wall-clock scan. The scan itself follows a simple
//! polling shape: iterate store state, act on due items, log and skip on a
//! per-item miss rather than aborting the sweep.

use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::parse_instant_millis;
use crate::error::Result;
use crate::model::read_policy;
use crate::store::IndexStore;

/// A key paired with the value the Delayed Publisher wants re-ingested.
pub type Republish = (String, Value);

/// The Delayed Publisher's per-event and per-scan logic, parameterized over
/// an [`IndexStore`] implementation.
pub struct DelayedPublisher<S> {
    store: S,
}

impl<S: IndexStore> DelayedPublisher<S> {
    /// Wrap an index store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Borrow the underlying store (used by the pipeline for lookup reads).
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Mutably borrow the underlying store.
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Apply the register/re-register/cancel decision table for a normalized
    /// `(key, value)` event observed at `now_millis`. A `None` value is a
    /// tombstone.
    pub fn on_event(&mut self, key: &str, value: Option<&Value>, now_millis: i64) -> Result<()> {
        let Some(value) = value else {
            debug!(key, "tombstone input: cancelling any deadline");
            return self.store.cancel_deadline(key);
        };

        let policy = read_policy(value);
        let future_deadline = policy
            .private
            .then_some(policy.until)
            .flatten()
            .and_then(parse_instant_millis)
            .filter(|&t| t > now_millis);

        match future_deadline {
            None => {
                // Not private, or private with no/past/unparseable `until`: cancel.
                let had_deadline = self.store.get_deadline(key)?.is_some();
                debug!(key, is_private = policy.private, "cancelling any deadline");
                self.store.cancel_deadline(key)?;
                if had_deadline {
                    crate::metrics::record_deadline_cancelled();
                }
                Ok(())
            }
            Some(new_t) => {
                let old = self.store.get_deadline(key)?;
                match old {
                    Some(old_t) if old_t == new_t => {
                        // No-op: same deadline already registered.
                        Ok(())
                    }
                    Some(_old_t) => {
                        debug!(key, new_t, "re-registering deadline");
                        self.store.cancel_deadline(key)?;
                        self.store.register_deadline(key, new_t)?;
                        crate::metrics::record_deadline_registered();
                        Ok(())
                    }
                    None => {
                        debug!(key, new_t, "registering new deadline");
                        self.store.register_deadline(key, new_t)?;
                        crate::metrics::record_deadline_registered();
                        Ok(())
                    }
                }
            }
        }
    }

    /// Fire a wall-clock scan at `now_millis`: walk due buckets in ascending
    /// order, republishing each key whose lookup entry is still present.
    ///
    /// Returns the `(key, value)` pairs to feed back into the input stream,
    /// in the order they should be re-ingested (ascending by deadline, then
    /// append order within a bucket).
    pub fn scan(&mut self, now_millis: i64) -> Result<Vec<Republish>> {
        let due = self.store.due_buckets(now_millis)?;
        let mut republishes = Vec::new();

        for (deadline, keys_in_bucket) in due {
            let retired = self.store.retire_bucket(deadline)?;
            debug_assert_eq!(retired, keys_in_bucket, "due_buckets/retire_bucket disagree");

            for key in retired {
                match self.store.get_lookup(&key)? {
                    Some(value) => republishes.push((key, value)),
                    None => {
                        warn!(key, deadline, "missing lookup entry at scan time, dropping key");
                    }
                }
            }
        }

        crate::metrics::record_scan(republishes.len());
        Ok(republishes)
    }
}
