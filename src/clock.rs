//! Wall-clock abstraction.
//!
//! Production code drives the Delayed Publisher's scan off [`SystemClock`];
//! tests drive it off [`ManualClock`], which only moves forward and never
//! touches real time, so deadline-elapsing behavior can be exercised
//! deterministically without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// A source of the current wall-clock time, in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// The current time, in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;
}

/// Real wall-clock time via `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// A deterministic, advance-only clock for tests.
///
/// # Determinism contract
/// - `now_millis()` never reads system time.
/// - `advance_by`/`advance_to` only move forward; moving backward panics,
///   since nothing in this engine should ever need to rewind time.
#[derive(Debug)]
pub struct ManualClock {
    current_millis: AtomicI64,
}

impl ManualClock {
    /// Create a clock starting at the given epoch-millis instant.
    pub fn new(start_millis: i64) -> Self {
        Self {
            current_millis: AtomicI64::new(start_millis),
        }
    }

    /// Advance the clock by `delta_millis` (must be non-negative).
    pub fn advance_by(&self, delta_millis: i64) {
        assert!(delta_millis >= 0, "ManualClock: delta must be non-negative");
        self.current_millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Advance the clock to an absolute instant. Panics if it would move
    /// backward.
    pub fn advance_to(&self, new_millis: i64) {
        let prev = self.current_millis.swap(new_millis, Ordering::SeqCst);
        assert!(
            new_millis >= prev,
            "ManualClock: cannot go backward from {prev} to {new_millis}"
        );
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_millis(&self) -> i64 {
        self.current_millis.load(Ordering::SeqCst)
    }
}

/// Parse an RFC3339/ISO-8601 instant string to epoch milliseconds.
///
/// Returns `None` on any parse failure — callers treat this the same as an
/// absent `until`, cancelling any pending deadline rather than registering one.
pub fn parse_instant_millis(s: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance_by(500);
        assert_eq!(clock.now_millis(), 1_500);
        clock.advance_to(10_000);
        assert_eq!(clock.now_millis(), 10_000);
    }

    #[test]
    #[should_panic(expected = "cannot go backward")]
    fn manual_clock_rejects_backward_advance_to() {
        let clock = ManualClock::new(1_000);
        clock.advance_to(500);
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        assert_eq!(
            parse_instant_millis("2026-01-01T00:00:00Z"),
            Some(1_767_225_600_000)
        );
        assert!(parse_instant_millis("not a date").is_none());
    }
}
