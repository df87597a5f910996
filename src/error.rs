//! Error taxonomy for the deferred-publication engine.
//!
//! Malformed bodies and missing lookup entries at scan time are soft
//! conditions handled inline and logged, never returned as an `Err` — the
//! only failure surfaced to callers is a backing-store failure, which is
//! fatal to the owning partition.

/// Result type used throughout this crate's library surface.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the core engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backing store failed. Fatal to the owning partition.
    #[error("index store failure: {0}")]
    Store(#[from] StoreError),
}

/// Lower-level store failures, wrapped by [`Error::Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A SQLite-backed store hit a `rusqlite` error.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// An index invariant was violated in a way the store itself detected
    /// (e.g. a bucket was found empty but not deleted).
    #[error("index invariant violated: {0}")]
    InvariantViolation(String),
}
