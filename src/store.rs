//! The three persistent indexes owned by the Delayed Publisher: `lookup`,
//! `key-index`, and `time-index`.
//!
//! [`IndexStore`] names operations by role (register/cancel a deadline, fetch
//! due buckets) rather than exposing raw per-index get/put, so the invariant
//! that every key-index entry has exactly one matching time-index bucket
//! entry is enforced once, in the store, rather than at every call site.
//!
//! [`MemoryIndexStore`] is the default, in-process backing (a `BTreeMap`
//! gives the ordered iteration the scan needs for free). [`SqliteIndexStore`]
//! is the restart-durable alternative: WAL mode, a connection guarded by a
//! `parking_lot::Mutex`, and prepared statements.

use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use serde_json::Value;

use crate::error::{Result, StoreError};

/// The three indexes the Delayed Publisher reads and mutates on every event
/// and scan tick.
pub trait IndexStore: Send {
    /// Fetch the latest normalized value for `key`, if any.
    fn get_lookup(&self, key: &str) -> Result<Option<Value>>;

    /// Store `value` as the latest value for `key`.
    fn put_lookup(&mut self, key: &str, value: &Value) -> Result<()>;

    /// Remove `key` from the materialized view (a tombstone input).
    fn delete_lookup(&mut self, key: &str) -> Result<()>;

    /// The active deadline for `key`, if one is registered.
    fn get_deadline(&self, key: &str) -> Result<Option<i64>>;

    /// Cancel any active deadline for `key`: removes it from `key-index` and
    /// from its `time-index` bucket, deleting the bucket if it becomes empty.
    /// A no-op if `key` has no active deadline.
    fn cancel_deadline(&mut self, key: &str) -> Result<()>;

    /// Register a new deadline for `key` at `deadline_millis`, appending to
    /// the bucket's key list. Callers must cancel any prior deadline for
    /// `key` first — this does not check for one.
    fn register_deadline(&mut self, key: &str, deadline_millis: i64) -> Result<()>;

    /// All buckets with deadline `<= now_millis`, ascending by deadline, each
    /// bucket's keys in the order they were registered. Does not mutate the
    /// store.
    fn due_buckets(&self, now_millis: i64) -> Result<Vec<(i64, Vec<String>)>>;

    /// Retire a bucket after a scan has processed it: deletes the bucket from
    /// `time-index` and the corresponding `key-index` entry for every key it
    /// held, returning those keys in list order.
    ///
    /// Deleting `key-index` unconditionally (not only for keys that were
    /// successfully republished) keeps the two indexes consistent: once a
    /// bucket is gone, nothing should still claim it as an active deadline,
    /// including a key whose `lookup` entry raced away before the scan
    /// could read it.
    fn retire_bucket(&mut self, deadline_millis: i64) -> Result<Vec<String>>;
}

/// In-memory `IndexStore`. The default backing; state is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryIndexStore {
    lookup: HashMap<String, Value>,
    key_index: HashMap<String, i64>,
    time_index: BTreeMap<i64, Vec<String>>,
}

impl MemoryIndexStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexStore for MemoryIndexStore {
    fn get_lookup(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.lookup.get(key).cloned())
    }

    fn put_lookup(&mut self, key: &str, value: &Value) -> Result<()> {
        self.lookup.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn delete_lookup(&mut self, key: &str) -> Result<()> {
        self.lookup.remove(key);
        Ok(())
    }

    fn get_deadline(&self, key: &str) -> Result<Option<i64>> {
        Ok(self.key_index.get(key).copied())
    }

    fn cancel_deadline(&mut self, key: &str) -> Result<()> {
        let Some(old) = self.key_index.remove(key) else {
            return Ok(());
        };
        if let Some(bucket) = self.time_index.get_mut(&old) {
            bucket.retain(|k| k != key);
            if bucket.is_empty() {
                self.time_index.remove(&old);
            }
        }
        Ok(())
    }

    fn register_deadline(&mut self, key: &str, deadline_millis: i64) -> Result<()> {
        self.key_index.insert(key.to_string(), deadline_millis);
        self.time_index
            .entry(deadline_millis)
            .or_default()
            .push(key.to_string());
        Ok(())
    }

    fn due_buckets(&self, now_millis: i64) -> Result<Vec<(i64, Vec<String>)>> {
        Ok(self
            .time_index
            .range(..=now_millis)
            .map(|(t, keys)| (*t, keys.clone()))
            .collect())
    }

    fn retire_bucket(&mut self, deadline_millis: i64) -> Result<Vec<String>> {
        let Some(keys) = self.time_index.remove(&deadline_millis) else {
            return Ok(Vec::new());
        };
        for k in &keys {
            self.key_index.remove(k);
        }
        Ok(keys)
    }
}

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS lookup (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS key_index (
    key TEXT PRIMARY KEY,
    deadline_millis INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS time_index (
    deadline_millis INTEGER NOT NULL,
    seq INTEGER NOT NULL,
    key TEXT NOT NULL,
    PRIMARY KEY (deadline_millis, seq)
);

CREATE INDEX IF NOT EXISTS idx_time_index_deadline ON time_index(deadline_millis);
CREATE INDEX IF NOT EXISTS idx_key_index_deadline ON key_index(deadline_millis);
"#;

/// SQLite-backed `IndexStore` for restart-durable deployments.
///
/// Each mutating operation that touches more than one table runs inside a
/// `BEGIN IMMEDIATE` / `COMMIT` transaction, so no partial write across the
/// `key_index`/`time_index` tables is ever observable.
pub struct SqliteIndexStore {
    conn: Mutex<Connection>,
}

impl SqliteIndexStore {
    /// Open (or create) a SQLite-backed store at `path`, ensuring its schema.
    pub fn open(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(StoreError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// An in-memory SQLite store, for tests exercising the SQLite code path
    /// without touching disk.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(StoreError::from)?;
        conn.execute_batch(SCHEMA_SQL).map_err(StoreError::from)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl IndexStore for SqliteIndexStore {
    fn get_lookup(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        let raw: Option<String> = conn
            .query_row("SELECT value FROM lookup WHERE key = ?1", params![key], |r| r.get(0))
            .ok();
        Ok(match raw {
            Some(raw) => Some(
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::InvariantViolation(e.to_string()))?,
            ),
            None => None,
        })
    }

    fn put_lookup(&mut self, key: &str, value: &Value) -> Result<()> {
        let conn = self.conn.lock();
        let raw = serde_json::to_string(value)
            .map_err(|e| StoreError::InvariantViolation(e.to_string()))?;
        conn.execute(
            "INSERT INTO lookup (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, raw],
        )
        .map_err(StoreError::from)?;
        Ok(())
    }

    fn delete_lookup(&mut self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM lookup WHERE key = ?1", params![key])
            .map_err(StoreError::from)?;
        Ok(())
    }

    fn get_deadline(&self, key: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT deadline_millis FROM key_index WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .ok())
    }

    fn cancel_deadline(&mut self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", []).map_err(StoreError::from)?;
        let deadline: Option<i64> = conn
            .query_row(
                "SELECT deadline_millis FROM key_index WHERE key = ?1",
                params![key],
                |r| r.get(0),
            )
            .ok();
        if let Some(deadline) = deadline {
            conn.execute(
                "DELETE FROM time_index WHERE deadline_millis = ?1 AND key = ?2",
                params![deadline, key],
            )
            .map_err(StoreError::from)?;
            conn.execute("DELETE FROM key_index WHERE key = ?1", params![key])
                .map_err(StoreError::from)?;
        }
        conn.execute("COMMIT", []).map_err(StoreError::from)?;
        Ok(())
    }

    fn register_deadline(&mut self, key: &str, deadline_millis: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", []).map_err(StoreError::from)?;
        conn.execute(
            "INSERT INTO key_index (key, deadline_millis) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET deadline_millis = excluded.deadline_millis",
            params![key, deadline_millis],
        )
        .map_err(StoreError::from)?;
        let next_seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM time_index WHERE deadline_millis = ?1",
                params![deadline_millis],
                |r| r.get(0),
            )
            .map_err(StoreError::from)?;
        conn.execute(
            "INSERT INTO time_index (deadline_millis, seq, key) VALUES (?1, ?2, ?3)",
            params![deadline_millis, next_seq, key],
        )
        .map_err(StoreError::from)?;
        conn.execute("COMMIT", []).map_err(StoreError::from)?;
        Ok(())
    }

    fn due_buckets(&self, now_millis: i64) -> Result<Vec<(i64, Vec<String>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT deadline_millis, key FROM time_index \
                 WHERE deadline_millis <= ?1 ORDER BY deadline_millis ASC, seq ASC",
            )
            .map_err(StoreError::from)?;
        let rows = stmt
            .query_map(params![now_millis], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?))
            })
            .map_err(StoreError::from)?;

        let mut buckets: Vec<(i64, Vec<String>)> = Vec::new();
        for row in rows {
            let (deadline, key) = row.map_err(StoreError::from)?;
            match buckets.last_mut() {
                Some((t, keys)) if *t == deadline => keys.push(key),
                _ => buckets.push((deadline, vec![key])),
            }
        }
        Ok(buckets)
    }

    fn retire_bucket(&mut self, deadline_millis: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", []).map_err(StoreError::from)?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT key FROM time_index WHERE deadline_millis = ?1 ORDER BY seq ASC",
            )
            .map_err(StoreError::from)?;
        let keys: Vec<String> = stmt
            .query_map(params![deadline_millis], |r| r.get(0))
            .map_err(StoreError::from)?
            .collect::<rusqlite::Result<_>>()
            .map_err(StoreError::from)?;
        drop(stmt);

        conn.execute(
            "DELETE FROM time_index WHERE deadline_millis = ?1",
            params![deadline_millis],
        )
        .map_err(StoreError::from)?;
        for key in &keys {
            conn.execute("DELETE FROM key_index WHERE key = ?1", params![key])
                .map_err(StoreError::from)?;
        }
        conn.execute("COMMIT", []).map_err(StoreError::from)?;
        Ok(keys)
    }
}
