//! Runtime configuration, read from the environment with typed defaults.
//!
//! Each setting follows the same pattern: `env::var(...).ok().and_then(|v|
//! v.parse().ok()).unwrap_or(default)`, so a present-but-unparseable value
//! falls back to the default rather than panicking at startup.

use std::env;

/// Default scan cadence, matching the original test suite's default.
pub const DEFAULT_SCAN_INTERVAL_MS: u64 = 500;
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8089";

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identifier for the ordered deadline→keys index.
    pub time_store_name: String,
    /// Identifier for the key→deadline index.
    pub key_store_name: String,
    /// Identifier for the materialized view store.
    pub lookup_store_name: String,
    /// Cadence of the wall-clock scan, in milliseconds.
    pub scan_interval_ms: u64,
    /// If set, back the three indexes with a SQLite file at this path
    /// instead of the in-memory default.
    pub sqlite_path: Option<String>,
    /// Bind address for the HTTP surface.
    pub http_addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_store_name: "time-index".to_string(),
            key_store_name: "key-index".to_string(),
            lookup_store_name: "lookup".to_string(),
            scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
            sqlite_path: None,
            http_addr: DEFAULT_HTTP_ADDR.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults for
    /// anything absent or unparseable.
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            time_store_name: env::var("DEFERRED_PUBLISH_TIME_STORE")
                .unwrap_or(default.time_store_name),
            key_store_name: env::var("DEFERRED_PUBLISH_KEY_STORE")
                .unwrap_or(default.key_store_name),
            lookup_store_name: env::var("DEFERRED_PUBLISH_LOOKUP_STORE")
                .unwrap_or(default.lookup_store_name),
            scan_interval_ms: env::var("DEFERRED_PUBLISH_SCAN_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&v: &u64| v > 0)
                .unwrap_or(default.scan_interval_ms),
            sqlite_path: env::var("DEFERRED_PUBLISH_SQLITE_PATH").ok(),
            http_addr: env::var("DEFERRED_PUBLISH_HTTP_ADDR").unwrap_or(default.http_addr),
        }
    }
}
