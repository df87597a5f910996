//! Scenario replay binary.
//!
//! Reads a JSON scenario file (a list of timed input records and clock
//! advances) and prints the resulting output stream to stdout, for
//! operational/manual testing of the core engine outside the HTTP surface:
//! a small `clap`-derived entrypoint around a direct library call, its
//! result printed rather than served.
//!
//! Scenario format — a JSON array of steps, applied in order:
//! ```json
//! [
//!   { "advance_to_ms": 0 },
//!   { "key": "A", "value": { "publishing": { "private": true, "until": "1970-01-01T00:00:06Z" } } },
//!   { "advance_to_ms": 8000 },
//!   { "scan": true }
//! ]
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use deferred_publish::clock::ManualClock;
use deferred_publish::store::MemoryIndexStore;
use deferred_publish::Pipeline;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "replay_scenario")]
#[command(about = "Replay a scenario file through the deferred-publish engine")]
struct Args {
    /// Path to a JSON scenario file.
    scenario: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Step {
    Advance { advance_to_ms: i64 },
    Scan { scan: bool },
    Record { key: String, value: Value },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "replay_scenario=info".into()),
        )
        .init();

    let args = Args::parse();
    let raw = fs::read_to_string(&args.scenario)?;
    let steps: Vec<Step> = serde_json::from_str(&raw)?;

    let clock = Arc::new(ManualClock::new(0));
    let mut pipeline = Pipeline::new(MemoryIndexStore::new(), clock.clone());

    for step in steps {
        match step {
            Step::Advance { advance_to_ms } => {
                clock.advance_to(advance_to_ms);
                info!(advance_to_ms, "clock advanced");
            }
            Step::Scan { scan } if scan => {
                let outputs = pipeline.scan_now()?;
                for (key, value) in outputs {
                    println!("{}", serde_json::json!({"key": key, "value": value}));
                }
            }
            Step::Scan { .. } => {}
            Step::Record { key, value } => {
                let value = if value.is_null() { None } else { Some(value) };
                let output = pipeline.ingest(&key, value)?;
                println!("{}", serde_json::json!({"key": key, "value": output}));
            }
        }
    }

    Ok(())
}
