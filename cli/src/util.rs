use std::sync::Arc;

use momentum_core::{MomentumError, MomentumEvent};
use momentum_engine::memory::LogRewardNotifier;
use momentum_engine::postgres::{PgCycleStore, PgSnapshotSource, PgTaskQueue};
use momentum_engine::{EngineConfig, EngineDeps, MomentumEngine, SystemClock};
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub const EVENT_NAMES: [&str; 8] = [
    "block_completed",
    "reward_emitted",
    "bottleneck_checked",
    "reframe_complete",
    "growth_started",
    "growth_completed",
    "timeout",
    "abandon",
];

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| err.to_string())
    );
    std::process::exit(1);
}

/// Print an engine error as its machine-readable report and return exit code 1.
pub fn report_error(err: &MomentumError) -> i32 {
    let report = err.report();
    match serde_json::to_string_pretty(&report) {
        Ok(body) => eprintln!("{body}"),
        Err(_) => eprintln!("{err}"),
    }
    1
}

pub fn print_json<T: Serialize>(value: &T) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(body) => {
            println!("{body}");
            0
        }
        Err(e) => exit_error(&format!("Failed to serialize output: {e}"), None),
    }
}

/// Map a CLI event name onto an event. `found` is only read for
/// `bottleneck_checked`.
pub fn parse_event(name: &str, found: bool) -> Result<MomentumEvent, String> {
    match name {
        "block_completed" => Ok(MomentumEvent::BlockCompleted),
        "reward_emitted" => Ok(MomentumEvent::RewardEmitted),
        "bottleneck_checked" => Ok(MomentumEvent::BottleneckChecked { found }),
        "reframe_complete" => Ok(MomentumEvent::ReframeComplete),
        "growth_started" => Ok(MomentumEvent::GrowthStarted),
        "growth_completed" => Ok(MomentumEvent::GrowthCompleted),
        "timeout" => Ok(MomentumEvent::Timeout),
        "abandon" => Ok(MomentumEvent::Abandon),
        other => Err(format!(
            "Unknown event '{other}'. Expected one of: {}",
            EVENT_NAMES.join(", ")
        )),
    }
}

pub async fn connect(database_url: Option<&str>, max_connections: u32) -> PgPool {
    let Some(database_url) = database_url else {
        exit_error(
            "DATABASE_URL must be set",
            Some("Set --database-url or the DATABASE_URL env var"),
        );
    };
    match PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
    {
        Ok(pool) => pool,
        Err(e) => exit_error(&format!("Failed to connect to database: {e}"), None),
    }
}

/// Engine wired to Postgres with rewards written to the log.
pub fn pg_engine(pool: PgPool, config: EngineConfig) -> MomentumEngine {
    MomentumEngine::new(
        config,
        EngineDeps {
            store: Arc::new(PgCycleStore::new(pool.clone())),
            snapshots: Arc::new(PgSnapshotSource::new(pool.clone())),
            tasks: Arc::new(PgTaskQueue::new(pool)),
            rewards: Arc::new(LogRewardNotifier),
            clock: Arc::new(SystemClock),
        },
    )
}

pub fn read_json_from_file(path: &str) -> Result<String, String> {
    if path == "-" {
        std::io::read_to_string(std::io::stdin()).map_err(|e| format!("Failed to read stdin: {e}"))
    } else {
        std::fs::read_to_string(path).map_err(|e| format!("Failed to read file '{path}': {e}"))
    }
}
