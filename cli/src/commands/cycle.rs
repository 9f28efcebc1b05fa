use momentum_engine::EngineConfig;
use momentum_engine::postgres::PgTaskQueue;
use serde_json::json;
use uuid::Uuid;

use crate::util::{connect, exit_error, parse_event, pg_engine, print_json, report_error};

pub async fn trigger(database_url: Option<&str>, user_id: Uuid, event: &str, found: bool) -> i32 {
    let event = match parse_event(event, found) {
        Ok(event) => event,
        Err(message) => exit_error(&message, None),
    };
    let pool = connect(database_url, 2).await;
    let engine = pg_engine(pool, EngineConfig::from_env());

    match engine.trigger(user_id, event).await {
        Ok(state) => print_json(&json!({
            "user_id": user_id,
            "event": event,
            "state": state,
        })),
        Err(err) => report_error(&err),
    }
}

pub async fn inspect(database_url: Option<&str>, user_id: Uuid) -> i32 {
    let pool = connect(database_url, 2).await;
    let queue = PgTaskQueue::new(pool.clone());
    let engine = pg_engine(pool, EngineConfig::from_env());

    let cycle = match engine.current_state(user_id).await {
        Ok(cycle) => cycle,
        Err(err) => return report_error(&err),
    };
    let open_tasks = match queue.open_tasks(user_id).await {
        Ok(tasks) => tasks,
        Err(err) => return report_error(&err),
    };
    let limit = engine
        .config()
        .timeouts
        .limit_for(cycle.current_state)
        .map(|limit| limit.num_seconds());

    print_json(&json!({
        "cycle": cycle,
        "dwell_seconds": cycle.dwell(chrono::Utc::now()).num_seconds(),
        "timeout_seconds": limit,
        "open_tasks": open_tasks,
    }))
}

pub async fn abandon(database_url: Option<&str>, user_id: Uuid) -> i32 {
    let pool = connect(database_url, 2).await;
    let engine = pg_engine(pool, EngineConfig::from_env());

    match engine.abandon(user_id).await {
        Ok(state) => print_json(&json!({
            "user_id": user_id,
            "state": state,
        })),
        Err(err) => report_error(&err),
    }
}

pub async fn resolve_task(database_url: Option<&str>, task_id: Uuid) -> i32 {
    let pool = connect(database_url, 2).await;
    let engine = pg_engine(pool, EngineConfig::from_env());

    match engine.resolve_task(task_id).await {
        Ok(true) => print_json(&json!({ "task_id": task_id, "resolved": true })),
        Ok(false) => exit_error(
            &format!("Task {task_id} not found"),
            Some("Only remedial (bottleneck and practice) tasks can be resolved"),
        ),
        Err(err) => report_error(&err),
    }
}
