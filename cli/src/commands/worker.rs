use std::sync::Arc;

use momentum_engine::{ChannelListener, EngineConfig, SweepScheduler};

use crate::util::{connect, exit_error, pg_engine};

const AUDIT_CHANNEL_CAPACITY: usize = 1024;

pub async fn run(database_url: Option<&str>, max_connections: u32, skip_migrations: bool) -> i32 {
    let pool = connect(database_url, max_connections).await;

    if !skip_migrations
        && let Err(e) = sqlx::migrate!("../migrations").run(&pool).await
    {
        exit_error(&format!("Failed to run migrations: {e}"), None);
    }

    let config = EngineConfig::from_env();
    tracing::info!(
        sweep_interval_secs = config.sweep_interval.as_secs(),
        atrophy_sweep_interval_secs = config.atrophy_sweep_interval.as_secs(),
        practice_tasks_per_pivot = config.practice_tasks_per_pivot,
        "starting momentum worker"
    );
    let engine = Arc::new(pg_engine(pool, config));

    // Transitions are mirrored to the log off the committing task.
    let (audit, mut transitions) = ChannelListener::new("audit_log", AUDIT_CHANNEL_CAPACITY);
    engine.subscribe(Arc::new(audit));
    let audit_task = tokio::spawn(async move {
        while let Some(change) = transitions.recv().await {
            tracing::info!(
                user_id = %change.user_id,
                cycle_id = ?change.cycle.cycle_id,
                from = change.from.as_str(),
                to = change.to.as_str(),
                event = change.event.as_str(),
                "cycle transition"
            );
        }
    });

    let scheduler = SweepScheduler::start(engine.clone());

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown requested, stopping sweeps");
    scheduler.stop().await;

    let metrics = engine.metrics();
    tracing::info!(
        cycles_completed = metrics.cycles_completed,
        cycles_incomplete = metrics.cycles_incomplete,
        hook_failures = metrics.hook_failures,
        "momentum worker stopped"
    );
    audit_task.abort();
    0
}
