use std::time::Duration;

use clap::Args;
use momentum_engine::EngineConfig;
use serde_json::json;
use uuid::Uuid;

use crate::util::{connect, pg_engine, print_json, report_error};

#[derive(Args)]
pub struct RecommendArgs {
    #[arg(long)]
    pub user_id: Uuid,
    /// History window in days (defaults to MOMENTUM_SCALER_LOOKBACK_DAYS or 14)
    #[arg(long)]
    pub lookback_days: Option<u64>,
    /// Prefer snapshots from this category when it has enough samples
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Args)]
pub struct PracticeArgs {
    #[arg(long)]
    pub user_id: Uuid,
    /// Maximum number of suggestions
    #[arg(long, default_value_t = 3)]
    pub max: usize,
    /// Also create and enqueue practice tasks for the suggestions
    #[arg(long)]
    pub queue: bool,
}

pub async fn recommend(database_url: Option<&str>, args: RecommendArgs) -> i32 {
    let pool = connect(database_url, 2).await;
    let engine = pg_engine(pool, EngineConfig::from_env());
    let lookback = args
        .lookback_days
        .map(|days| Duration::from_secs(days.saturating_mul(86_400)))
        .unwrap_or(engine.config().scaler.lookback);

    match engine
        .scaler()
        .recommend(args.user_id, lookback, args.category.as_deref())
        .await
    {
        Ok(profile) => print_json(&json!({
            "user_id": args.user_id,
            "lookback_days": lookback.as_secs() / 86_400,
            "category": args.category,
            "profile": profile,
        })),
        Err(err) => report_error(&err),
    }
}

pub async fn practice(database_url: Option<&str>, args: PracticeArgs) -> i32 {
    let pool = connect(database_url, 2).await;
    let engine = pg_engine(pool, EngineConfig::from_env());

    let suggestions = match engine
        .atrophy()
        .generate_practice_suggestions(args.user_id, args.max)
        .await
    {
        Ok(suggestions) => suggestions,
        Err(err) => return report_error(&err),
    };

    let queued = if args.queue {
        match engine.queue_practice(args.user_id, args.max).await {
            Ok(tasks) => Some(tasks),
            Err(err) => return report_error(&err),
        }
    } else {
        None
    };

    print_json(&json!({
        "user_id": args.user_id,
        "suggestions": suggestions,
        "queued_tasks": queued,
    }))
}
