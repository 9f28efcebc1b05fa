use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use uuid::Uuid;

mod commands;
mod util;

use commands::analysis::{PracticeArgs, RecommendArgs};

#[derive(Parser)]
#[command(
    name = "momentum",
    version,
    about = "Adaptive momentum engine: background worker and operator commands"
)]
struct Cli {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the timeout and atrophy sweeps until interrupted
    Worker {
        /// Maximum pool connections
        #[arg(long, env = "MOMENTUM_DB_MAX_CONNECTIONS", default_value_t = 10)]
        max_connections: u32,
        /// Skip applying migrations on startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Submit an event to a user's cycle
    Trigger {
        #[arg(long)]
        user_id: Uuid,
        /// Event name
        #[arg(long, value_parser = util::EVENT_NAMES)]
        event: String,
        /// Result for bottleneck_checked
        #[arg(long)]
        found: bool,
    },
    /// Show a user's cycle and open remedial tasks
    Inspect {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Cancel a user's cycle (no-op when idle)
    Abandon {
        #[arg(long)]
        user_id: Uuid,
    },
    /// Mark a remedial task resolved
    ResolveTask {
        #[arg(long)]
        task_id: Uuid,
    },
    /// Recommend a difficulty profile from recent snapshots
    Recommend(RecommendArgs),
    /// Rank decaying skills and optionally queue practice tasks
    Practice(PracticeArgs),
    /// Replay a JSON scenario through an in-memory engine (no database)
    Simulate {
        /// Scenario file, or "-" for stdin
        #[arg(long)]
        file: String,
    },
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "momentum_engine=info,momentum_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let database_url = cli.database_url.as_deref();

    let code = match cli.command {
        Commands::Worker {
            max_connections,
            skip_migrations,
        } => commands::worker::run(database_url, max_connections, skip_migrations).await,
        Commands::Trigger {
            user_id,
            event,
            found,
        } => commands::cycle::trigger(database_url, user_id, &event, found).await,
        Commands::Inspect { user_id } => commands::cycle::inspect(database_url, user_id).await,
        Commands::Abandon { user_id } => commands::cycle::abandon(database_url, user_id).await,
        Commands::ResolveTask { task_id } => {
            commands::cycle::resolve_task(database_url, task_id).await
        }
        Commands::Recommend(args) => commands::analysis::recommend(database_url, args).await,
        Commands::Practice(args) => commands::analysis::practice(database_url, args).await,
        Commands::Simulate { file } => commands::simulate::run(&file).await,
    };

    std::process::exit(code);
}
