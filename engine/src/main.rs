// Navigator
// Main entry point for the navigator binary

use clap::Parser;
use navigator_engine::cli::{Cli, Command};
use navigator_engine::config::Config;
use navigator_engine::handlers::{
    handle_doctor, handle_history, handle_replay, handle_run, handle_search, OutputFormat,
};
use navigator_engine::telemetry::{init_telemetry, init_telemetry_with_level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = match &cli.config {
        Some(config_path) => Config::load_from_path(config_path),
        None => Config::load_or_create(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            init_telemetry();
            tracing::error!("{}", e);
            return Err(e.into());
        }
    };

    // Priority: RUST_LOG > --log > config
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Navigator v{} ({} - {})", version, commit, timestamp);

    match cli.command {
        Command::Run { goal } => {
            tracing::info!("Running goal: {}", goal);
            handle_run(goal, &config, format).await
        }

        Command::Search { query, limit } => handle_search(query, limit, &config, format).await,

        Command::History { limit } => {
            tracing::info!("Showing last {} runs", limit);
            handle_history(limit, &config, format).await
        }

        Command::Replay { run_id } => {
            tracing::info!("Replaying run: {}", run_id);
            handle_replay(run_id, &config, format).await
        }

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, format).await
        }
    }
}
