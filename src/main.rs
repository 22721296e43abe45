//! Stowage - persistent caching and content-addressed artifacts
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use std::process::ExitCode;
use stowage::cli::args::{ConfigAction, ConfigArgs};
use stowage::cli::{Cli, Commands};
use stowage::config::{Config, ConfigManager};
use stowage::error::StowageResult;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> StowageResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    // Init must work even when the existing file is broken
    let initializing = matches!(
        cli.command,
        Commands::Config(ConfigArgs {
            action: Some(ConfigAction::Init { .. })
        })
    );
    let mut config = match config_manager.load().await {
        Ok(config) => config,
        Err(_) if initializing => Config::default(),
        Err(e) => return Err(e),
    };
    if let Some(environment) = cli.environment {
        config.general.environment = environment;
    }

    // 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("stowage=warn"),
        1 => EnvFilter::new("stowage=info"),
        _ => EnvFilter::new("stowage=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    debug!(
        "Loaded configuration from {} (environment: {})",
        config_manager.path().display(),
        config.general.environment
    );

    match cli.command {
        Commands::Config(args) => {
            stowage::cli::commands::config(args, &config, &config_manager).await
        }
        Commands::Blob(args) => stowage::cli::commands::blob(args, &config).await,
        Commands::Registry(args) => stowage::cli::commands::registry(args, &config).await,
        Commands::Store(args) => stowage::cli::commands::store(args, &config).await,
    }
}
