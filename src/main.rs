//! Convoy - deployment execution engine
//!
//! CLI entry point for cache and workspace maintenance.

use clap::Parser;
use console::style;
use convoy::cli::{Cli, Commands};
use convoy::config::{Config, ConfigManager};
use convoy::error::ConvoyResult;
use std::process::ExitCode;
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

async fn run() -> ConvoyResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;

    init_logging(cli.verbose, &config);
    debug!("Loaded configuration from {}", config_manager.path().display());

    match cli.command {
        Commands::Cache(args) => convoy::cli::commands::cache(args, &config, cli.format).await,
        Commands::Workspace(args) => {
            convoy::cli::commands::workspace(args, &config, cli.format).await
        }
        Commands::Config(args) => {
            convoy::cli::commands::config(args, &config, &config_manager, cli.format).await
        }
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` overrides
fn init_logging(verbose: u8, config: &Config) {
    let default = match verbose {
        0 => "convoy=warn",
        1 => "convoy=info",
        _ => "convoy=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if config.general.log_format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
