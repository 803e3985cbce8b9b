//! Config command - show configuration

use crate::cli::args::{ConfigAction, ConfigArgs, OutputFormat};
use crate::config::{Config, ConfigManager};
use crate::error::ConvoyResult;

/// Execute the config command
pub async fn execute(
    args: ConfigArgs,
    config: &Config,
    manager: &ConfigManager,
    format: OutputFormat,
) -> ConvoyResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config, format)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
    }
    Ok(())
}

fn show_config(config: &Config, format: OutputFormat) -> ConvoyResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Table | OutputFormat::Plain => {
            println!("{}", toml::to_string_pretty(config)?);
            println!("# store root:     {}", ConfigManager::store_root(config).display());
            println!("# workspace root: {}", ConfigManager::workspace_root(config).display());
        }
    }
    Ok(())
}
