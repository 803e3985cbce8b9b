//! Workspace command - list and clean run directories

use crate::audit::{events, AuditLog};
use crate::cli::args::{OutputFormat, WorkspaceAction, WorkspaceArgs};
use crate::config::{format_duration, parse_ttl, Config, ConfigManager};
use crate::error::{ConvoyError, ConvoyResult};
use crate::store::Store;
use crate::workspace::{CleanupOutcome, RunId, RunInfo, WorkspaceManager};
use chrono::Utc;
use console::style;
use tracing::warn;

/// Execute the workspace command
pub async fn execute(args: WorkspaceArgs, config: &Config, format: OutputFormat) -> ConvoyResult<()> {
    let manager = WorkspaceManager::new(ConfigManager::workspace_root(config));

    match args.action {
        WorkspaceAction::List => list_runs(&manager, format).await,
        WorkspaceAction::Clean {
            run,
            expired,
            all,
            dry_run,
        } => {
            let (scope, removed) = match (run, expired, all) {
                (Some(id), _, _) => (format!("run {}", id), clean_run(&manager, &id, dry_run).await?),
                (None, Some(ttl), _) => {
                    let ttl = if ttl.is_empty() {
                        parse_ttl(&config.workspace.expire_after)?
                    } else {
                        parse_ttl(&ttl)?
                    };
                    (
                        format!("idle > {}", format_duration(ttl)),
                        manager.clean_expired(ttl, dry_run).await?,
                    )
                }
                (None, None, true) => ("all".to_string(), manager.clean_all(dry_run).await?),
                (None, None, false) => {
                    return Err(ConvoyError::User(
                        "Specify --run, --expired or --all".to_string(),
                    ))
                }
            };

            if !dry_run && !removed.is_empty() {
                release_consumers(config, &removed).await;
                AuditLog::new(config)
                    .log(
                        events::WORKSPACE_CLEAN,
                        &serde_json::json!({
                            "scope": scope,
                            "runs": removed.iter().map(|r| r.run_id.to_string()).collect::<Vec<_>>(),
                        }),
                    )
                    .await;
            }
            print_cleaned(&removed, dry_run, format)
        }
    }
}

async fn clean_run(manager: &WorkspaceManager, id: &str, dry_run: bool) -> ConvoyResult<Vec<RunInfo>> {
    let run_id: RunId = id.parse()?;
    let info = manager
        .list_runs()
        .await?
        .into_iter()
        .find(|r| r.run_id == run_id)
        .ok_or_else(|| ConvoyError::RunNotFound(id.to_string()))?;

    if dry_run {
        return Ok(vec![info]);
    }

    match manager.cleanup(run_id, false).await {
        CleanupOutcome::Removed => Ok(vec![info]),
        CleanupOutcome::NotCreated => Err(ConvoyError::RunNotFound(id.to_string())),
        CleanupOutcome::Failed(path, reason) => Err(ConvoyError::User(format!(
            "Failed to remove {}: {}",
            path.display(),
            reason
        ))),
        CleanupOutcome::Retained(_) => Ok(vec![]),
    }
}

/// Drop store consumers that pointed into removed runs
async fn release_consumers(config: &Config, removed: &[RunInfo]) {
    let root = ConfigManager::store_root(config);
    if !root.exists() {
        return;
    }
    let store = match Store::open(root).await {
        Ok(store) => store,
        Err(e) => {
            warn!(error = %e, "Could not open store to release consumers");
            return;
        }
    };
    for run in removed {
        if let Err(e) = store.release(&run.path).await {
            warn!(run = %run.run_id, error = %e, "Failed to release store consumers");
        }
    }
}

async fn list_runs(manager: &WorkspaceManager, format: OutputFormat) -> ConvoyResult<()> {
    let runs = manager.list_runs().await?;

    if runs.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No run workspaces."),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Plain => {
            for run in &runs {
                println!("{}", run.run_id);
            }
        }
        OutputFormat::Table => print_table(&runs),
    }
    Ok(())
}

fn print_table(runs: &[RunInfo]) {
    println!(
        "{:<38} {:<18} {:<10} {:<9} {}",
        style("RUN").bold(),
        style("CREATED").bold(),
        style("IDLE").bold(),
        style("RETAINED").bold(),
        style("COMPONENTS").bold()
    );
    println!("{}", "-".repeat(90));

    let now = Utc::now();
    for run in runs {
        let idle = (now - run.last_accessed).to_std().unwrap_or_default();
        let retained = if run.retained {
            style("yes").yellow()
        } else {
            style("no").dim()
        };
        println!(
            "{:<38} {:<18} {:<10} {:<9} {}",
            run.run_id.to_string(),
            run.created_at.format("%Y-%m-%d %H:%M").to_string(),
            format_duration(idle),
            retained,
            run.components.join(", ")
        );
    }

    println!();
    println!("{} run(s)", runs.len());
}

fn print_cleaned(runs: &[RunInfo], dry_run: bool, format: OutputFormat) -> ConvoyResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(runs)?);
            return Ok(());
        }
        OutputFormat::Plain => {
            for run in runs {
                println!("{}", run.run_id);
            }
            return Ok(());
        }
        OutputFormat::Table => {}
    }

    if runs.is_empty() {
        println!("No run workspaces to remove.");
        return Ok(());
    }

    let verb = if dry_run { "Would remove" } else { "Removed" };
    println!("{} {} run(s):", verb, runs.len());
    for run in runs {
        println!("  {} {}", style("•").red(), run.path.display());
    }
    if dry_run {
        println!();
        println!("Dry run - nothing removed.");
    }
    Ok(())
}
