//! Cache command - inspect, garbage-collect and clear the source store

use crate::audit::{events, AuditLog};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::{format_bytes, format_duration, parse_ttl, Config, ConfigManager};
use crate::error::ConvoyResult;
use crate::store::{CacheObject, GcReport, Store};
use chrono::Utc;
use console::style;
use std::io::{self, Write};
use tracing::debug;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config, format: OutputFormat) -> ConvoyResult<()> {
    let root = ConfigManager::store_root(config);
    debug!("Opening store at {}", root.display());
    let store = Store::open(root).await?;

    match args.action {
        CacheAction::Stats => show_stats(&store, format).await,
        CacheAction::List => list_objects(&store, format).await,
        CacheAction::Gc {
            older_than,
            dry_run,
        } => {
            let threshold = match older_than {
                Some(value) => parse_ttl(&value)?,
                None => config.store.gc_threshold()?,
            };
            let report = store.gc(threshold, dry_run).await?;
            if !dry_run {
                AuditLog::new(config)
                    .log(
                        events::STORE_GC,
                        &serde_json::json!({
                            "removed": report.candidates.len(),
                            "reclaimed_bytes": report.reclaimed_bytes,
                            "orphans_removed": report.orphans_removed,
                            "older_than": format_duration(threshold),
                        }),
                    )
                    .await;
            }
            print_gc(&report, format)
        }
        CacheAction::Rm { key } => {
            let object = store.remove(&key).await?;
            AuditLog::new(config)
                .log(
                    events::STORE_REMOVE,
                    &serde_json::json!({
                        "digest": object.digest,
                        "references": object.references,
                        "size_bytes": object.size_bytes,
                    }),
                )
                .await;
            print_removed(&object, format)
        }
        CacheAction::Clear { yes } => clear_store(&store, config, yes, format).await,
    }
}

fn print_removed(object: &CacheObject, format: OutputFormat) -> ConvoyResult<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(object)?),
        OutputFormat::Plain => println!("{}", object.digest),
        OutputFormat::Table => {
            println!(
                "{} removed {} ({})",
                style("✓").green(),
                short_digest(&object.digest),
                format_bytes(object.size_bytes)
            );
            for reference in &object.references {
                println!("  {} {}", style("•").red(), reference);
            }
        }
    }
    Ok(())
}

/// Clear the whole store
async fn clear_store(
    store: &Store,
    config: &Config,
    skip_confirm: bool,
    format: OutputFormat,
) -> ConvoyResult<()> {
    let stats = store.stats().await;

    if stats.object_count == 0 && format == OutputFormat::Table {
        println!("No cached objects to clear.");
        return Ok(());
    }

    if !skip_confirm {
        println!(
            "This will remove {} object(s), {}, from {}",
            stats.object_count,
            format_bytes(stats.total_size),
            store.root().display()
        );
        print!("Are you sure? [y/N] ");
        let _ = io::stdout().flush();

        let mut input = String::new();
        if io::stdin().read_line(&mut input).is_err() {
            println!("Failed to read input, aborting.");
            return Ok(());
        }
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    let removed = store.clear().await?;
    AuditLog::new(config)
        .log(
            events::STORE_CLEAR,
            &serde_json::json!({
                "removed": removed.object_count,
                "references": removed.reference_count,
                "reclaimed_bytes": removed.total_size,
            }),
        )
        .await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&removed)?),
        OutputFormat::Plain => println!("{}", removed.object_count),
        OutputFormat::Table => println!(
            "{} cleared {} object(s), {}",
            style("✓").green(),
            removed.object_count,
            format_bytes(removed.total_size)
        ),
    }
    Ok(())
}

async fn show_stats(store: &Store, format: OutputFormat) -> ConvoyResult<()> {
    let stats = store.stats().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Plain => {
            println!("objects {}", stats.object_count);
            println!("references {}", stats.reference_count);
            println!("bytes {}", stats.total_size);
        }
        OutputFormat::Table => {
            println!("{} {}", style("Store:").bold(), store.root().display());
            println!("  Objects:    {}", stats.object_count);
            println!("  References: {}", stats.reference_count);
            println!("  Size:       {}", format_bytes(stats.total_size));
        }
    }
    Ok(())
}

async fn list_objects(store: &Store, format: OutputFormat) -> ConvoyResult<()> {
    let objects = store.objects().await;

    if objects.is_empty() {
        match format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => println!("No cached objects."),
        }
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&objects),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&objects)?),
        OutputFormat::Plain => {
            for object in &objects {
                println!("{}", object.digest);
            }
        }
    }
    Ok(())
}

fn print_table(objects: &[CacheObject]) {
    println!(
        "{:<14} {:>10} {:>6} {:>6} {:<12} {}",
        style("DIGEST").bold(),
        style("SIZE").bold(),
        style("FILES").bold(),
        style("USERS").bold(),
        style("IDLE").bold(),
        style("REFERENCES").bold()
    );
    println!("{}", "-".repeat(80));

    let now = Utc::now();
    for object in objects {
        let idle = (now - object.last_accessed).to_std().unwrap_or_default();
        let users = object
            .consumers
            .iter()
            .filter(|c| std::path::Path::new(c).exists())
            .count();
        println!(
            "{:<14} {:>10} {:>6} {:>6} {:<12} {}",
            short_digest(&object.digest),
            format_bytes(object.size_bytes),
            object.file_count,
            users,
            format_duration(idle),
            object.references.join(", ")
        );
    }

    println!();
    println!("{} object(s)", objects.len());
}

fn print_gc(report: &GcReport, format: OutputFormat) -> ConvoyResult<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
            return Ok(());
        }
        OutputFormat::Plain => {
            for candidate in &report.candidates {
                println!("{}", candidate.digest);
            }
            return Ok(());
        }
        OutputFormat::Table => {}
    }

    if report.candidates.is_empty() {
        println!("No objects eligible for garbage collection.");
    } else {
        let verb = if report.dry_run { "Would remove" } else { "Removed" };
        println!(
            "{} {} object(s), {}:",
            verb,
            report.candidates.len(),
            format_bytes(report.reclaimed_bytes)
        );
        for candidate in &report.candidates {
            let label = if candidate.references.is_empty() {
                "(no references)".to_string()
            } else {
                candidate.references.join(", ")
            };
            println!(
                "  {} {} {}",
                style("•").red(),
                short_digest(&candidate.digest),
                label
            );
        }
    }

    if report.orphans_removed > 0 {
        println!("Removed {} orphaned object dir(s).", report.orphans_removed);
    }
    if report.dry_run {
        println!();
        println!("Dry run - nothing removed.");
    }
    Ok(())
}

fn short_digest(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}
