//! Registry command - read the version registry

use crate::cli::args::{OutputFormat, RegistryAction, RegistryArgs};
use crate::cli::commands::blob::open_blob_store;
use crate::config::Config;
use crate::error::{StowageError, StowageResult};
use crate::registry::{RegistryDocument, VersionRegistry};
use chrono::Utc;
use console::style;
use serde_json::Value;
use std::sync::Arc;

/// Execute the registry command
pub async fn execute(args: RegistryArgs, config: &Config) -> StowageResult<()> {
    let blobs = Arc::new(open_blob_store(config));
    let registry = VersionRegistry::new(config.registry_path(), blobs);

    match args.action {
        RegistryAction::List { format } => list(&registry, config, format).await,
        RegistryAction::Show { identifier, load } => show(&registry, &identifier, load).await,
    }
}

async fn list(
    registry: &VersionRegistry,
    config: &Config,
    format: OutputFormat,
) -> StowageResult<()> {
    let entries = registry.entries().await?;

    if entries.is_empty() && !matches!(format, OutputFormat::Json) {
        println!("No versions recorded in {}", registry.path().display());
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_table(&entries, config),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Plain => {
            for identifier in entries.keys() {
                println!("{}", identifier);
            }
        }
    }

    Ok(())
}

fn print_table(entries: &RegistryDocument, config: &Config) {
    let ttl = chrono::Duration::hours(i64::from(config.registry.ttl_hours));
    let now = Utc::now();

    println!("{:<40} {:<16} {:<8} {:<20}", "IDENTIFIER", "HASH", "STATE", "LAST RUN");
    println!("{}", "-".repeat(86));

    for (identifier, entry) in entries {
        let state = if now - entry.last_run_timestamp > ttl {
            style("stale").yellow().to_string()
        } else {
            style("fresh").green().to_string()
        };
        let short_hash: String = entry.result_hash.chars().take(12).collect();

        println!(
            "{:<40} {:<16} {:<8} {:<20}",
            identifier,
            short_hash,
            state,
            entry.last_run_timestamp.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!("Total: {} version(s)", entries.len());
}

async fn show(registry: &VersionRegistry, identifier: &str, load: bool) -> StowageResult<()> {
    let entry = registry
        .entry(identifier)
        .await?
        .ok_or_else(|| StowageError::UnknownIdentifier(identifier.to_string()))?;

    println!("{}", style(identifier).bold());
    println!("  {:<20} {}", "result_hash", entry.result_hash);
    println!("  {:<20} {}", "last_run_timestamp", entry.last_run_timestamp.to_rfc3339());
    for (key, value) in &entry.metadata {
        println!("  {:<20} {}", key, value);
    }

    if load {
        let artifact: Value = registry.blobs().load(&entry.result_hash).await?;
        println!();
        println!("{}", serde_json::to_string_pretty(&artifact)?);
    }

    Ok(())
}
