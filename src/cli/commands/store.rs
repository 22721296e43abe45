//! Store command - inspect disk-backed caches

use crate::cli::args::{StoreAction, StoreArgs};
use crate::config::Config;
use crate::error::{StowageError, StowageResult};
use crate::store::DiskStore;
use console::style;
use serde_json::Value;

/// Execute the store command
pub async fn execute(args: StoreArgs, config: &Config) -> StowageResult<()> {
    match args.action {
        StoreAction::Inspect { name, keys } => inspect(config, &name, keys),
        StoreAction::Flush { name } => flush(config, &name),
    }
}

fn open(config: &Config, name: &str) -> StowageResult<DiskStore<Value>> {
    validate_name(name)?;
    Ok(DiskStore::open(
        name,
        &config.disk_dir(),
        config.disk.flush_threshold,
    ))
}

fn inspect(config: &Config, name: &str, show_keys: bool) -> StowageResult<()> {
    let store = open(config, name)?;

    println!("{}", style(name).bold());
    println!("  {:<16} {}", "file", store.path().display());
    println!(
        "  {:<16} {}",
        "exists",
        if store.path().exists() { "yes" } else { "no" }
    );
    println!("  {:<16} {}", "entries", store.len());
    println!("  {:<16} {}", "flush threshold", config.disk.flush_threshold);

    if show_keys {
        println!();
        for key in store.keys() {
            println!("{}", key);
        }
    }

    Ok(())
}

fn flush(config: &Config, name: &str) -> StowageResult<()> {
    let store = open(config, name)?;

    if !store.path().exists() {
        println!(
            "{} Cache {} has no file at {}",
            style("!").yellow().bold(),
            name,
            store.path().display()
        );
        return Ok(());
    }

    store.flush()?;
    println!(
        "{} Rewrote {} entries to {}",
        style("✓").green().bold(),
        store.len(),
        store.path().display()
    );
    Ok(())
}

/// Cache names become file names; reject anything that could leave the directory
fn validate_name(name: &str) -> StowageResult<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StowageError::User(format!("Invalid cache name: {}", name)))
    }
}
