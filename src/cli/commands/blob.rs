//! Blob command - content-addressed objects

use crate::blob::{BlobStore, FsBlobBackend};
use crate::cli::args::{BlobAction, BlobArgs};
use crate::config::Config;
use crate::error::{StowageError, StowageResult};
use console::style;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// Execute the blob command
pub async fn execute(args: BlobArgs, config: &Config) -> StowageResult<()> {
    let store = open_blob_store(config);

    match args.action {
        BlobAction::Put { file } => put(&store, &file).await,
        BlobAction::Get { hash } => get(&store, &hash).await,
        BlobAction::Exists { hash } => exists(&store, &hash).await,
    }
}

/// Blob store described by the configuration
pub fn open_blob_store(config: &Config) -> BlobStore {
    let root = config.blob_root();
    let mirror = config.blob_mirror_dir();
    debug!(
        "Blob bucket {} under {} (mirror: {:?})",
        config.blob.bucket,
        root.display(),
        mirror
    );
    BlobStore::new(
        Arc::new(FsBlobBackend::new(root)),
        config.blob.bucket.clone(),
        mirror,
    )
}

async fn put(store: &BlobStore, file: &Path) -> StowageResult<()> {
    let content = fs::read(file)
        .await
        .map_err(|e| StowageError::io(format!("reading {}", file.display()), e))?;
    let payload: Value = serde_json::from_slice(&content)
        .map_err(|e| StowageError::User(format!("{} is not valid JSON: {}", file.display(), e)))?;

    let hash = store.save_returning_hash(&payload).await?;
    println!("{}", hash);
    Ok(())
}

async fn get(store: &BlobStore, hash: &str) -> StowageResult<()> {
    let payload = store.load_by_hash(hash).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn exists(store: &BlobStore, hash: &str) -> StowageResult<()> {
    if store.exists(hash).await? {
        println!("{} {}", style("present").green(), hash);
    } else {
        println!("{} {}", style("absent").dim(), hash);
    }
    Ok(())
}
