//! `discover` and `stats`: what the server says about itself.

use anyhow::{Context, Result};

use camli_core::wire::{Discovery, StoreStats};
use camli_upload::HttpBlobStore;

use super::http::get_json;
use super::human_bytes;
use crate::Options;

async fn connect(opts: &Options) -> Result<(HttpBlobStore, Discovery)> {
    let mut store =
        HttpBlobStore::new(&opts.config.store).context("invalid store configuration")?;
    let discovery = store
        .discover()
        .await
        .with_context(|| format!("discovery against {} failed", opts.config.store.url))?;
    tracing::debug!(
        server = %opts.config.store.url,
        blob_root = %store.blob_root(),
        authorized = store.is_authorized(),
        "connected"
    );
    Ok((store, discovery))
}

pub async fn run(opts: &Options) -> Result<()> {
    let (store, discovery) = connect(opts).await?;

    println!("═══════════════════════════════════════");
    println!("  Blob Server");
    println!("═══════════════════════════════════════");
    println!("  Server        : {}", opts.config.store.url);
    println!("  Blob root     : {}", store.blob_root());
    println!(
        "  Upload helper : {}",
        discovery.upload_helper.as_deref().unwrap_or("-")
    );
    println!(
        "  Owner         : {}",
        discovery.owner_name.as_deref().unwrap_or("-")
    );
    println!(
        "  Authorized    : {}",
        if store.is_authorized() { "yes" } else { "no" }
    );
    Ok(())
}

pub async fn stats(opts: &Options) -> Result<()> {
    let (store, _) = connect(opts).await?;
    let url = store
        .blob_root()
        .join("stats")
        .context("failed to build stats URL")?;
    let stats: StoreStats = get_json(&opts.config.store, url.as_str()).await?;

    println!("═══════════════════════════════════════");
    println!("  Blob Store Stats");
    println!("═══════════════════════════════════════");
    println!("  Blobs : {}", stats.blobs);
    println!("  Bytes : {} ({})", stats.bytes, human_bytes(stats.bytes));
    Ok(())
}
