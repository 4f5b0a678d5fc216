//! `upload`: push files to the blob store, skipping what it already has.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use futures::StreamExt;

use camli_upload::{
    BatchSummary, BlobStore, ChunkOutcome, ChunkState, FileSource, HttpBlobStore,
    MemoryBlobStore, UploadCoordinator,
};

use super::{collect_files, human_bytes};
use crate::Options;

pub async fn run(opts: &Options, paths: &[&str]) -> Result<()> {
    let config = &opts.config;
    config.validate().context("invalid configuration")?;

    let files = collect_files(paths)?;
    if files.is_empty() {
        println!("Nothing to upload.");
        return Ok(());
    }

    tracing::debug!(files = files.len(), dry_run = opts.dry_run, "collected upload set");

    let store: Arc<dyn BlobStore> = if opts.dry_run {
        Arc::new(MemoryBlobStore::new())
    } else {
        let mut http = HttpBlobStore::new(&config.store).context("invalid store configuration")?;
        http.discover()
            .await
            .with_context(|| format!("discovery against {} failed", config.store.url))?;
        Arc::new(http)
    };

    let coordinator =
        UploadCoordinator::from_config(config, Arc::new(FileSource::new()), store)?;
    let mut stream = coordinator.submit_batch(files);

    let cancel = stream.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling…");
            tracing::warn!("interrupted, cancelling batch");
            cancel.cancel();
        }
    });

    let mut outcomes = Vec::with_capacity(stream.batch_size());
    while let Some(outcome) = stream.next().await {
        if opts.json {
            println!("{}", serde_json::to_string(&outcome)?);
        } else {
            print_outcome(&outcome);
        }
        outcomes.push(outcome);
    }

    let summary = BatchSummary::from_outcomes(&outcomes);
    tracing::info!(
        total = summary.total,
        uploaded = summary.uploaded,
        already_present = summary.already_present,
        failed = summary.failed(),
        bytes = summary.bytes_uploaded,
        "upload finished"
    );
    if opts.json {
        println!("{}", serde_json::to_string(&summary)?);
    } else {
        print_summary(&summary, opts.dry_run);
    }

    if !summary.all_succeeded() {
        bail!("{} of {} assets failed", summary.failed(), summary.total);
    }
    Ok(())
}

fn print_outcome(o: &ChunkOutcome) {
    let reference = o.reference.as_ref().map(|r| r.short()).unwrap_or("-");
    match &o.state {
        ChunkState::Uploaded => println!(
            "  ↑ {reference:<20} {} ({})",
            o.asset,
            human_bytes(o.size)
        ),
        ChunkState::AlreadyPresent => println!("  = {reference:<20} {}", o.asset),
        ChunkState::Failed(reason) => println!("  ✗ {reference:<20} {}: {reason}", o.asset),
        other => println!("  ? {reference:<20} {} ({})", o.asset, other.name()),
    }
}

fn print_summary(s: &BatchSummary, dry_run: bool) {
    println!("═══════════════════════════════════════");
    if dry_run {
        println!("  Upload Summary (dry run)");
    } else {
        println!("  Upload Summary");
    }
    println!("═══════════════════════════════════════");
    println!("  Assets          : {}", s.total);
    println!("  Uploaded        : {} ({})", s.uploaded, human_bytes(s.bytes_uploaded));
    println!("  Already present : {}", s.already_present);
    if s.failed() > 0 {
        println!("  Failed          : {}", s.failed());
        println!("  ┌─ unreadable   : {}", s.failed_io);
        println!("  │  network      : {}", s.failed_network);
        println!("  └─ cancelled    : {}", s.cancelled);
    }
}
