//! camli-blobd: blob server for local development and testing.
//!
//! Usage: camli-blobd [--port N] [--memory | --disk [PATH]]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use camli_blobd::{BlobState, Storage};
use camli_core::config::StorageBackend;
use camli_core::CamliConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = CamliConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = CamliConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        CamliConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                let value = args.get(i + 1).context("--port needs a value")?;
                config.server.port = value
                    .parse()
                    .with_context(|| format!("invalid port {value:?}"))?;
                i += 1;
            }
            "--memory" => config.server.backend = StorageBackend::Memory,
            "--disk" => {
                config.server.backend = StorageBackend::Disk;
                if let Some(path) = args.get(i + 1).filter(|a| !a.starts_with("--")) {
                    config.server.storage_path = PathBuf::from(path);
                    i += 1;
                }
            }
            "-h" | "--help" => {
                println!("Usage: camli-blobd [--port N] [--memory | --disk [PATH]]");
                return Ok(());
            }
            other => bail!("unknown argument {other:?}"),
        }
        i += 1;
    }

    let storage = match config.server.backend {
        StorageBackend::Memory => Storage::memory(),
        StorageBackend::Disk => Storage::disk(&config.server.storage_path).with_context(|| {
            format!(
                "failed to open storage at {}",
                config.server.storage_path.display()
            )
        })?,
    };
    tracing::info!(
        backend = storage.kind(),
        blobs = storage.count(),
        port = config.server.port,
        "camli-blobd starting"
    );

    let state = BlobState {
        storage,
        max_blob_bytes: config.server.max_blob_bytes,
        owner_name: Some(config.server.owner_name.clone()).filter(|n| !n.is_empty()),
    };
    camli_blobd::serve(state, config.server.port).await
}
