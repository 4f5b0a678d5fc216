//! camli integration test harness.
//!
//! Every test starts its own blob server in-process on an OS-assigned
//! loopback port and talks to it over real HTTP:
//!
//!   cargo test --test integration
//!
//! Servers shut down when their `TestServer` is dropped. Temp directories
//! carry the pid and a counter so parallel tests never share one.

mod discovery;
mod presence;
mod server;
mod upload;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use camli_blobd::{BlobState, Storage};
use camli_core::config::StoreConfig;
use camli_upload::{FileSource, HttpBlobStore, UploadConfig, UploadCoordinator};

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub url: String,
    pub state: BlobState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<Result<()>>>,
}

impl TestServer {
    /// Memory-backed server.
    pub async fn start() -> Self {
        Self::with_state(BlobState::new(Storage::memory())).await
    }

    pub async fn with_state(state: BlobState) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener address");
        let (tx, rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(camli_blobd::serve_on(listener, state.clone(), async move {
            let _ = rx.await;
        }));

        Self {
            url: format!("http://{addr}"),
            state,
            shutdown: Some(tx),
            handle: Some(handle),
        }
    }

    /// Stop the server and wait until it has released its port.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            url: self.url.clone(),
            ..StoreConfig::default()
        }
    }

    /// A client that has completed discovery.
    pub async fn client(&self) -> HttpBlobStore {
        let mut store = HttpBlobStore::new(&self.store_config()).expect("valid store config");
        store.discover().await.expect("discovery against test server");
        store
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Coordinator reading files under `root` and writing to the test server.
pub async fn coordinator(server: &TestServer, root: &Path, config: UploadConfig) -> UploadCoordinator {
    UploadCoordinator::new(
        Arc::new(FileSource::rooted(root)),
        Arc::new(server.client().await),
        config,
    )
    .expect("valid upload config")
}

static COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(tag: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "camli-it-{tag}-{}-{}",
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

/// Write `(name, contents)` pairs under `dir`.
pub fn write_assets(dir: &Path, assets: &[(&str, &str)]) -> Result<()> {
    for (name, data) in assets {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, data).with_context(|| format!("write {}", path.display()))?;
    }
    Ok(())
}
