//! Asset sources: where chunk bytes come from.
//!
//! The coordinator never owns asset bytes up front. It holds an
//! [`AssetHandle`] per asset and asks an [`AssetSource`] for the bytes only
//! when the chunk is materialized.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Serialize, Serializer};

/// Opaque, cheaply clonable name of one asset.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetHandle(Arc<str>);

impl AssetHandle {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AssetHandle {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetHandle {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl From<&Path> for AssetHandle {
    fn from(p: &Path) -> Self {
        Self::new(p.to_string_lossy())
    }
}

impl From<PathBuf> for AssetHandle {
    fn from(p: PathBuf) -> Self {
        Self::from(p.as_path())
    }
}

impl Serialize for AssetHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetHandle({})", self.0)
    }
}

/// A readable byte source.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Read the full contents of one asset.
    async fn read_bytes(&self, asset: &AssetHandle) -> io::Result<Bytes>;
}

// ── FileSource ────────────────────────────────────────────────────────────────

/// Handles are file paths, optionally relative to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileSource {
    root: Option<PathBuf>,
}

impl FileSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative handles against `root`.
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    pub fn resolve(&self, asset: &AssetHandle) -> PathBuf {
        match &self.root {
            Some(root) => root.join(asset.as_str()),
            None => PathBuf::from(asset.as_str()),
        }
    }
}

#[async_trait]
impl AssetSource for FileSource {
    async fn read_bytes(&self, asset: &AssetHandle) -> io::Result<Bytes> {
        let path = self.resolve(asset);
        let data = tokio::fs::read(&path).await?;
        tracing::trace!(path = %path.display(), bytes = data.len(), "asset read");
        Ok(Bytes::from(data))
    }
}

// ── MemorySource ──────────────────────────────────────────────────────────────

/// In-memory assets. Unknown handles read as `NotFound`; handles registered
/// with [`MemorySource::insert_unreadable`] fail with the given error kind.
#[derive(Default)]
pub struct MemorySource {
    assets: DashMap<AssetHandle, Result<Bytes, io::ErrorKind>>,
    reads: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, asset: impl Into<AssetHandle>, data: impl Into<Bytes>) {
        self.assets.insert(asset.into(), Ok(data.into()));
    }

    pub fn insert_unreadable(&self, asset: impl Into<AssetHandle>, kind: io::ErrorKind) {
        self.assets.insert(asset.into(), Err(kind));
    }

    /// Total `read_bytes` calls, successful or not.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AssetSource for MemorySource {
    async fn read_bytes(&self, asset: &AssetHandle) -> io::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        match self.assets.get(asset).map(|e| e.value().clone()) {
            Some(Ok(data)) => Ok(data),
            Some(Err(kind)) => Err(io::Error::new(kind, format!("asset {asset} unreadable"))),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("asset {asset} not found"),
            )),
        }
    }
}
