//! Blob storage backends.
//!
//! Disk blobs are stored by reference in a two-level directory structure:
//!   {storage_path}/{digest[0..2]}/{algorithm}-{digest}
//!
//! Files are immutable. If the reference exists, the content is correct:
//! every body is verified against its reference before it reaches storage.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use memmap2::Mmap;

use camli_core::ContentReference;

/// Where accepted blobs live.
#[derive(Clone)]
pub enum Storage {
    Memory(Arc<DashMap<ContentReference, Bytes>>),
    Disk(DiskStore),
}

impl Storage {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(DashMap::new()))
    }

    pub fn disk(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::Disk(DiskStore::new(root)?))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Disk(_) => "disk",
        }
    }

    pub fn has(&self, reference: &ContentReference) -> bool {
        match self {
            Self::Memory(blobs) => blobs.contains_key(reference),
            Self::Disk(disk) => disk.has(reference),
        }
    }

    pub fn get(&self, reference: &ContentReference) -> Result<Option<Bytes>> {
        match self {
            Self::Memory(blobs) => Ok(blobs.get(reference).map(|b| b.value().clone())),
            Self::Disk(disk) => disk.get(reference),
        }
    }

    /// Store a verified blob. Returns false if it was already stored.
    pub fn put(&self, reference: &ContentReference, data: Bytes) -> Result<bool> {
        match self {
            Self::Memory(blobs) => match blobs.entry(reference.clone()) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(data);
                    Ok(true)
                }
            },
            Self::Disk(disk) => disk.put(reference, &data),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Self::Memory(blobs) => blobs.len(),
            Self::Disk(disk) => disk.count(),
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Memory(blobs) => blobs.iter().map(|b| b.value().len() as u64).sum(),
            Self::Disk(disk) => disk.size(),
        }
    }
}

// ── DiskStore ─────────────────────────────────────────────────────────────────

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct DiskStore {
    root: PathBuf,
}

impl DiskStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create storage root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn has(&self, reference: &ContentReference) -> bool {
        self.blob_path(reference).exists()
    }

    /// Read a blob through a read-only mapping.
    pub fn get(&self, reference: &ContentReference) -> Result<Option<Bytes>> {
        let path = self.blob_path(reference);
        if !path.exists() {
            return Ok(None);
        }

        let file = fs::File::open(&path)
            .with_context(|| format!("failed to open blob: {}", path.display()))?;
        if file.metadata()?.len() == 0 {
            return Ok(Some(Bytes::new()));
        }

        // Safety: blob files are never modified after they are linked in `put`.
        let mmap = unsafe {
            Mmap::map(&file).with_context(|| format!("failed to mmap blob: {}", path.display()))?
        };
        Ok(Some(Bytes::copy_from_slice(&mmap)))
    }

    /// Atomic write: tmp file, fsync, then hard-link into place. The link
    /// fails if the blob already exists, so exactly one concurrent writer of
    /// a reference gets `true`. Existing blobs are left alone.
    pub fn put(&self, reference: &ContentReference, data: &[u8]) -> Result<bool> {
        let path = self.blob_path(reference);
        if path.exists() {
            return Ok(false);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create blob dir: {}", parent.display()))?;
        }

        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!("tmp{n}"));
        {
            let mut file = fs::File::create(&tmp_path)
                .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
            file.write_all(data).context("failed to write blob data")?;
            file.sync_all().context("failed to sync blob to disk")?;
        }

        let linked = fs::hard_link(&tmp_path, &path);
        let _ = fs::remove_file(&tmp_path);
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "failed to link {} to {}",
                        tmp_path.display(),
                        path.display()
                    )
                })
            }
        }

        tracing::trace!(reference = %reference, bytes = data.len(), "blob written");
        Ok(true)
    }

    fn blob_path(&self, reference: &ContentReference) -> PathBuf {
        let hex = reference.digest_hex();
        self.root.join(&hex[0..2]).join(reference.as_str())
    }

    fn blob_files(&self) -> impl Iterator<Item = fs::DirEntry> {
        fs::read_dir(&self.root)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|dir| fs::read_dir(dir.path()).ok())
            .flat_map(|entries| entries.flatten())
            .filter(|e| {
                e.path()
                    .extension()
                    .map_or(true, |ext| !ext.to_string_lossy().starts_with("tmp"))
            })
    }

    pub fn count(&self) -> usize {
        self.blob_files().count()
    }

    pub fn size(&self) -> u64 {
        self.blob_files()
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }
}
