//! In-process blob store with call accounting and fault injection.
//!
//! Backs the coordinator tests and `camli-ctl upload --dry-run`. Uploads are
//! verified against their reference exactly as the real server does.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};

use camli_core::{ContentReference, Hasher};

use super::{BlobStore, UploadReceipt};
use crate::error::NetworkError;

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<ContentReference, Bytes>,
    uploads_per_reference: DashMap<ContentReference, usize>,
    failing: DashSet<ContentReference>,
    presence_outage: AtomicBool,
    latency_ms: AtomicU64,
    presence_calls: AtomicUsize,
    presence_references: AtomicUsize,
    upload_calls: AtomicUsize,
    bytes_received: AtomicU64,
    uploads_in_flight: AtomicUsize,
    max_uploads_in_flight: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a blob in place without counting it as an upload.
    pub fn seed(&self, data: impl Into<Bytes>, hasher: &Hasher) -> ContentReference {
        let data = data.into();
        let reference = hasher.reference(&data);
        self.blobs.insert(reference.clone(), data);
        reference
    }

    pub fn contains(&self, reference: &ContentReference) -> bool {
        self.blobs.contains_key(reference)
    }

    pub fn get(&self, reference: &ContentReference) -> Option<Bytes> {
        self.blobs.get(reference).map(|b| b.value().clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Make every presence request fail as if the server were unreachable.
    pub fn set_presence_outage(&self, down: bool) {
        self.presence_outage.store(down, Ordering::Relaxed);
    }

    /// Make uploads of `reference` fail with a 503.
    pub fn fail_uploads_for(&self, reference: ContentReference) {
        self.failing.insert(reference);
    }

    /// Delay applied to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn presence_calls(&self) -> usize {
        self.presence_calls.load(Ordering::Relaxed)
    }

    /// References asked about across all presence calls.
    pub fn presence_references(&self) -> usize {
        self.presence_references.load(Ordering::Relaxed)
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::Relaxed)
    }

    pub fn uploads_for(&self, reference: &ContentReference) -> usize {
        self.uploads_per_reference
            .get(reference)
            .map(|n| *n.value())
            .unwrap_or(0)
    }

    /// Body bytes received by the upload endpoint, including rejected ones.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Highest number of uploads observed running at once.
    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_uploads_in_flight.load(Ordering::Relaxed)
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    async fn store_blob(
        &self,
        reference: &ContentReference,
        body: Bytes,
    ) -> Result<UploadReceipt, NetworkError> {
        self.delay().await;

        if self.failing.contains(reference) {
            return Err(NetworkError::Status {
                status: 503,
                body: "injected upload failure".to_string(),
            });
        }

        let actual = Hasher::new(reference.algorithm()).reference(&body);
        if &actual != reference {
            return Err(NetworkError::Status {
                status: 400,
                body: format!("body hashes to {actual}"),
            });
        }

        if self.blobs.contains_key(reference) {
            return Ok(UploadReceipt::AlreadyPresent);
        }
        self.blobs.insert(reference.clone(), body);
        Ok(UploadReceipt::Created)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn present(
        &self,
        references: &[ContentReference],
    ) -> Result<Vec<ContentReference>, NetworkError> {
        self.presence_calls.fetch_add(1, Ordering::Relaxed);
        self.presence_references
            .fetch_add(references.len(), Ordering::Relaxed);
        self.delay().await;

        if self.presence_outage.load(Ordering::Relaxed) {
            return Err(NetworkError::Unreachable(
                "presence endpoint offline".to_string(),
            ));
        }

        Ok(references
            .iter()
            .filter(|r| self.blobs.contains_key(*r))
            .cloned()
            .collect())
    }

    async fn upload(
        &self,
        reference: &ContentReference,
        body: Bytes,
    ) -> Result<UploadReceipt, NetworkError> {
        self.upload_calls.fetch_add(1, Ordering::Relaxed);
        *self
            .uploads_per_reference
            .entry(reference.clone())
            .or_insert(0) += 1;
        self.bytes_received
            .fetch_add(body.len() as u64, Ordering::Relaxed);

        let running = self.uploads_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_uploads_in_flight
            .fetch_max(running, Ordering::SeqCst);

        let result = self.store_blob(reference, body).await;

        self.uploads_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
