//! Blob store seam: the two calls the upload protocol needs.
//!
//! The coordinator sees only this trait. It receives a store that is
//! already authorized; discovery and credentials are the concern of the
//! concrete implementation (see [`HttpBlobStore::discover`]).

mod http;
mod memory;

pub use http::HttpBlobStore;
pub use memory::MemoryBlobStore;

use async_trait::async_trait;
use bytes::Bytes;

use camli_core::ContentReference;

use crate::error::NetworkError;

/// What the store did with an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadReceipt {
    /// 201: the blob is new.
    Created,
    /// 409: the store already had it.
    AlreadyPresent,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Which of `references` the store already holds. One request; callers
    /// page large sets themselves.
    async fn present(
        &self,
        references: &[ContentReference],
    ) -> Result<Vec<ContentReference>, NetworkError>;

    /// Write one blob under its reference.
    async fn upload(
        &self,
        reference: &ContentReference,
        body: Bytes,
    ) -> Result<UploadReceipt, NetworkError>;
}
