//! camli-upload: client side of the chunk upload protocol.
//!
//! Assets are wrapped in [`Chunk`]s, hashed into content references, checked
//! against the store in bulk, and only the missing ones are sent. The
//! [`UploadCoordinator`] drives a batch and reports one [`ChunkOutcome`] per
//! asset on an [`UploadStream`].

pub mod chunk;
pub mod coordinator;
pub mod error;
pub mod inflight;
pub mod presence;
pub mod source;
pub mod store;
pub mod stream;

pub use camli_core::{ContentReference, DigestAlgorithm, Hasher};
pub use chunk::{Chunk, ChunkOutcome, ChunkState};
pub use coordinator::{UploadConfig, UploadCoordinator};
pub use error::{ChunkError, ConfigError, FailureReason, InvalidTransition, NetworkError};
pub use presence::{Presence, PresenceChecker, PresenceMap};
pub use source::{AssetHandle, AssetSource, FileSource, MemorySource};
pub use store::{BlobStore, HttpBlobStore, MemoryBlobStore, UploadReceipt};
pub use stream::{BatchProgress, BatchSummary, CancelHandle, UploadStream};
