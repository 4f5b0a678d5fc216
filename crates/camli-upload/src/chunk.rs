//! Chunks: one asset's blob, tracked from queueing to a terminal state.
//!
//! Lifecycle:
//!
//!   Pending ─► Hashed ─► Checking ─┬─► AlreadyPresent
//!      │                           └─► Uploading ─┬─► Uploaded
//!      │                                          ├─► AlreadyPresent (409)
//!      └──────────── any non-terminal ────────────┴─► Failed
//!
//! A Failed chunk is never revived. Retrying means building a fresh chunk for
//! the same asset.

use std::time::SystemTime;

use bytes::Bytes;
use serde::Serialize;

use camli_core::{ContentReference, Hasher};

use crate::error::{ChunkError, FailureReason, InvalidTransition};
use crate::source::{AssetHandle, AssetSource};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Hashed,
    Checking,
    AlreadyPresent,
    Uploading,
    Uploaded,
    Failed(FailureReason),
}

impl ChunkState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Hashed => "hashed",
            Self::Checking => "checking",
            Self::AlreadyPresent => "already_present",
            Self::Uploading => "uploading",
            Self::Uploaded => "uploaded",
            Self::Failed(_) => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AlreadyPresent | Self::Uploaded | Self::Failed(_))
    }

    /// Terminal and the blob is on the server.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::AlreadyPresent | Self::Uploaded)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    fn allows(&self, next: &ChunkState) -> bool {
        use ChunkState::*;
        match (self, next) {
            (Pending, Hashed) => true,
            (Hashed, Checking) => true,
            (Checking, AlreadyPresent | Uploading) => true,
            (Uploading, Uploaded | AlreadyPresent) => true,
            (from, Failed(_)) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// One unit of upload work.
#[derive(Debug)]
pub struct Chunk {
    asset: AssetHandle,
    payload: Option<Bytes>,
    reference: Option<ContentReference>,
    size: u64,
    created_at: SystemTime,
    state: ChunkState,
    history: Vec<ChunkState>,
}

impl Chunk {
    /// Queue an asset. Reads nothing: enumerating a large batch stays cheap.
    pub fn new(asset: AssetHandle) -> Self {
        Self {
            asset,
            payload: None,
            reference: None,
            size: 0,
            created_at: SystemTime::now(),
            state: ChunkState::Pending,
            history: vec![ChunkState::Pending],
        }
    }

    pub fn asset(&self) -> &AssetHandle {
        &self.asset
    }

    pub fn reference(&self) -> Option<&ContentReference> {
        self.reference.as_ref()
    }

    pub fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn state(&self) -> &ChunkState {
        &self.state
    }

    /// Every state this chunk has been in, oldest first.
    pub fn history(&self) -> &[ChunkState] {
        &self.history
    }

    pub fn transition(&mut self, next: ChunkState) -> Result<(), InvalidTransition> {
        if !self.state.allows(&next) {
            return Err(InvalidTransition {
                from: self.state.clone(),
                to: next,
            });
        }
        self.state = next.clone();
        self.history.push(next);
        Ok(())
    }

    /// Read the asset, store the payload, compute the reference.
    ///
    /// On a read failure the chunk moves to `Failed(Io)` and the error is
    /// returned for logging; the caller carries on with the rest of the batch.
    pub async fn materialize(
        &mut self,
        source: &dyn AssetSource,
        hasher: &Hasher,
    ) -> Result<&ContentReference, ChunkError> {
        if self.state != ChunkState::Pending {
            return Err(InvalidTransition {
                from: self.state.clone(),
                to: ChunkState::Hashed,
            }
            .into());
        }

        let data = match source.read_bytes(&self.asset).await {
            Ok(data) => data,
            Err(source) => {
                self.fail(FailureReason::Io(source.to_string()));
                return Err(ChunkError::Io {
                    asset: self.asset.clone(),
                    source,
                });
            }
        };

        let reference = hasher.reference(&data);
        self.size = data.len() as u64;
        self.payload = Some(data);
        self.transition(ChunkState::Hashed)?;
        Ok(self.reference.insert(reference))
    }

    /// Drop the payload once the server holds the blob. Idempotent.
    /// Returns true if bytes were actually freed.
    pub fn release(&mut self) -> bool {
        if !self.state.is_success() {
            return false;
        }
        self.payload.take().is_some()
    }

    /// Drop the payload of a chunk whose bytes another chunk will send.
    pub(crate) fn discard_duplicate_payload(&mut self) {
        self.payload = None;
    }

    /// Move to `Failed` unless already terminal. Frees the payload.
    pub fn fail(&mut self, reason: FailureReason) {
        if self.transition(ChunkState::Failed(reason)).is_ok() {
            self.payload = None;
        }
    }

    /// Consume a terminal chunk into the record handed to the caller.
    pub fn into_outcome(self) -> ChunkOutcome {
        ChunkOutcome {
            asset: self.asset,
            reference: self.reference,
            size: self.size,
            created_at: self.created_at,
            state: self.state,
            history: self.history,
        }
    }
}

/// Per-asset result emitted on the upload stream.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkOutcome {
    pub asset: AssetHandle,
    pub reference: Option<ContentReference>,
    pub size: u64,
    #[serde(skip)]
    pub created_at: SystemTime,
    pub state: ChunkState,
    pub history: Vec<ChunkState>,
}

impl ChunkOutcome {
    pub fn is_success(&self) -> bool {
        self.state.is_success()
    }
}
