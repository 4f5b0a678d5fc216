//! Error taxonomy for the upload path.
//!
//!   ChunkError    : one asset could not be read. Local to that chunk.
//!   NetworkError  : presence or upload transport failed. Local to the
//!                   affected reference; reported, never retried here.
//!   ConfigError   : re-exported from camli-core. Fatal, raised before
//!                   any work starts.
//!
//! Per-chunk failures are recorded on the chunk as a [`FailureReason`] and
//! surface through the result stream; they never cross chunk boundaries.

use serde::Serialize;

use crate::chunk::ChunkState;
use crate::source::AssetHandle;

pub use camli_core::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("asset {asset} unreadable: {source}")]
    Io {
        asset: AssetHandle,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NetworkError {
    #[error("blob store unreachable: {0}")]
    Unreachable(String),
    #[error("blob store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("blob store rejected our credentials")]
    Unauthorized,
    #[error("malformed response from blob store: {0}")]
    Decode(String),
}

/// Why a chunk ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "lowercase")]
pub enum FailureReason {
    Io(String),
    Network(String),
    Cancelled,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Network(msg) => write!(f, "network: {msg}"),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

impl From<&NetworkError> for FailureReason {
    fn from(e: &NetworkError) -> Self {
        Self::Network(e.to_string())
    }
}

/// A lifecycle step the chunk state machine does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal chunk transition {} -> {}", from.name(), to.name())]
pub struct InvalidTransition {
    pub from: ChunkState,
    pub to: ChunkState,
}
