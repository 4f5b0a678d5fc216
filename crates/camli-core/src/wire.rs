//! Blob store wire format: the JSON bodies exchanged over HTTP.
//!
//! Every path below is relative to the server's blob root (default `/bs/`):
//!
//!   POST presence            {"references": [...]} → {"present": [...]}
//!   PUT  upload/{reference}  raw body → 201 Created | 409 Conflict
//!   GET  blob/{reference}    raw body
//!   GET  stats               {"blobs": n, "bytes": n}
//!
//! Discovery is served from the server root when the request carries
//! `Accept: text/x-camli-configuration`.

use serde::{Deserialize, Serialize};

use crate::reference::ContentReference;

/// Accept header value that selects the discovery document.
pub const DISCOVERY_MIME: &str = "text/x-camli-configuration";

/// Relative path of the presence endpoint under the blob root.
pub const PRESENCE_PATH: &str = "presence";

/// Relative path prefix of the upload endpoint under the blob root.
pub const UPLOAD_PATH: &str = "upload";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRequest {
    pub references: Vec<ContentReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceResponse {
    /// Subset of the requested references the store already holds.
    pub present: Vec<ContentReference>,
}

/// Discovery document: tells a client where the blob handlers live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discovery {
    pub blob_root: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_helper: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub blobs: usize,
    pub bytes: u64,
}
