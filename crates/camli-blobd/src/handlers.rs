//! Blob server handlers: presence, upload, fetch, stats, discovery.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use camli_core::wire::{
    Discovery, PresenceRequest, PresenceResponse, StoreStats, DISCOVERY_MIME, UPLOAD_PATH,
};
use camli_core::{ContentReference, Hasher};

use crate::storage::Storage;

/// Path the blob handlers are mounted under.
pub const BLOB_ROOT: &str = "/bs/";

/// Largest reference list accepted by one presence request.
pub const MAX_PRESENCE_REFERENCES: usize = 10_000;

#[derive(Clone)]
pub struct BlobState {
    pub storage: Storage,
    /// 0 = unlimited.
    pub max_blob_bytes: u64,
    pub owner_name: Option<String>,
}

impl BlobState {
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            max_blob_bytes: 0,
            owner_name: None,
        }
    }
}

type ApiError = (StatusCode, String);

fn parse_reference(raw: &str) -> Result<ContentReference, ApiError> {
    raw.parse()
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("invalid reference {raw:?}: {e}")))
}

fn internal(e: anyhow::Error) -> ApiError {
    tracing::error!(error = %e, "storage failure");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
}

// ── POST /bs/presence ─────────────────────────────────────────────────────────

pub async fn handle_presence(
    State(state): State<BlobState>,
    Json(req): Json<PresenceRequest>,
) -> Result<Json<PresenceResponse>, ApiError> {
    if req.references.len() > MAX_PRESENCE_REFERENCES {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!(
                "{} references in one request, limit is {MAX_PRESENCE_REFERENCES}",
                req.references.len()
            ),
        ));
    }

    let present: Vec<ContentReference> = req
        .references
        .into_iter()
        .filter(|r| state.storage.has(r))
        .collect();
    tracing::debug!(present = present.len(), "presence answered");
    Ok(Json(PresenceResponse { present }))
}

// ── PUT /bs/upload/{reference} ────────────────────────────────────────────────

pub async fn handle_upload(
    State(state): State<BlobState>,
    Path(raw): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let reference = parse_reference(&raw)?;

    if state.max_blob_bytes > 0 && body.len() as u64 > state.max_blob_bytes {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("blob is {} bytes, limit is {}", body.len(), state.max_blob_bytes),
        ));
    }

    let actual = Hasher::new(reference.algorithm()).reference(&body);
    if actual != reference {
        tracing::warn!(claimed = %reference, actual = %actual, "upload body does not match reference");
        return Err((
            StatusCode::BAD_REQUEST,
            format!("body hashes to {actual}, not {reference}"),
        ));
    }

    let len = body.len();
    let created = state.storage.put(&reference, body).map_err(internal)?;
    if !created {
        return Ok(StatusCode::CONFLICT);
    }
    tracing::info!(reference = reference.short(), bytes = len, "blob stored");
    Ok(StatusCode::CREATED)
}

// ── GET /bs/blob/{reference} ──────────────────────────────────────────────────

pub async fn handle_get_blob(
    State(state): State<BlobState>,
    Path(raw): Path<String>,
) -> Result<Response, ApiError> {
    let reference = parse_reference(&raw)?;
    match state.storage.get(&reference).map_err(internal)? {
        Some(data) => Ok((
            [(CONTENT_TYPE, "application/octet-stream")],
            data,
        )
            .into_response()),
        None => Err((StatusCode::NOT_FOUND, format!("{reference} not stored"))),
    }
}

// ── GET /bs/stats ─────────────────────────────────────────────────────────────

pub async fn handle_stats(State(state): State<BlobState>) -> Json<StoreStats> {
    Json(StoreStats {
        blobs: state.storage.count(),
        bytes: state.storage.size(),
    })
}

// ── GET / ─────────────────────────────────────────────────────────────────────

/// Discovery document when asked for it, a plain banner otherwise.
pub async fn handle_root(State(state): State<BlobState>, headers: HeaderMap) -> Response {
    let wants_discovery = headers
        .get_all(ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(DISCOVERY_MIME));

    if !wants_discovery {
        return (StatusCode::OK, "camli-blobd\n").into_response();
    }

    Json(Discovery {
        blob_root: BLOB_ROOT.to_string(),
        upload_helper: Some(format!("{BLOB_ROOT}{UPLOAD_PATH}/")),
        owner_name: state.owner_name.clone(),
    })
    .into_response()
}
