use crate::*;

use bytes::Bytes;

use camli_core::wire::StoreStats;
use camli_core::Hasher;
use camli_upload::{BlobStore, NetworkError, UploadReceipt};

#[tokio::test]
async fn test_upload_status_mapping() {
    let server = TestServer::start().await;
    let client = server.client().await;
    let body = Bytes::from_static(b"status mapping");
    let r = Hasher::default().reference(&body);

    assert_eq!(
        client.upload(&r, body.clone()).await.unwrap(),
        UploadReceipt::Created
    );
    assert_eq!(
        client.upload(&r, body).await.unwrap(),
        UploadReceipt::AlreadyPresent
    );
}

/// The server recomputes the reference and refuses bodies that do not match.
#[tokio::test]
async fn test_tampered_body_is_rejected() {
    let server = TestServer::start().await;
    let client = server.client().await;
    let r = Hasher::default().reference(b"original");

    let err = client
        .upload(&r, Bytes::from_static(b"tampered"))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Status { status: 400, .. }));
    assert_eq!(server.state.storage.count(), 0);
}

#[tokio::test]
async fn test_blake3_references_accepted() {
    let server = TestServer::start().await;
    let client = server.client().await;
    let hasher = Hasher::new(camli_core::DigestAlgorithm::Blake3);
    let body = Bytes::from_static(b"fast digest");
    let r = hasher.reference(&body);

    assert_eq!(client.upload(&r, body).await.unwrap(), UploadReceipt::Created);
    assert_eq!(client.present(&[r.clone()]).await.unwrap(), vec![r]);
}

#[tokio::test]
async fn test_blob_size_limit() {
    let mut state = BlobState::new(Storage::memory());
    state.max_blob_bytes = 16;
    let server = TestServer::with_state(state).await;
    let client = server.client().await;

    let big = Bytes::from(vec![7u8; 64]);
    let r = Hasher::default().reference(&big);
    let err = client.upload(&r, big).await.unwrap_err();
    assert!(matches!(err, NetworkError::Status { status: 413, .. }));

    let small = Bytes::from_static(b"fits");
    let r = Hasher::default().reference(&small);
    assert_eq!(
        client.upload(&r, small).await.unwrap(),
        UploadReceipt::Created
    );
}

#[tokio::test]
async fn test_stats_reflect_uploads() {
    let server = TestServer::start().await;
    let client = server.client().await;
    for body in [&b"one"[..], &b"three"[..], &b"one"[..]] {
        let r = Hasher::default().reference(body);
        client
            .upload(&r, Bytes::copy_from_slice(body))
            .await
            .unwrap();
    }

    let stats: StoreStats = reqwest::get(server.url_for("/bs/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats, StoreStats { blobs: 2, bytes: 8 });
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let server = TestServer::start().await;
    let r = Hasher::default().reference(b"never uploaded");
    let resp = reqwest::get(server.url_for(&format!("/bs/blob/{r}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = reqwest::get(server.url_for("/bs/blob/not-a-reference"))
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

/// Racing uploads of one blob: exactly one request creates it.
#[tokio::test]
async fn test_concurrent_puts_create_once() {
    let dir = temp_dir("race");
    let server = TestServer::with_state(BlobState::new(Storage::disk(&dir).unwrap())).await;
    let body = Bytes::from_static(b"contended blob");
    let r = Hasher::default().reference(&body);
    let url = server.url_for(&format!("/bs/upload/{r}"));
    let http = reqwest::Client::new();

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let request = http.put(&url).body(body.clone());
        tasks.spawn(async move { request.send().await.unwrap().status() });
    }
    let mut created = 0;
    let mut conflicts = 0;
    while let Some(status) = tasks.join_next().await {
        match status.unwrap() {
            reqwest::StatusCode::CREATED => created += 1,
            reqwest::StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!((created, conflicts), (1, 7));
    assert_eq!(server.state.storage.count(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}
