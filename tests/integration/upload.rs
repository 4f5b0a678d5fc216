use crate::*;

use async_trait::async_trait;
use bytes::Bytes;

use camli_core::{ContentReference, Hasher};
use camli_upload::{
    BatchSummary, BlobStore, ChunkState, FailureReason, NetworkError, UploadReceipt,
};

fn config(concurrency: usize) -> UploadConfig {
    UploadConfig {
        concurrency,
        presence_batch_size: 100,
        ..UploadConfig::default()
    }
}

/// Files travel over HTTP, duplicates are sent once, and the server holds
/// exactly the bytes that were read.
#[tokio::test]
async fn test_upload_files_end_to_end() {
    let server = TestServer::start().await;
    let dir = temp_dir("e2e");
    write_assets(
        &dir,
        &[
            ("2024/IMG_0001.JPG", "first photo"),
            ("2024/IMG_0002.JPG", "second photo"),
            ("backup/IMG_0001.JPG", "first photo"),
        ],
    )
    .unwrap();

    let outcomes = coordinator(&server, &dir, config(2))
        .await
        .upload_batch(["2024/IMG_0001.JPG", "2024/IMG_0002.JPG", "backup/IMG_0001.JPG"])
        .await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.state == ChunkState::Uploaded));
    assert_eq!(server.state.storage.count(), 2);

    let first = Hasher::default().reference(b"first photo");
    let fetched = reqwest::get(server.url_for(&format!("/bs/blob/{first}")))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&fetched[..], b"first photo");

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_second_run_uploads_nothing() {
    let server = TestServer::start().await;
    let dir = temp_dir("rerun");
    write_assets(&dir, &[("a.jpg", "alpha"), ("b.jpg", "beta")]).unwrap();

    let coordinator = coordinator(&server, &dir, config(4)).await;
    let first = coordinator.upload_batch(["a.jpg", "b.jpg"]).await;
    assert_eq!(BatchSummary::from_outcomes(&first).uploaded, 2);

    let second = coordinator.upload_batch(["a.jpg", "b.jpg"]).await;
    let summary = BatchSummary::from_outcomes(&second);
    assert_eq!(summary.already_present, 2);
    assert_eq!(summary.uploaded, 0);
    for o in &second {
        assert!(!o.history.contains(&ChunkState::Uploading));
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_missing_file_fails_alone() {
    let server = TestServer::start().await;
    let dir = temp_dir("partial");
    let mut names = Vec::new();
    for i in 0..9 {
        let name = format!("photo-{i}.jpg");
        write_assets(&dir, &[(name.as_str(), format!("pixels {i}").as_str())]).unwrap();
        names.push(name);
    }
    names.push("deleted-before-upload.jpg".to_string());

    let outcomes = coordinator(&server, &dir, config(3))
        .await
        .upload_batch(names)
        .await;

    let summary = BatchSummary::from_outcomes(&outcomes);
    assert_eq!(summary.total, 10);
    assert_eq!(summary.uploaded, 9);
    assert_eq!(summary.failed_io, 1);
    assert_eq!(server.state.storage.count(), 9);

    let _ = std::fs::remove_dir_all(&dir);
}

/// Disk-backed blobs survive a server restart.
#[tokio::test]
async fn test_disk_backend_survives_restart() {
    let storage_dir = temp_dir("disk-store");
    let asset_dir = temp_dir("disk-assets");
    write_assets(&asset_dir, &[("raw.dng", "sensor data")]).unwrap();

    let server =
        TestServer::with_state(BlobState::new(Storage::disk(&storage_dir).unwrap())).await;
    let outcomes = coordinator(&server, &asset_dir, config(1))
        .await
        .upload_batch(["raw.dng"])
        .await;
    assert_eq!(outcomes[0].state, ChunkState::Uploaded);
    server.stop().await;

    let server =
        TestServer::with_state(BlobState::new(Storage::disk(&storage_dir).unwrap())).await;
    let outcomes = coordinator(&server, &asset_dir, config(1))
        .await
        .upload_batch(["raw.dng"])
        .await;
    assert_eq!(outcomes[0].state, ChunkState::AlreadyPresent);

    let _ = std::fs::remove_dir_all(&storage_dir);
    let _ = std::fs::remove_dir_all(&asset_dir);
}

/// Store whose presence endpoint claims to hold nothing, so every blob goes
/// through upload and the server's 409 decides.
struct NothingPresent(HttpBlobStore);

#[async_trait]
impl BlobStore for NothingPresent {
    async fn present(
        &self,
        _references: &[ContentReference],
    ) -> Result<Vec<ContentReference>, NetworkError> {
        Ok(Vec::new())
    }

    async fn upload(
        &self,
        reference: &ContentReference,
        body: Bytes,
    ) -> Result<UploadReceipt, NetworkError> {
        self.0.upload(reference, body).await
    }
}

#[tokio::test]
async fn test_conflict_lands_already_present() {
    let server = TestServer::start().await;
    let dir = temp_dir("conflict");
    write_assets(&dir, &[("dup.jpg", "stored earlier")]).unwrap();

    let r = Hasher::default().reference(b"stored earlier");
    server
        .state
        .storage
        .put(&r, Bytes::from_static(b"stored earlier"))
        .unwrap();

    let coordinator = UploadCoordinator::new(
        Arc::new(FileSource::rooted(&dir)),
        Arc::new(NothingPresent(server.client().await)),
        config(1),
    )
    .unwrap();
    let outcomes = coordinator.upload_batch(["dup.jpg"]).await;

    assert_eq!(
        outcomes[0].history,
        vec![
            ChunkState::Pending,
            ChunkState::Hashed,
            ChunkState::Checking,
            ChunkState::Uploading,
            ChunkState::AlreadyPresent,
        ]
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_unreachable_server_fails_with_network_reason() {
    let server = TestServer::start().await;
    let client = server.client().await;
    server.stop().await;

    let dir = temp_dir("offline");
    write_assets(&dir, &[("a.jpg", "offline"), ("b.jpg", "also offline")]).unwrap();

    let coordinator =
        UploadCoordinator::new(Arc::new(FileSource::rooted(&dir)), Arc::new(client), config(2))
            .unwrap();
    let outcomes = coordinator.upload_batch(["a.jpg", "b.jpg"]).await;

    assert_eq!(outcomes.len(), 2);
    for o in &outcomes {
        assert!(
            matches!(o.state, ChunkState::Failed(FailureReason::Network(_))),
            "unexpected state {:?}",
            o.state
        );
        // presence failed, so the upload was still attempted
        assert!(o.history.contains(&ChunkState::Uploading));
    }

    let _ = std::fs::remove_dir_all(&dir);
}
