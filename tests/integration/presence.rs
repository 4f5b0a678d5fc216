use crate::*;

use std::collections::BTreeSet;

use bytes::Bytes;

use camli_blobd::handlers::MAX_PRESENCE_REFERENCES;
use camli_core::{ContentReference, Hasher};
use camli_upload::{BlobStore, NetworkError, Presence, PresenceChecker};

fn references(n: usize) -> Vec<ContentReference> {
    let hasher = Hasher::default();
    (0..n)
        .map(|i| hasher.reference(format!("presence {i}").as_bytes()))
        .collect()
}

/// Paged checks over HTTP classify every reference exactly once.
#[tokio::test]
async fn test_paged_presence_over_http() {
    let server = TestServer::start().await;
    let refs = references(7);
    for (i, r) in refs.iter().enumerate().take(3) {
        server
            .state
            .storage
            .put(r, Bytes::from(format!("presence {i}")))
            .unwrap();
    }

    let checker = PresenceChecker::new(Arc::new(server.client().await), 2);
    let query: BTreeSet<ContentReference> = refs.iter().cloned().collect();
    let map = checker.check(&query).await.unwrap();

    assert_eq!(map.len(), 7);
    for (i, r) in refs.iter().enumerate() {
        let expected = if i < 3 {
            Presence::Present
        } else {
            Presence::Absent
        };
        assert_eq!(map[r], expected, "reference {i}");
    }
}

#[tokio::test]
async fn test_empty_presence_request() {
    let server = TestServer::start().await;
    let client = server.client().await;
    assert!(client.present(&[]).await.unwrap().is_empty());
}

/// The server caps a single presence request; the client sees the status.
#[tokio::test]
async fn test_oversized_presence_request_is_rejected() {
    let server = TestServer::start().await;
    let client = server.client().await;

    let err = client
        .present(&references(MAX_PRESENCE_REFERENCES + 1))
        .await
        .unwrap_err();
    assert!(matches!(err, NetworkError::Status { status: 413, .. }));

    // paging under the cap makes the same set acceptable
    let checker = PresenceChecker::new(Arc::new(client), MAX_PRESENCE_REFERENCES);
    let query: BTreeSet<ContentReference> =
        references(MAX_PRESENCE_REFERENCES + 1).into_iter().collect();
    let map = checker.check(&query).await.unwrap();
    assert!(map.values().all(|p| *p == Presence::Absent));
}
