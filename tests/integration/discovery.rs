use crate::*;

use camli_upload::NetworkError;

#[tokio::test]
async fn test_discovery_authorizes_client() {
    let mut state = BlobState::new(Storage::memory());
    state.owner_name = Some("integration".to_string());
    let server = TestServer::with_state(state).await;

    let mut store = HttpBlobStore::new(&server.store_config()).unwrap();
    assert!(!store.is_authorized());

    let discovery = store.discover().await.unwrap();
    assert!(store.is_authorized());
    assert_eq!(discovery.blob_root, "/bs/");
    assert_eq!(discovery.owner_name.as_deref(), Some("integration"));
    assert_eq!(
        store.blob_root().as_str(),
        format!("{}/bs/", server.url)
    );
}

/// A custom configured blob root is replaced by the advertised one.
#[tokio::test]
async fn test_discovery_overrides_configured_blob_root() {
    let server = TestServer::start().await;
    let mut config = server.store_config();
    config.blob_root = "/wrong/".to_string();

    let mut store = HttpBlobStore::new(&config).unwrap();
    assert!(store.blob_root().as_str().ends_with("/wrong/"));
    store.discover().await.unwrap();
    assert!(store.blob_root().as_str().ends_with("/bs/"));
}

#[tokio::test]
async fn test_discovery_against_wrong_endpoint_fails() {
    let server = TestServer::start().await;
    let mut config = server.store_config();
    // stats answers JSON, just not a discovery document
    config.url = server.url_for("/bs/stats");

    let mut store = HttpBlobStore::new(&config).unwrap();
    let err = store.discover().await.unwrap_err();
    assert!(matches!(err, NetworkError::Decode(_)));
    assert!(!store.is_authorized());
}

#[tokio::test]
async fn test_discovery_with_server_down() {
    let server = TestServer::start().await;
    let config = server.store_config();
    server.stop().await;

    let mut store = HttpBlobStore::new(&config).unwrap();
    let err = store.discover().await.unwrap_err();
    assert!(matches!(err, NetworkError::Unreachable(_)));
    assert!(!store.is_authorized());
}
