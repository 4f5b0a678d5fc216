//! HTTP blob store client.
//!
//! Two facets on one type:
//!   - authentication: [`HttpBlobStore::discover`] runs the discovery
//!     handshake with the configured credentials and adopts the advertised
//!     blob root;
//!   - upload session: the [`BlobStore`] impl (presence + upload).

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};

use camli_core::config::StoreConfig;
use camli_core::wire::{
    Discovery, PresenceRequest, PresenceResponse, DISCOVERY_MIME, PRESENCE_PATH, UPLOAD_PATH,
};
use camli_core::{ConfigError, ContentReference};

use super::{BlobStore, UploadReceipt};
use crate::error::NetworkError;

/// Error bodies longer than this are cut before they reach logs.
const MAX_ERROR_BODY: usize = 512;

pub struct HttpBlobStore {
    client: Client,
    server: Url,
    blob_root: Url,
    credentials: Option<(String, String)>,
    authorized: bool,
}

impl HttpBlobStore {
    /// Build a client from config. Malformed URLs are configuration errors.
    pub fn new(config: &StoreConfig) -> Result<Self, ConfigError> {
        let server = Url::parse(config.url.trim())
            .map_err(|e| ConfigError::InvalidUrl(config.url.clone(), e.to_string()))?;
        if !matches!(server.scheme(), "http" | "https") || server.host_str().is_none() {
            return Err(ConfigError::InvalidUrl(
                config.url.clone(),
                "expected an http(s) URL with a host".to_string(),
            ));
        }
        let blob_root = join_root(&server, &config.blob_root)?;

        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::InvalidSetting("store", e.to_string()))?;

        let credentials = if config.username.is_empty() {
            None
        } else {
            Some((config.username.clone(), config.password.clone()))
        };

        Ok(Self {
            client,
            server,
            blob_root,
            credentials,
            authorized: false,
        })
    }

    pub fn blob_root(&self) -> &Url {
        &self.blob_root
    }

    /// True once discovery succeeded with the configured credentials.
    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    /// Fetch the discovery document and switch to the advertised blob root.
    pub async fn discover(&mut self) -> Result<Discovery, NetworkError> {
        let request = self
            .client
            .get(self.server.clone())
            .header(ACCEPT, DISCOVERY_MIME);
        let response = match send(self.authorize(request)).await {
            Ok(r) => r,
            Err(e) => {
                self.authorized = false;
                return Err(e);
            }
        };

        let discovery: Discovery = response
            .json()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        self.blob_root = join_root(&self.server, &discovery.blob_root)
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        self.authorized = true;

        tracing::info!(
            server = %self.server,
            blob_root = %self.blob_root,
            "discovery complete"
        );
        Ok(discovery)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, pass)) => request.basic_auth(user, Some(pass)),
            None => request,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, NetworkError> {
        self.blob_root
            .join(path)
            .map_err(|e| NetworkError::Decode(format!("bad endpoint {path}: {e}")))
    }
}

fn join_root(server: &Url, blob_root: &str) -> Result<Url, ConfigError> {
    let mut root = blob_root.to_string();
    if !root.ends_with('/') {
        root.push('/');
    }
    server
        .join(&root)
        .map_err(|e| ConfigError::InvalidUrl(blob_root.to_string(), e.to_string()))
}

/// Send a request and turn transport failures and non-2xx statuses other
/// than 409 into `NetworkError`.
async fn send(request: RequestBuilder) -> Result<Response, NetworkError> {
    let response = request
        .send()
        .await
        .map_err(|e| NetworkError::Unreachable(e.to_string()))?;

    let status = response.status();
    if status.is_success() || status == StatusCode::CONFLICT {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(NetworkError::Unauthorized);
    }

    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    Err(NetworkError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BlobStore for HttpBlobStore {
    async fn present(
        &self,
        references: &[ContentReference],
    ) -> Result<Vec<ContentReference>, NetworkError> {
        let url = self.endpoint(PRESENCE_PATH)?;
        let body = PresenceRequest {
            references: references.to_vec(),
        };
        let response = send(self.authorize(self.client.post(url).json(&body))).await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(NetworkError::Status {
                status: StatusCode::CONFLICT.as_u16(),
                body: "unexpected conflict on presence".to_string(),
            });
        }

        let parsed: PresenceResponse = response
            .json()
            .await
            .map_err(|e| NetworkError::Decode(e.to_string()))?;
        tracing::debug!(
            asked = references.len(),
            present = parsed.present.len(),
            "presence response"
        );
        Ok(parsed.present)
    }

    async fn upload(
        &self,
        reference: &ContentReference,
        body: Bytes,
    ) -> Result<UploadReceipt, NetworkError> {
        let url = self.endpoint(&format!("{UPLOAD_PATH}/{reference}"))?;
        let len = body.len();
        let response = send(self.authorize(self.client.put(url).body(body))).await?;

        let receipt = if response.status() == StatusCode::CONFLICT {
            UploadReceipt::AlreadyPresent
        } else {
            UploadReceipt::Created
        };
        tracing::debug!(reference = reference.short(), bytes = len, ?receipt, "blob sent");
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> StoreConfig {
        StoreConfig {
            url: url.to_string(),
            ..StoreConfig::default()
        }
    }

    #[test]
    fn endpoints_hang_off_blob_root() {
        let store = HttpBlobStore::new(&config("http://photos.local:3179")).unwrap();
        assert_eq!(store.blob_root().as_str(), "http://photos.local:3179/bs/");
        assert_eq!(
            store.endpoint(PRESENCE_PATH).unwrap().as_str(),
            "http://photos.local:3179/bs/presence"
        );
        assert!(!store.is_authorized());
    }

    #[test]
    fn blob_root_without_trailing_slash_is_normalised() {
        let mut cfg = config("https://example.net/");
        cfg.blob_root = "/storage".into();
        let store = HttpBlobStore::new(&cfg).unwrap();
        assert_eq!(store.blob_root().as_str(), "https://example.net/storage/");
    }

    #[test]
    fn malformed_url_is_config_error() {
        assert!(matches!(
            HttpBlobStore::new(&config("not a url")),
            Err(ConfigError::InvalidUrl(..))
        ));
        assert!(matches!(
            HttpBlobStore::new(&config("file:///tmp/blobs")),
            Err(ConfigError::InvalidUrl(..))
        ));
    }

    #[tokio::test]
    async fn unreachable_server_is_network_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let store = HttpBlobStore::new(&config("http://127.0.0.1:9")).unwrap();
        let reference = camli_core::Hasher::default().reference(b"x");
        let err = store.present(&[reference]).await.unwrap_err();
        assert!(matches!(err, NetworkError::Unreachable(_)));
    }
}
