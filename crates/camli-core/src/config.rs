//! Configuration system for camli.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CAMLI_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/camli/config.toml
//!   3. ~/.config/camli/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::reference::DigestAlgorithm;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CamliConfig {
    pub store: StoreConfig,
    pub upload: UploadSettings,
    pub server: ServerConfig,
}

/// Where the blob store lives and how to talk to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Server base URL, e.g. "http://localhost:3179".
    pub url: String,
    /// Blob handler path on the server. Replaced by the advertised value
    /// after discovery.
    pub blob_root: String,
    /// Basic-auth user. Empty = no credentials sent.
    pub username: String,
    pub password: String,
    /// Per-request timeout in seconds. 0 = no timeout.
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Max simultaneous reads/transfers per batch. Must be > 0.
    pub concurrency: u32,
    /// Max references per presence request. Larger sets are paged.
    pub presence_batch_size: u32,
    /// Digest name: "sha224" or "blake3".
    pub digest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port for camli-blobd. 0 = OS-assigned.
    pub port: u16,
    pub backend: StorageBackend,
    /// Root directory for the disk backend.
    pub storage_path: PathBuf,
    /// Largest accepted blob body. 0 = unlimited.
    pub max_blob_bytes: u64,
    /// Advertised in the discovery document. Empty = omitted.
    pub owner_name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Disk,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_PORT: u16 = 3179;

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: format!("http://localhost:{}", DEFAULT_PORT),
            blob_root: "/bs/".to_string(),
            username: String::new(),
            password: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            presence_batch_size: 1000,
            digest: DigestAlgorithm::default().name().to_string(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            backend: StorageBackend::Memory,
            storage_path: data_dir().join("blobs"),
            max_blob_bytes: 64 * 1024 * 1024, // 64 MB
            owner_name: String::new(),
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("camli")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("camli")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Fatal configuration problems. Any of these aborts a batch before it starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("digest algorithm {0:?} is not available")]
    UnknownDigest(String),
    #[error("malformed store URL {0:?}: {1}")]
    InvalidUrl(String, String),
    #[error("invalid setting {0}: {1}")]
    InvalidSetting(&'static str, String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl CamliConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::file_path())
    }

    /// Load from an explicit file. A missing file means defaults; env
    /// overrides still apply.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let path = path.to_path_buf();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            CamliConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CAMLI_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&CamliConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Digest selected by `upload.digest`.
    pub fn digest(&self) -> Result<DigestAlgorithm, ConfigError> {
        self.upload.digest.parse()
    }

    /// Reject settings no batch could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.digest()?;

        let url = self.store.url.trim();
        let rest = url
            .strip_prefix("http://")
            .or_else(|| url.strip_prefix("https://"))
            .ok_or_else(|| {
                ConfigError::InvalidUrl(url.to_string(), "scheme must be http or https".into())
            })?;
        if rest.is_empty() || rest.starts_with('/') {
            return Err(ConfigError::InvalidUrl(url.to_string(), "missing host".into()));
        }

        if !self.store.blob_root.starts_with('/') || !self.store.blob_root.ends_with('/') {
            return Err(ConfigError::InvalidSetting(
                "store.blob_root",
                format!("{:?} must start and end with '/'", self.store.blob_root),
            ));
        }
        if self.upload.concurrency == 0 {
            return Err(ConfigError::InvalidSetting(
                "upload.concurrency",
                "must be at least 1".into(),
            ));
        }
        if self.upload.presence_batch_size == 0 {
            return Err(ConfigError::InvalidSetting(
                "upload.presence_batch_size",
                "must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Apply CAMLI_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("CAMLI_STORE__URL") {
            self.store.url = v;
        }
        if let Some(v) = lookup("CAMLI_STORE__USERNAME") {
            self.store.username = v;
        }
        if let Some(v) = lookup("CAMLI_STORE__PASSWORD") {
            self.store.password = v;
        }
        if let Some(v) = lookup("CAMLI_UPLOAD__CONCURRENCY") {
            if let Ok(n) = v.parse() {
                self.upload.concurrency = n;
            }
        }
        if let Some(v) = lookup("CAMLI_UPLOAD__DIGEST") {
            self.upload.digest = v;
        }
        if let Some(v) = lookup("CAMLI_SERVER__PORT") {
            if let Ok(p) = v.parse() {
                self.server.port = p;
            }
        }
        if let Some(v) = lookup("CAMLI_SERVER__STORAGE_PATH") {
            self.server.storage_path = PathBuf::from(v);
        }
    }
}
