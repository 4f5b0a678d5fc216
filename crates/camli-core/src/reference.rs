//! Content references: the names blobs go by.
//!
//! A reference is `<algorithm>-<lowercase hex digest>`:
//!   sha224-d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f
//!
//! Identical bytes always produce the identical reference. Nothing about the
//! host (memory addresses, locale, clock) feeds into the digest, so references
//! are stable across restarts and platforms.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};

use crate::config::ConfigError;

// ── Digest algorithms ─────────────────────────────────────────────────────────

/// Digest used to derive references.
///
/// `Sha224` is the blob store's canonical blobref digest. `Blake3` is faster
/// and accepted by stores that advertise it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha224,
    Blake3,
}

impl DigestAlgorithm {
    /// Prefix used in the textual reference.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha224 => "sha224",
            Self::Blake3 => "blake3",
        }
    }

    /// Raw digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Sha224 => 28,
            Self::Blake3 => 32,
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha224" => Some(Self::Sha224),
            "blake3" => Some(Self::Blake3),
            _ => None,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsing a configured digest name. An unknown name means the digest
/// primitive is unavailable, which is a configuration error.
impl FromStr for DigestAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(&s.trim().to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownDigest(s.to_string()))
    }
}

// ── ContentReference ──────────────────────────────────────────────────────────

/// Why a string is not a valid reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReference {
    #[error("missing '-' between algorithm and digest in {0:?}")]
    MissingSeparator(String),
    #[error("unknown digest algorithm {0:?}")]
    UnknownAlgorithm(String),
    #[error("{algorithm} digest must be {expected} hex chars, got {actual}")]
    BadLength {
        algorithm: DigestAlgorithm,
        expected: usize,
        actual: usize,
    },
    #[error("digest is not lowercase hex: {0:?}")]
    NotHex(String),
}

/// An immutable content reference.
///
/// Constructed only by hashing bytes ([`Hasher::reference`]) or by parsing a
/// validated string, so every value in circulation is well-formed.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentReference(String);

impl ContentReference {
    fn from_digest(algorithm: DigestAlgorithm, digest: &[u8]) -> Self {
        Self(format!("{}-{}", algorithm.name(), hex::encode(digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        let (name, _) = self.split();
        DigestAlgorithm::from_name(name).unwrap_or_default()
    }

    /// The hex digest without the algorithm prefix.
    pub fn digest_hex(&self) -> &str {
        self.split().1
    }

    /// Abbreviated form for log lines: `sha224-d14a028c2a3a`.
    pub fn short(&self) -> &str {
        let (name, digest) = self.split();
        &self.0[..name.len() + 1 + digest.len().min(12)]
    }

    fn split(&self) -> (&str, &str) {
        self.0.split_once('-').unwrap_or((&self.0, ""))
    }
}

impl FromStr for ContentReference {
    type Err = InvalidReference;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, digest) = s
            .split_once('-')
            .ok_or_else(|| InvalidReference::MissingSeparator(s.to_string()))?;
        let algorithm = DigestAlgorithm::from_name(name)
            .ok_or_else(|| InvalidReference::UnknownAlgorithm(name.to_string()))?;

        let expected = algorithm.digest_len() * 2;
        if digest.len() != expected {
            return Err(InvalidReference::BadLength {
                algorithm,
                expected,
                actual: digest.len(),
            });
        }
        if !digest.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(InvalidReference::NotHex(digest.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ContentReference {
    type Error = InvalidReference;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentReference> for String {
    fn from(r: ContentReference) -> Self {
        r.0
    }
}

impl fmt::Display for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ContentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentReference({})", self.0)
    }
}

// ── Hasher ────────────────────────────────────────────────────────────────────

/// Computes references. Pure and total: every byte slice has a reference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hasher {
    algorithm: DigestAlgorithm,
}

impl Hasher {
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Reference of a complete payload.
    pub fn reference(&self, data: &[u8]) -> ContentReference {
        let mut h = self.incremental();
        h.update(data);
        h.finish()
    }

    /// Incremental hasher for payloads that arrive in pieces.
    ///
    /// # Example
    /// ```
    /// use camli_core::Hasher;
    /// let hasher = Hasher::default();
    /// let mut h = hasher.incremental();
    /// h.update(b"hello ");
    /// h.update(b"world");
    /// assert_eq!(h.finish(), hasher.reference(b"hello world"));
    /// ```
    pub fn incremental(&self) -> IncrementalHasher {
        match self.algorithm {
            DigestAlgorithm::Sha224 => IncrementalHasher::Sha224(Sha224::new()),
            DigestAlgorithm::Blake3 => IncrementalHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }

    /// Stream a reader through the digest without buffering it whole.
    pub fn reference_reader<R: Read>(&self, mut reader: R) -> std::io::Result<ContentReference> {
        let mut h = self.incremental();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            h.update(&buf[..n]);
        }
        Ok(h.finish())
    }
}

pub enum IncrementalHasher {
    Sha224(Sha224),
    Blake3(Box<blake3::Hasher>),
}

impl IncrementalHasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha224(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finish(self) -> ContentReference {
        match self {
            Self::Sha224(h) => ContentReference::from_digest(DigestAlgorithm::Sha224, &h.finalize()),
            Self::Blake3(h) => {
                ContentReference::from_digest(DigestAlgorithm::Blake3, h.finalize().as_bytes())
            }
        }
    }
}
