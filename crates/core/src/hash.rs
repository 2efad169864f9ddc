//! Content hash types and the swappable hashing algorithm.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use xxhash_rust::xxh3::Xxh3;

/// Algorithm used to derive content hashes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// 128-bit XXH3. Fast, non-cryptographic.
    #[default]
    #[serde(rename = "xxh3-128")]
    Xxh3_128,
    /// SHA-256.
    #[serde(rename = "sha256")]
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xxh3_128 => "xxh3-128",
            Self::Sha256 => "sha256",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "xxh3-128" => Ok(Self::Xxh3_128),
            "sha256" => Ok(Self::Sha256),
            other => Err(crate::Error::InvalidHash(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }

    /// Digest length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Self::Xxh3_128 => 16,
            Self::Sha256 => 32,
        }
    }

    /// Create an incremental hasher for this algorithm.
    pub fn hasher(&self) -> ContentHasher {
        match self {
            Self::Xxh3_128 => ContentHasher::Xxh3(Box::new(Xxh3::new())),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content hash: the sole identity of a payload.
///
/// The text form is `<algorithm>:<hex>` so the algorithm that produced a
/// stored hash can always be recovered.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContentHash {
    algorithm: HashAlgorithm,
    digest: Vec<u8>,
}

impl ContentHash {
    /// Compute the hash of an in-memory buffer.
    pub fn compute(algorithm: HashAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.digest
    }

    /// Encode the digest as lowercase hex (without algorithm prefix).
    pub fn to_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse the `<algorithm>:<hex>` text form.
    pub fn parse(s: &str) -> crate::Result<Self> {
        let (algorithm, hex) = s.split_once(':').ok_or_else(|| {
            crate::Error::InvalidHash(format!("expected <algorithm>:<hex>, got {s:?}"))
        })?;
        let algorithm = HashAlgorithm::parse(algorithm)?;
        Self::from_hex(algorithm, hex)
    }

    /// Parse a bare hex digest for a known algorithm.
    pub fn from_hex(algorithm: HashAlgorithm, s: &str) -> crate::Result<Self> {
        let expected = algorithm.digest_len() * 2;
        if s.len() != expected {
            return Err(crate::Error::InvalidHash(format!(
                "expected {expected} hex chars, got {}",
                s.len()
            )));
        }
        let mut digest = Vec::with_capacity(algorithm.digest_len());
        for chunk in s.as_bytes().chunks(2) {
            let hex_str =
                std::str::from_utf8(chunk).map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
            digest.push(
                u8::from_str_radix(hex_str, 16)
                    .map_err(|e| crate::Error::InvalidHash(e.to_string()))?,
            );
        }
        Ok(Self { algorithm, digest })
    }
}

impl std::str::FromStr for ContentHash {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}:{})", self.algorithm, &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Incremental hasher over a streamed payload.
pub enum ContentHasher {
    Xxh3(Box<Xxh3>),
    Sha256(Sha256),
}

impl ContentHasher {
    /// Update the hasher with data.
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Xxh3(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> ContentHash {
        match self {
            Self::Xxh3(h) => ContentHash {
                algorithm: HashAlgorithm::Xxh3_128,
                digest: h.digest128().to_be_bytes().to_vec(),
            },
            Self::Sha256(h) => ContentHash {
                algorithm: HashAlgorithm::Sha256,
                digest: h.finalize().to_vec(),
            },
        }
    }
}
