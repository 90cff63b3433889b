//! Content digests used as cache keys.
//!
//! A [`Digest`] pairs a [`HashAlgorithm`] with the lowercase hex encoding of
//! the hash. Upstream manifests publish SHA-1 digests; SHA-256 is supported
//! for documents that carry stronger hashes.

use crate::core::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::io::{self, Read};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 40,
            HashAlgorithm::Sha256 => 64,
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            HashAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn digest_bytes(self, bytes: &[u8]) -> Digest {
        let mut hasher = self.hasher();
        hasher.update(bytes);
        hasher.finish()
    }

    pub fn digest_reader<R: Read>(self, mut reader: R) -> io::Result<Digest> {
        let mut hasher = self.hasher();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finish())
    }
}

/// Incremental hasher for either supported algorithm.
pub enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(bytes),
            Hasher::Sha256(h) => h.update(bytes),
        }
    }

    pub fn finish(self) -> Digest {
        match self {
            Hasher::Sha1(h) => Digest {
                algorithm: HashAlgorithm::Sha1,
                hex: hex::encode(h.finalize()),
            },
            Hasher::Sha256(h) => Digest {
                algorithm: HashAlgorithm::Sha256,
                hex: hex::encode(h.finalize()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: HashAlgorithm,
    hex: String,
}

impl Digest {
    /// Parse a hex digest, normalizing to lowercase.
    pub fn parse(algorithm: HashAlgorithm, value: &str) -> Result<Self> {
        let hex = value.trim().to_ascii_lowercase();
        if hex.len() != algorithm.hex_len() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(MirrorError::InvalidDigest {
                algorithm: algorithm.name(),
                value: value.to_string(),
            });
        }
        Ok(Self { algorithm, hex })
    }

    pub fn sha1(value: &str) -> Result<Self> {
        Self::parse(HashAlgorithm::Sha1, value)
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Shard prefix (first two hex characters)
    pub fn prefix(&self) -> &str {
        &self.hex[..2]
    }

    pub fn rest(&self) -> &str {
        &self.hex[2..]
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex)
    }
}
