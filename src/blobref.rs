use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use crate::dirent::Blob;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// HashName
// ---------------------------------------------------------------------------

/// Hash algorithm family used to derive blob references.
///
/// The printable prefix of every [`BlobRef`] names the algorithm that
/// produced it, so refs from different families never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HashName {
    /// SHA-256 (`sha256-<64 hex>`).
    #[default]
    Sha256,
}

impl HashName {
    /// The printable algorithm tag (the part before the `-`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
        }
    }

    /// Width of the hex digest portion of a ref for this algorithm.
    pub fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            _ => Err(Error::unknown_hash(s)),
        }
    }
}

// ---------------------------------------------------------------------------
// BlobRef
// ---------------------------------------------------------------------------

/// A content hash identifying a stored tree node.
///
/// Printable, fixed width per algorithm (`sha256-<64 hex>`). Equality of
/// refs implies byte-equality of the canonical serialization they were
/// derived from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct BlobRef(String);

impl BlobRef {
    /// Derive a ref from raw bytes using `name`'s digest.
    pub fn from_bytes(name: HashName, data: &[u8]) -> Self {
        use fmt::Write;

        let digest = match name {
            HashName::Sha256 => Sha256::digest(data),
        };
        let mut s = String::with_capacity(name.as_str().len() + 1 + name.hex_len());
        s.push_str(name.as_str());
        s.push('-');
        for b in digest {
            let _ = write!(s, "{b:02x}");
        }
        Self(s)
    }

    /// The printable form, e.g. `"sha256-9f86d0…"`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The algorithm family that produced this ref.
    pub fn hash_name(&self) -> HashName {
        // Refs are only constructed through from_bytes or a validating
        // parse, so the prefix is always a known algorithm tag.
        let tag = self.0.split('-').next().unwrap_or_default();
        tag.parse().unwrap_or_default()
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobRef {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (tag, hex) = s
            .split_once('-')
            .ok_or_else(|| Error::invalid_blobref(s))?;
        let name: HashName = tag
            .parse()
            .map_err(|_| Error::invalid_blobref(s))?;
        if hex.len() != name.hex_len() {
            return Err(Error::invalid_blobref(s));
        }
        if !hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(Error::invalid_blobref(s));
        }
        Ok(Self(s.to_string()))
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Canonical hashing
// ---------------------------------------------------------------------------

/// Hash a blob's canonical serialization into a [`BlobRef`].
///
/// Canonical means sorted entry names and stable variant tags; two blobs
/// with equal content always produce the same ref, independent of how they
/// were built up in memory.
pub fn canonical_hash(name: HashName, blob: &Blob) -> Result<BlobRef> {
    let bytes = serde_json::to_vec(blob)?;
    Ok(BlobRef::from_bytes(name, &bytes))
}
