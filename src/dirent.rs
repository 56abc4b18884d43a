use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::blobref::BlobRef;
use crate::error::{Error, Result};
use crate::keys;

/// Inline value payload. Values are structured JSON, as produced by the
/// wire codec that ships fences between participants.
pub type Value = serde_json::Value;

/// A directory maps entry name to tree node. `BTreeMap` keeps entries
/// sorted, which makes the serialized form canonical for free.
pub type Directory = BTreeMap<String, Dirent>;

/// Maximum serialized length of a value kept inline as [`Dirent::FileVal`].
///
/// 72 bytes is the printed width of a sha256 blobref plus its algorithm
/// tag; an inline value longer than the reference that would replace it
/// saves nothing, so the unroll pass demotes it to a [`Dirent::FileRef`].
pub const INLINE_VALUE_MAX: usize = 72;

// ---------------------------------------------------------------------------
// Dirent
// ---------------------------------------------------------------------------

/// One entry in a directory.
///
/// Inline variants (`DirVal`, `FileVal`) carry their content in memory;
/// reference variants (`DirRef`, `FileRef`) point into the blob cache by
/// content hash. `LinkVal` is a symbolic redirect to another key path,
/// resolved during the namespace walk.
///
/// The serde tags are the store's wire names, so a serialized entry reads
/// `{"DIRREF": "sha256-…"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Dirent {
    /// An inline subdirectory, present in memory.
    #[serde(rename = "DIRVAL")]
    DirVal(Directory),
    /// A content hash pointing at a subdirectory blob in the cache.
    #[serde(rename = "DIRREF")]
    DirRef(BlobRef),
    /// An inline value (small).
    #[serde(rename = "FILEVAL")]
    FileVal(Value),
    /// A content hash pointing at a value blob (large).
    #[serde(rename = "FILEREF")]
    FileRef(BlobRef),
    /// A symbolic redirect to another key path.
    #[serde(rename = "LINKVAL")]
    LinkVal(String),
}

impl Dirent {
    /// Whether this entry is an inline or referenced subdirectory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::DirVal(_) | Self::DirRef(_))
    }

    /// Validate an entry received from the outside (e.g. a fence op).
    ///
    /// Checks, recursively through inline subdirectories, that entry names
    /// are non-empty and free of the key separator, and that link targets
    /// are well-formed keys.
    ///
    /// # Errors
    /// Returns [`Error::InvalidDirent`] on the first violation found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::DirVal(dir) => validate_dir(dir),
            Self::LinkVal(target) => {
                keys::normalize_key(target)
                    .map_err(|_| Error::invalid_dirent(format!("bad link target: {target:?}")))?;
                Ok(())
            }
            Self::DirRef(_) | Self::FileVal(_) | Self::FileRef(_) => Ok(()),
        }
    }
}

fn validate_dir(dir: &Directory) -> Result<()> {
    for (name, ent) in dir {
        if name.is_empty() {
            return Err(Error::invalid_dirent("empty entry name"));
        }
        if name.contains(keys::SEPARATOR) {
            return Err(Error::invalid_dirent(format!(
                "entry name contains separator: {name:?}"
            )));
        }
        ent.validate()?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Blob
// ---------------------------------------------------------------------------

/// What a cache entry holds: a directory node or a value node.
///
/// Serialization is untagged: a directory blob serializes as its entry
/// map and a value blob as the bare value, matching the store's
/// on-the-wire node layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Blob {
    Dir(Directory),
    Value(Value),
}

impl Blob {
    /// The directory, if this blob is a directory node.
    pub fn as_dir(&self) -> Option<&Directory> {
        match self {
            Self::Dir(d) => Some(d),
            Self::Value(_) => None,
        }
    }
}

/// Serialized length of a value, as counted against [`INLINE_VALUE_MAX`].
pub(crate) fn value_len(value: &Value) -> Result<usize> {
    Ok(serde_json::to_vec(value)?.len())
}
