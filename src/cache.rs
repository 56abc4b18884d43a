use std::collections::HashMap;

use log::debug;

use crate::blobref::{canonical_hash, BlobRef, HashName};
use crate::dirent::Blob;
use crate::error::Result;

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// One slot in the blob cache.
///
/// An entry is *valid* once its node content is populated, and *dirty*
/// while that content has not yet been flushed to durable storage by the
/// external backend. An invalid entry is a placeholder for a load that has
/// been requested but has not arrived.
#[derive(Debug, Default)]
pub struct CacheEntry {
    blob: Option<Blob>,
    dirty: bool,
    content_store: bool,
    last_access: u64,
}

impl CacheEntry {
    /// Create an empty (not yet valid) placeholder entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry already populated with `blob` (valid, clean).
    pub fn with_blob(blob: Blob) -> Self {
        Self {
            blob: Some(blob),
            ..Self::default()
        }
    }

    /// Whether the node content is populated.
    pub fn get_valid(&self) -> bool {
        self.blob.is_some()
    }

    /// Whether the content awaits a flush to durable storage.
    pub fn get_dirty(&self) -> bool {
        self.dirty
    }

    /// Fill a freshly created entry, making it valid.
    pub fn set_blob(&mut self, blob: Blob) {
        self.blob = Some(blob);
    }

    /// Set or clear the dirty bit. The flush backend clears it when the
    /// content reaches durable storage.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Ask the cache's backend to enqueue this entry for an asynchronous
    /// flush to the content store.
    pub fn mark_content_store(&mut self) {
        self.content_store = true;
    }

    /// Whether a content-store flush has been requested.
    pub fn content_store(&self) -> bool {
        self.content_store
    }

    /// The node, if the entry is valid.
    pub fn blob(&self) -> Option<&Blob> {
        self.blob.as_ref()
    }

    /// Epoch of the last lookup that touched this entry.
    pub fn last_access(&self) -> u64 {
        self.last_access
    }
}

// ---------------------------------------------------------------------------
// BlobCache
// ---------------------------------------------------------------------------

/// Counters reported by [`BlobCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Total entries, placeholders included.
    pub count: usize,
    /// Entries with populated content.
    pub valid: usize,
    /// Entries awaiting a flush.
    pub dirty: usize,
}

/// In-memory content-addressed map of tree nodes.
///
/// The cache owns all node memory it tracks; commits hold only refs into
/// it. Loads from and flushes to durable storage are driven externally:
/// a load backend fills placeholder entries via [`BlobCache::store_blob`]
/// (or [`CacheEntry::set_blob`]), and a flush backend clears dirty bits.
#[derive(Debug, Default)]
pub struct BlobCache {
    entries: HashMap<BlobRef, CacheEntry>,
}

impl BlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, placeholders included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, blobref: &BlobRef) -> bool {
        self.entries.contains_key(blobref)
    }

    /// Look up an entry, touching its last-access epoch.
    ///
    /// Never allocates a node.
    pub fn lookup(&mut self, blobref: &BlobRef, current_epoch: u64) -> Option<&mut CacheEntry> {
        let entry = self.entries.get_mut(blobref)?;
        entry.last_access = current_epoch;
        Some(entry)
    }

    /// Look up and return the node only if the entry exists and is valid.
    pub fn lookup_and_get(&mut self, blobref: &BlobRef, current_epoch: u64) -> Option<&Blob> {
        self.lookup(blobref, current_epoch)
            .and_then(|e| e.blob.as_ref())
    }

    /// Place a fresh entry under `blobref`. No-op if an entry is already
    /// present; ref equality implies content equality, so the first entry
    /// is as good as any.
    pub fn insert(&mut self, blobref: BlobRef, entry: CacheEntry) {
        self.entries.entry(blobref).or_insert(entry);
    }

    /// Hash `blob` and store it as a valid, clean entry, returning its ref.
    ///
    /// This is how a load backend satisfies a missing-ref request, and how
    /// tests seed a root tree. If a placeholder already exists under the
    /// computed ref it is filled; a valid entry is left untouched.
    pub fn store_blob(&mut self, hash_name: HashName, blob: Blob) -> Result<BlobRef> {
        let blobref = canonical_hash(hash_name, &blob)?;
        let entry = self.entries.entry(blobref.clone()).or_default();
        if !entry.get_valid() {
            entry.set_blob(blob);
        }
        Ok(blobref)
    }

    /// Drop valid, clean entries not accessed within `max_age` epochs.
    ///
    /// Dirty entries and placeholders with loads in flight are never
    /// expired. Returns the number of entries removed.
    pub fn expire_entries(&mut self, current_epoch: u64, max_age: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| {
            e.dirty || !e.get_valid() || current_epoch.saturating_sub(e.last_access) <= max_age
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("expired {removed} cache entries at epoch {current_epoch}");
        }
        removed
    }

    /// Counters for the stats surface.
    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats {
            count: self.entries.len(),
            ..CacheStats::default()
        };
        for e in self.entries.values() {
            if e.get_valid() {
                stats.valid += 1;
            }
            if e.dirty {
                stats.dirty += 1;
            }
        }
        stats
    }
}
