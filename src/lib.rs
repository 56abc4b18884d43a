//! Commit engine for a content-addressed hierarchical key-value store.
//!
//! `refstore` applies batches of key/value operations to an immutable
//! Merkle tree of directory and value blobs, producing a new root ref per
//! batch while coordinating with a blob cache whose contents arrive
//! asynchronously. It is the core of a distributed store: writers submit
//! *fences* (batches aggregated from one or more participants), the
//! manager queues them, and a resumable state machine applies each one,
//! stalling and resuming as often as needed whenever tree nodes it
//! requires are not yet cached.
//!
//! # Key types
//!
//! - [`CommitMgr`] — registry of active fences, FIFO ready queue of
//!   commits, merge policy.
//! - [`Commit`] — one in-flight apply; driven by repeated
//!   [`Commit::process`] calls that either finish, fail, or stall with a
//!   list of parked cache work.
//! - [`Fence`] — a named, ordered operation batch with participant
//!   counting and a merge predicate.
//! - [`BlobCache`] — in-memory content-addressed node map shared with the
//!   rest of the host.
//! - [`Dirent`] / [`BlobRef`] — the tree node model and the content hash
//!   that links nodes together.
//!
//! # Quick example
//!
//! ```rust
//! use refstore::{
//!     BlobCache, Blob, CommitMgr, Dirent, Directory, Fence, HashName, Op, ProcessOutcome,
//! };
//!
//! let mut cache = BlobCache::new();
//! let root = cache
//!     .store_blob(HashName::Sha256, Blob::Dir(Directory::new()))
//!     .unwrap();
//!
//! let mut mgr = CommitMgr::new();
//! let fence = mgr.add_fence(Fence::new("put", 1, 0).unwrap()).unwrap();
//! fence
//!     .borrow_mut()
//!     .add_ops(vec![Op::set("a.b", Dirent::FileVal("x".into()))])
//!     .unwrap();
//! mgr.process_fence_request(&fence);
//!
//! let commit = mgr.get_ready_commit().unwrap();
//! let mut outcome = commit.process(&mut cache, 1, &root);
//! while outcome == ProcessOutcome::DirtyCacheEntries {
//!     // Normally the cache backend flushes asynchronously; here we clear
//!     // the dirty bits ourselves.
//!     let mut flushed = Vec::new();
//!     commit
//!         .iter_dirty_cache_entries(|r| {
//!             flushed.push(r.clone());
//!             Ok(())
//!         })
//!         .unwrap();
//!     for r in &flushed {
//!         cache.lookup(r, 1).unwrap().set_dirty(false);
//!     }
//!     outcome = commit.process(&mut cache, 1, &root);
//! }
//! assert_eq!(outcome, ProcessOutcome::Finished);
//! assert!(commit.newroot_ref().is_some());
//! ```

pub mod blobref;
pub mod cache;
pub mod commit;
pub mod dirent;
pub mod error;
pub mod fence;
pub mod keys;
pub mod mgr;

// Re-export primary public types at crate root.
pub use blobref::{canonical_hash, BlobRef, HashName};
pub use cache::{BlobCache, CacheEntry, CacheStats};
pub use commit::{Commit, CommitState, ProcessOutcome};
pub use dirent::{Blob, Dirent, Directory, Value, INLINE_VALUE_MAX};
pub use error::{Error, Result};
pub use fence::{Fence, FenceRef, Op, FENCE_NO_MERGE};
pub use mgr::{CommitMgr, MgrOptions, DEFAULT_LINK_DEPTH_MAX};
