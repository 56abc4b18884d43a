use std::mem;

use log::{debug, trace, warn};

use crate::blobref::{canonical_hash, BlobRef, HashName};
use crate::cache::{BlobCache, CacheEntry};
use crate::dirent::{value_len, Blob, Dirent, Directory, INLINE_VALUE_MAX};
use crate::error::{Error, Result};
use crate::fence::FenceRef;
use crate::keys;

// ---------------------------------------------------------------------------
// States and outcomes
// ---------------------------------------------------------------------------

/// Phase of an in-flight apply. States advance in declaration order; every
/// state may additionally stall with a [`ProcessOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommitState {
    Init,
    LoadRoot,
    ApplyOps,
    Store,
    PreFinished,
    Finished,
}

/// What one [`Commit::process`] call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The commit computed a new root; [`Commit::newroot_ref`] is set.
    Finished,
    /// One or more refs are absent from the cache. Drain them with
    /// [`Commit::iter_missing_refs`], request their load, then call
    /// `process` again.
    LoadMissingRefs,
    /// The new root was hashed and inserted but entries are still dirty.
    /// Drain them with [`Commit::iter_dirty_cache_entries`], await the
    /// flush, then call `process` again.
    DirtyCacheEntries,
    /// The commit is terminal; [`Commit::error`] holds the cause.
    Error,
}

enum WalkStatus {
    Applied,
    Missing(BlobRef),
}

// ---------------------------------------------------------------------------
// Commit
// ---------------------------------------------------------------------------

/// A single in-flight apply of one eligible fence against a tree root.
///
/// The commit owns a working copy of the root directory until the store
/// phase hands the finished nodes to the cache. Progress is cooperative:
/// [`Commit::process`] never blocks; whenever tree nodes it needs are not
/// yet cached, or freshly stored nodes are not yet flushed, it parks the
/// refs in question and returns a stall outcome for the driver to service.
#[derive(Debug)]
pub struct Commit {
    fence: FenceRef,
    state: CommitState,
    err: Option<Error>,
    blocked: bool,
    rootcpy: Option<Directory>,
    newroot: Option<BlobRef>,
    missing_refs: Vec<BlobRef>,
    dirty_refs: Vec<BlobRef>,
    hash_name: HashName,
    link_depth_max: u32,
    noop_stores: u64,
}

impl Commit {
    pub(crate) fn new(fence: FenceRef, hash_name: HashName, link_depth_max: u32) -> Self {
        Self {
            fence,
            state: CommitState::Init,
            err: None,
            blocked: false,
            rootcpy: None,
            newroot: None,
            missing_refs: Vec::new(),
            dirty_refs: Vec::new(),
            hash_name,
            link_depth_max,
            noop_stores: 0,
        }
    }

    /// The fence this commit applies.
    pub fn fence(&self) -> &FenceRef {
        &self.fence
    }

    pub fn state(&self) -> CommitState {
        self.state
    }

    /// The error that made this commit terminal, if any.
    pub fn error(&self) -> Option<&Error> {
        self.err.as_ref()
    }

    /// Whether the last `process` call stalled. A blocked commit keeps its
    /// place at the head of the ready queue but is not reported ready.
    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// The new root ref. Defined only once the commit is finished.
    pub fn newroot_ref(&self) -> Option<&BlobRef> {
        match self.state {
            CommitState::Finished => self.newroot.as_ref(),
            _ => None,
        }
    }

    pub(crate) fn noop_stores(&self) -> u64 {
        self.noop_stores
    }

    pub(crate) fn reset_noop_stores(&mut self) {
        self.noop_stores = 0;
    }

    fn fence_name(&self) -> String {
        self.fence.borrow().name().to_string()
    }

    // -----------------------------------------------------------------------
    // The state machine
    // -----------------------------------------------------------------------

    /// Advance the commit as far as the cache allows.
    ///
    /// Falling through every state in one call is the normal path. A stall
    /// outcome parks items for the driver; re-entering without draining
    /// them returns the same stall outcome. After an [`ProcessOutcome::Error`]
    /// outcome the commit is terminal and every further call returns
    /// `Error`. `Finished` is absorbing.
    pub fn process(
        &mut self,
        cache: &mut BlobCache,
        current_epoch: u64,
        root_ref: &BlobRef,
    ) -> ProcessOutcome {
        if self.err.is_some() {
            return ProcessOutcome::Error;
        }
        match self.advance(cache, current_epoch, root_ref) {
            Ok(outcome) => {
                self.blocked = matches!(
                    outcome,
                    ProcessOutcome::LoadMissingRefs | ProcessOutcome::DirtyCacheEntries
                );
                outcome
            }
            Err(e) => {
                warn!("commit {}: {e}", self.fence_name());
                self.err = Some(e);
                self.blocked = false;
                ProcessOutcome::Error
            }
        }
    }

    fn advance(
        &mut self,
        cache: &mut BlobCache,
        current_epoch: u64,
        root_ref: &BlobRef,
    ) -> Result<ProcessOutcome> {
        if matches!(self.state, CommitState::Init | CommitState::LoadRoot) {
            // Parked refs left over mean the caller skipped iter_missing_refs.
            if !self.missing_refs.is_empty() {
                return Ok(ProcessOutcome::LoadMissingRefs);
            }
            self.state = CommitState::LoadRoot;

            let Some(blob) = cache.lookup_and_get(root_ref, current_epoch) else {
                self.missing_refs.push(root_ref.clone());
                return Ok(ProcessOutcome::LoadMissingRefs);
            };
            let rootdir = blob
                .as_dir()
                .ok_or_else(|| Error::not_a_directory(root_ref.as_str()))?;
            // Copy-on-write working copy: inline nodes are copied, refs are
            // copied by reference.
            self.rootcpy = Some(rootdir.clone());
            self.state = CommitState::ApplyOps;
        }

        if self.state == CommitState::ApplyOps {
            if !self.missing_refs.is_empty() {
                return Ok(ProcessOutcome::LoadMissingRefs);
            }

            // Walking key paths converts every DIRREF on the way into an
            // inline DIRVAL in the copy, so the commit is self-contained in
            // rootcpy until the unroll.
            let fence_rc = self.fence.clone();
            let fence = fence_rc.borrow();
            let rootcpy = self
                .rootcpy
                .as_mut()
                .ok_or_else(|| Error::protocol("apply phase without a root copy"))?;
            for op in fence.ops() {
                keys::validate_key(&op.key)?;
                if let Some(d) = &op.dirent {
                    d.validate()?;
                }
                match Self::link_dirent(
                    rootcpy,
                    cache,
                    current_epoch,
                    &op.key,
                    op.dirent.as_ref(),
                    self.link_depth_max,
                )? {
                    WalkStatus::Applied => {}
                    // Keep going: one pass discovers as many missing refs
                    // as possible.
                    WalkStatus::Missing(r) => self.missing_refs.push(r),
                }
            }
            drop(fence);

            if !self.missing_refs.is_empty() {
                trace!(
                    "commit {}: {} refs to load",
                    self.fence_name(),
                    self.missing_refs.len()
                );
                return Ok(ProcessOutcome::LoadMissingRefs);
            }
            self.state = CommitState::Store;
        }

        if self.state == CommitState::Store {
            let mut rootcpy = self
                .rootcpy
                .take()
                .ok_or_else(|| Error::protocol("store phase without a root copy"))?;
            Self::unroll(
                cache,
                current_epoch,
                self.hash_name,
                &mut rootcpy,
                &mut self.dirty_refs,
                &mut self.noop_stores,
            )?;
            // The root itself goes last; the cache takes ownership of the
            // now-fully-referenced tree.
            let (newroot, dirty) = Self::store_cache(
                cache,
                current_epoch,
                self.hash_name,
                Blob::Dir(rootcpy),
                &mut self.noop_stores,
            )?;
            if dirty {
                self.dirty_refs.push(newroot.clone());
            }
            self.newroot = Some(newroot);
            self.state = CommitState::PreFinished;
        }

        if self.state == CommitState::PreFinished {
            if !self.dirty_refs.is_empty() {
                return Ok(ProcessOutcome::DirtyCacheEntries);
            }
            self.state = CommitState::Finished;
            debug!(
                "commit {}: finished, newroot {}",
                self.fence_name(),
                self.newroot.as_ref().map(BlobRef::as_str).unwrap_or("?")
            );
        }

        Ok(ProcessOutcome::Finished)
    }

    // -----------------------------------------------------------------------
    // Namespace walk
    // -----------------------------------------------------------------------

    /// Install `dirent` at `key` in the working copy (or remove the entry
    /// when `dirent` is `None`), creating intermediate inline directories
    /// as needed.
    ///
    /// A `DirRef` met on the way is fetched from the cache and substituted
    /// with an inline copy; if the target is not cached the walk stops and
    /// reports the ref. A `LinkVal` rewrites the remainder of the walk by
    /// prepending its target, bounded by `link_depth_max` redirects. A
    /// non-directory at an intermediate component is overwritten with a
    /// fresh directory, unless the op is a delete, in which case the key
    /// does not exist and the op succeeds silently.
    fn link_dirent(
        rootdir: &mut Directory,
        cache: &mut BlobCache,
        current_epoch: u64,
        key: &str,
        dirent: Option<&Dirent>,
        link_depth_max: u32,
    ) -> Result<WalkStatus> {
        enum Next {
            Descend,
            MakeDir,
            Fetch(BlobRef),
            Follow(String),
            Gone,
        }

        let mut key = key.to_string();
        let mut depth: u32 = 0;

        'restart: loop {
            let mut dir: &mut Directory = &mut *rootdir;
            let mut rest: &str = &key;

            loop {
                let Some((name, tail)) = rest.split_once(keys::SEPARATOR) else {
                    // Final component: install or remove.
                    if rest.is_empty() {
                        return Err(Error::invalid_key(key.clone()));
                    }
                    match dirent {
                        Some(d) => {
                            dir.insert(rest.to_string(), d.clone());
                        }
                        None => {
                            dir.remove(rest);
                        }
                    }
                    return Ok(WalkStatus::Applied);
                };
                if name.is_empty() {
                    // Can only come from a stored link target; submitted
                    // keys were validated up front.
                    return Err(Error::invalid_key(key.clone()));
                }

                let next = match dir.get(name) {
                    Some(Dirent::DirVal(_)) => Next::Descend,
                    Some(Dirent::DirRef(r)) => Next::Fetch(r.clone()),
                    Some(Dirent::LinkVal(target)) => Next::Follow(target.clone()),
                    None | Some(Dirent::FileVal(_)) | Some(Dirent::FileRef(_)) => {
                        if dirent.is_none() {
                            Next::Gone
                        } else {
                            Next::MakeDir
                        }
                    }
                };
                match next {
                    // Deletion under a prefix that is absent or not a
                    // directory: the key does not exist, succeed silently.
                    Next::Gone => return Ok(WalkStatus::Applied),
                    Next::Follow(target) => {
                        depth += 1;
                        if depth > link_depth_max {
                            return Err(Error::link_loop(key.clone()));
                        }
                        key = keys::join_key(&target, tail);
                        continue 'restart;
                    }
                    Next::Fetch(r) => {
                        let Some(blob) = cache.lookup_and_get(&r, current_epoch) else {
                            return Ok(WalkStatus::Missing(r));
                        };
                        let sub = blob
                            .as_dir()
                            .ok_or_else(|| Error::not_a_directory(r.as_str()))?
                            .clone();
                        // Substitute an inline copy; the stored original
                        // stays untouched.
                        dir.insert(name.to_string(), Dirent::DirVal(sub));
                    }
                    Next::MakeDir => {
                        dir.insert(name.to_string(), Dirent::DirVal(Directory::new()));
                    }
                    Next::Descend => {}
                }
                dir = match dir.get_mut(name) {
                    Some(Dirent::DirVal(sub)) => sub,
                    _ => return Err(Error::protocol("walk lost its directory")),
                };
                rest = tail;
            }
        }
    }

    // -----------------------------------------------------------------------
    // Store
    // -----------------------------------------------------------------------

    /// Bottom-up pass converting every inline subdirectory into a stored
    /// `DirRef`, and every oversized inline value into a `FileRef`.
    fn unroll(
        cache: &mut BlobCache,
        current_epoch: u64,
        hash_name: HashName,
        dir: &mut Directory,
        dirty_refs: &mut Vec<BlobRef>,
        noop_stores: &mut u64,
    ) -> Result<()> {
        for ent in dir.values_mut() {
            match ent {
                Dirent::DirVal(sub) => {
                    Self::unroll(cache, current_epoch, hash_name, sub, dirty_refs, noop_stores)?;
                    let sub = mem::take(sub);
                    let (blobref, dirty) = Self::store_cache(
                        cache,
                        current_epoch,
                        hash_name,
                        Blob::Dir(sub),
                        noop_stores,
                    )?;
                    if dirty {
                        dirty_refs.push(blobref.clone());
                    }
                    *ent = Dirent::DirRef(blobref);
                }
                Dirent::FileVal(v) => {
                    if value_len(v)? <= INLINE_VALUE_MAX {
                        continue;
                    }
                    let v = mem::take(v);
                    let (blobref, dirty) = Self::store_cache(
                        cache,
                        current_epoch,
                        hash_name,
                        Blob::Value(v),
                        noop_stores,
                    )?;
                    if dirty {
                        dirty_refs.push(blobref.clone());
                    }
                    *ent = Dirent::FileRef(blobref);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Hash `blob` and publish it to the cache under its ref.
    ///
    /// A ref already valid in the cache is a no-op store: the fresh node is
    /// discarded and the counter bumps. Returns the ref and whether the
    /// entry is (still) dirty.
    fn store_cache(
        cache: &mut BlobCache,
        current_epoch: u64,
        hash_name: HashName,
        blob: Blob,
        noop_stores: &mut u64,
    ) -> Result<(BlobRef, bool)> {
        let blobref = canonical_hash(hash_name, &blob)?;
        if let Some(entry) = cache.lookup(&blobref, current_epoch) {
            if entry.get_valid() {
                *noop_stores += 1;
            } else {
                entry.set_blob(blob);
                entry.set_dirty(true);
                entry.mark_content_store();
            }
            let dirty = entry.get_dirty();
            return Ok((blobref, dirty));
        }
        let mut entry = CacheEntry::new();
        entry.set_blob(blob);
        entry.set_dirty(true);
        entry.mark_content_store();
        cache.insert(blobref.clone(), entry);
        Ok((blobref, true))
    }

    // -----------------------------------------------------------------------
    // Parked-item iterators
    // -----------------------------------------------------------------------

    /// Drain the parked missing refs, invoking `cb` for each so the driver
    /// can request a cache load.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] outside the `LoadRoot`/`ApplyOps`
    /// states. A callback error stops further callbacks; the queue is
    /// drained either way and the first error is returned.
    pub fn iter_missing_refs<F>(&mut self, cb: F) -> Result<()>
    where
        F: FnMut(&BlobRef) -> Result<()>,
    {
        if !matches!(self.state, CommitState::LoadRoot | CommitState::ApplyOps) {
            return Err(Error::protocol(format!(
                "iter_missing_refs in state {:?}",
                self.state
            )));
        }
        Self::drain(&mut self.missing_refs, cb)
    }

    /// Drain the parked dirty entries, invoking `cb` with each ref so the
    /// driver can await its flush.
    ///
    /// # Errors
    /// Returns [`Error::Protocol`] outside the `PreFinished` state. A
    /// callback error stops further callbacks; the queue is drained either
    /// way and the first error is returned.
    pub fn iter_dirty_cache_entries<F>(&mut self, cb: F) -> Result<()>
    where
        F: FnMut(&BlobRef) -> Result<()>,
    {
        if self.state != CommitState::PreFinished {
            return Err(Error::protocol(format!(
                "iter_dirty_cache_entries in state {:?}",
                self.state
            )));
        }
        Self::drain(&mut self.dirty_refs, cb)
    }

    fn drain<F>(items: &mut Vec<BlobRef>, mut cb: F) -> Result<()>
    where
        F: FnMut(&BlobRef) -> Result<()>,
    {
        let mut result = Ok(());
        for r in items.drain(..) {
            if result.is_ok() {
                result = cb(&r);
            }
        }
        result
    }
}
