use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::blobref::HashName;
use crate::commit::{Commit, CommitState};
use crate::error::{Error, Result};
use crate::fence::{Fence, FenceRef, FENCE_NO_MERGE};

/// Default bound on symbolic-link redirects during one key walk.
pub const DEFAULT_LINK_DEPTH_MAX: u32 = 32;

/// Options for creating a [`CommitMgr`].
#[derive(Debug, Clone)]
pub struct MgrOptions {
    /// Hash algorithm family for refs produced by commits.
    pub hash_name: HashName,
    /// Symbolic-link redirects allowed per walk before the commit fails
    /// with a link-loop error.
    pub link_depth_max: u32,
}

impl Default for MgrOptions {
    fn default() -> Self {
        Self {
            hash_name: HashName::default(),
            link_depth_max: DEFAULT_LINK_DEPTH_MAX,
        }
    }
}

// ---------------------------------------------------------------------------
// CommitMgr
// ---------------------------------------------------------------------------

/// Registry of active fences and FIFO queue of commits ready to run.
///
/// Fences register under their primary name, accumulate participant
/// contributions, and once eligible are wrapped in a [`Commit`] and
/// appended to the ready queue. The head of the queue is processed in
/// place by the driver until it finishes; apply order across commits is
/// queue order.
#[derive(Debug)]
pub struct CommitMgr {
    hash_name: HashName,
    link_depth_max: u32,
    fences: HashMap<String, FenceRef>,
    ready: VecDeque<Commit>,
    /// No-op stores of commits already removed; in-flight commits carry
    /// their own counts.
    noop_stores: u64,
}

impl Default for CommitMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl CommitMgr {
    pub fn new() -> Self {
        Self::with_options(MgrOptions::default())
    }

    pub fn with_options(options: MgrOptions) -> Self {
        Self {
            hash_name: options.hash_name,
            link_depth_max: options.link_depth_max,
            fences: HashMap::new(),
            ready: VecDeque::new(),
            noop_stores: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Fence registry
    // -----------------------------------------------------------------------

    /// Register `fence` by its primary name and return the shared handle
    /// the outer layer appends contributions through.
    ///
    /// # Errors
    /// Returns [`Error::FenceExists`] if the name is taken.
    pub fn add_fence(&mut self, fence: Fence) -> Result<FenceRef> {
        if self.fences.contains_key(fence.name()) {
            return Err(Error::fence_exists(fence.name()));
        }
        let name = fence.name().to_string();
        let fence: FenceRef = Rc::new(RefCell::new(fence));
        self.fences.insert(name, Rc::clone(&fence));
        Ok(fence)
    }

    pub fn lookup_fence(&self, name: &str) -> Option<&FenceRef> {
        self.fences.get(name)
    }

    /// Remove a fence from the registry. When the fence is not yet wrapped
    /// in a commit, this cancels it.
    pub fn remove_fence(&mut self, name: &str) -> Option<FenceRef> {
        self.fences.remove(name)
    }

    /// Number of registered fences.
    pub fn fence_count(&self) -> usize {
        self.fences.len()
    }

    /// Wrap `fence` in a commit and append it to the ready queue, if it is
    /// now eligible. No-op (returns `false`) while contributions are still
    /// outstanding, and once the fence has already been wrapped: a fence
    /// is consumed by exactly one commit.
    pub fn process_fence_request(&mut self, fence: &FenceRef) -> bool {
        {
            let mut f = fence.borrow_mut();
            if !f.count_reached() || f.is_queued() {
                return false;
            }
            f.set_queued();
        }
        debug!("fence {}: ready", fence.borrow().name());
        self.ready.push_back(Commit::new(
            Rc::clone(fence),
            self.hash_name,
            self.link_depth_max,
        ));
        true
    }

    // -----------------------------------------------------------------------
    // Ready queue
    // -----------------------------------------------------------------------

    /// Whether the head of the ready queue exists and is not blocked on
    /// cache work.
    pub fn commits_ready(&self) -> bool {
        self.ready.front().is_some_and(|c| !c.is_blocked())
    }

    /// The head commit, if ready. The head is processed in place until it
    /// finishes; it is never handed off the queue.
    pub fn get_ready_commit(&mut self) -> Option<&mut Commit> {
        match self.ready.front_mut() {
            Some(c) if !c.is_blocked() => Some(c),
            _ => None,
        }
    }

    /// The head commit regardless of its blocked bit: the driver's resume
    /// path after the loads or flushes it was waiting on have completed.
    pub fn head_commit_mut(&mut self) -> Option<&mut Commit> {
        self.ready.front_mut()
    }

    /// Remove the head commit from the ready queue and return it.
    ///
    /// Called once the head has finished or failed; its no-op stores fold
    /// into the manager's counter. The fence stays registered until
    /// [`CommitMgr::remove_fence`].
    pub fn remove_commit(&mut self) -> Option<Commit> {
        let c = self.ready.pop_front()?;
        self.noop_stores += c.noop_stores();
        Some(c)
    }

    /// Number of commits queued, the head included.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    // -----------------------------------------------------------------------
    // Merge policy
    // -----------------------------------------------------------------------

    /// Fold adjacent mergeable commits into the head of the ready queue.
    ///
    /// The head can absorb donors only while its working copy can still
    /// take ops (no error, state at most `ApplyOps`) and its fence allows
    /// merging. Donors are offered in queue order; the first refusal ends
    /// the sweep, so only adjacent commits ever fuse. Merging past an
    /// unmergeable commit would reorder writes.
    ///
    /// A merged donor's ops live on in the head's fence; the donor commit
    /// is dropped and its fence name is released from the registry.
    pub fn merge_ready_commits(&mut self) {
        let Some(head) = self.ready.front() else {
            return;
        };
        if head.error().is_some() || head.state() > CommitState::ApplyOps {
            return;
        }
        let head_fence = Rc::clone(head.fence());
        if head_fence.borrow().flags() & FENCE_NO_MERGE != 0 {
            return;
        }

        while self.ready.len() > 1 {
            let donor_fence = Rc::clone(self.ready[1].fence());
            let merged = head_fence
                .borrow_mut()
                .try_merge(&mut donor_fence.borrow_mut());
            if !merged {
                break;
            }
            self.ready.remove(1);
            let donor_name = donor_fence.borrow().name().to_string();
            self.fences.remove(&donor_name);
            debug!(
                "fence {}: absorbed fence {donor_name}",
                head_fence.borrow().name()
            );
        }
    }

    // -----------------------------------------------------------------------
    // Observability
    // -----------------------------------------------------------------------

    /// Stores that found their ref already valid in the cache, across all
    /// commits this manager has run or is running.
    pub fn noop_stores(&self) -> u64 {
        self.noop_stores + self.ready.iter().map(Commit::noop_stores).sum::<u64>()
    }

    pub fn clear_noop_stores(&mut self) {
        self.noop_stores = 0;
        for c in &mut self.ready {
            c.reset_noop_stores();
        }
    }
}
