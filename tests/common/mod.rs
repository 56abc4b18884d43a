use refstore::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An inline value entry.
pub fn file(text: &str) -> Dirent {
    Dirent::FileVal(serde_json::json!(text))
}

/// Store `dir` into the cache bottom-up (inline subdirectories become
/// refs) and return the root ref. Entries land valid and clean, as if
/// loaded from durable storage.
pub fn seed_root(cache: &mut BlobCache, dir: Directory) -> BlobRef {
    let dir = seed_dir(cache, dir);
    cache.store_blob(HashName::Sha256, Blob::Dir(dir)).unwrap()
}

fn seed_dir(cache: &mut BlobCache, mut dir: Directory) -> Directory {
    for ent in dir.values_mut() {
        if let Dirent::DirVal(sub) = ent {
            let sub = seed_dir(cache, std::mem::take(sub));
            let r = cache.store_blob(HashName::Sha256, Blob::Dir(sub)).unwrap();
            *ent = Dirent::DirRef(r);
        }
    }
    dir
}

/// Register a single-participant fence carrying `ops` and queue it.
#[allow(dead_code)]
pub fn queue_fence(mgr: &mut CommitMgr, name: &str, ops: Vec<Op>) -> FenceRef {
    queue_fence_with_flags(mgr, name, 0, ops)
}

#[allow(dead_code)]
pub fn queue_fence_with_flags(
    mgr: &mut CommitMgr,
    name: &str,
    flags: u32,
    ops: Vec<Op>,
) -> FenceRef {
    let fence = mgr.add_fence(Fence::new(name, 1, flags).unwrap()).unwrap();
    fence.borrow_mut().add_ops(ops).unwrap();
    assert!(mgr.process_fence_request(&fence));
    fence
}

/// Drive the head commit to completion, flushing dirty entries whenever it
/// asks. Panics on a missing ref (tests that exercise loads service them
/// by hand) and on a commit error.
#[allow(dead_code)]
pub fn run_head_commit(
    mgr: &mut CommitMgr,
    cache: &mut BlobCache,
    epoch: u64,
    root_ref: &BlobRef,
) -> BlobRef {
    loop {
        let c = mgr.head_commit_mut().expect("a commit on the ready queue");
        match c.process(cache, epoch, root_ref) {
            ProcessOutcome::Finished => {
                let newroot = c.newroot_ref().unwrap().clone();
                mgr.remove_commit();
                return newroot;
            }
            ProcessOutcome::LoadMissingRefs => {
                let mut missing = Vec::new();
                c.iter_missing_refs(|r| {
                    missing.push(r.clone());
                    Ok(())
                })
                .unwrap();
                panic!("refs not seeded: {missing:?}");
            }
            ProcessOutcome::DirtyCacheEntries => {
                flush_dirty(c, cache, epoch);
            }
            ProcessOutcome::Error => panic!("commit error: {:?}", c.error()),
        }
    }
}

/// Drain the commit's parked dirty entries and clear their dirty bits, as
/// the flush backend would.
#[allow(dead_code)]
pub fn flush_dirty(c: &mut Commit, cache: &mut BlobCache, epoch: u64) {
    let mut dirty = Vec::new();
    c.iter_dirty_cache_entries(|r| {
        dirty.push(r.clone());
        Ok(())
    })
    .unwrap();
    for r in &dirty {
        cache.lookup(r, epoch).unwrap().set_dirty(false);
    }
}

/// Read the entry at a dotted key, resolving directory refs through the
/// cache. Does not follow links.
#[allow(dead_code)]
pub fn read_key(cache: &mut BlobCache, root_ref: &BlobRef, key: &str) -> Option<Dirent> {
    let mut dir = cache.lookup_and_get(root_ref, 0)?.as_dir()?.clone();
    let mut parts = key.split('.').peekable();
    loop {
        let name = parts.next()?;
        let ent = dir.get(name)?.clone();
        if parts.peek().is_none() {
            return Some(ent);
        }
        dir = match ent {
            Dirent::DirVal(d) => d,
            Dirent::DirRef(r) => cache.lookup_and_get(&r, 0)?.as_dir()?.clone(),
            _ => return None,
        };
    }
}

/// Walk everything reachable from `root_ref`: every ref must resolve in
/// the cache, hash back to its key, and no stored directory may contain an
/// inline subdirectory.
#[allow(dead_code)]
pub fn check_reachable(cache: &mut BlobCache, root_ref: &BlobRef) {
    let blob = cache
        .lookup_and_get(root_ref, 0)
        .unwrap_or_else(|| panic!("unresolvable ref {root_ref}"))
        .clone();
    let rehashed = canonical_hash(root_ref.hash_name(), &blob).unwrap();
    assert_eq!(&rehashed, root_ref, "stored node must hash to its ref");
    if let Blob::Dir(dir) = blob {
        for (name, ent) in &dir {
            match ent {
                Dirent::DirRef(r) | Dirent::FileRef(r) => check_reachable(cache, r),
                Dirent::DirVal(_) => panic!("stored directory holds inline subdir {name:?}"),
                Dirent::FileVal(_) | Dirent::LinkVal(_) => {}
            }
        }
    }
}
