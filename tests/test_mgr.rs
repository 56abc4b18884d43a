mod common;

use common::*;
use refstore::*;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[test]
fn add_fence_rejects_duplicate_name() {
    let mut mgr = CommitMgr::new();
    mgr.add_fence(Fence::new("f", 1, 0).unwrap()).unwrap();
    let err = mgr.add_fence(Fence::new("f", 1, 0).unwrap()).unwrap_err();
    assert!(matches!(err, Error::FenceExists(_)));
    assert_eq!(mgr.fence_count(), 1);
}

#[test]
fn lookup_fence_finds_registered() {
    let mut mgr = CommitMgr::new();
    mgr.add_fence(Fence::new("f", 1, 0).unwrap()).unwrap();
    assert!(mgr.lookup_fence("f").is_some());
    assert!(mgr.lookup_fence("g").is_none());
}

#[test]
fn remove_fence_cancels_unwrapped() {
    let mut mgr = CommitMgr::new();
    mgr.add_fence(Fence::new("f", 2, 0).unwrap()).unwrap();
    assert!(mgr.remove_fence("f").is_some());
    assert!(mgr.lookup_fence("f").is_none());
    assert_eq!(mgr.ready_len(), 0);
    assert!(mgr.remove_fence("f").is_none());
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

#[test]
fn fence_waits_for_all_participants() {
    init_logging();
    let mut mgr = CommitMgr::new();
    let fence = mgr.add_fence(Fence::new("f", 2, 0).unwrap()).unwrap();

    fence
        .borrow_mut()
        .add_ops(vec![Op::set("a", file("p1"))])
        .unwrap();
    assert!(!mgr.process_fence_request(&fence));
    assert_eq!(mgr.ready_len(), 0);
    assert!(!mgr.commits_ready());

    fence
        .borrow_mut()
        .add_ops(vec![Op::set("a", file("p2"))])
        .unwrap();
    assert!(mgr.process_fence_request(&fence));
    assert_eq!(mgr.ready_len(), 1);
    assert!(mgr.commits_ready());
}

#[test]
fn fence_is_wrapped_exactly_once() {
    let mut mgr = CommitMgr::new();
    let fence = mgr.add_fence(Fence::new("f", 1, 0).unwrap()).unwrap();
    fence
        .borrow_mut()
        .add_ops(vec![Op::set("a", file("v"))])
        .unwrap();

    assert!(mgr.process_fence_request(&fence));
    assert!(!mgr.process_fence_request(&fence));
    assert_eq!(mgr.ready_len(), 1);
}

#[test]
fn later_participant_wins_on_overlap() {
    init_logging();
    let mut cache = BlobCache::new();
    let root = seed_root(&mut cache, Directory::new());
    let mut mgr = CommitMgr::new();

    let fence = mgr.add_fence(Fence::new("f", 2, 0).unwrap()).unwrap();
    fence
        .borrow_mut()
        .add_ops(vec![Op::set("a", file("p1"))])
        .unwrap();
    mgr.process_fence_request(&fence);
    fence
        .borrow_mut()
        .add_ops(vec![Op::set("a", file("p2"))])
        .unwrap();
    mgr.process_fence_request(&fence);

    let newroot = run_head_commit(&mut mgr, &mut cache, 1, &root);
    assert_eq!(read_key(&mut cache, &newroot, "a"), Some(file("p2")));
}

// ---------------------------------------------------------------------------
// Ready queue
// ---------------------------------------------------------------------------

#[test]
fn empty_queue_is_not_ready() {
    let mut mgr = CommitMgr::new();
    assert!(!mgr.commits_ready());
    assert!(mgr.get_ready_commit().is_none());
    assert!(mgr.head_commit_mut().is_none());
    assert!(mgr.remove_commit().is_none());
}

#[test]
fn queue_preserves_submission_order() {
    let (mut cache, mut mgr) = (BlobCache::new(), CommitMgr::new());
    init_logging();
    let root = seed_root(&mut cache, Directory::new());

    queue_fence_with_flags(&mut mgr, "f1", FENCE_NO_MERGE, vec![Op::set("a", file("1"))]);
    queue_fence_with_flags(&mut mgr, "f2", FENCE_NO_MERGE, vec![Op::set("a", file("2"))]);
    assert_eq!(mgr.ready_len(), 2);

    let r1 = run_head_commit(&mut mgr, &mut cache, 1, &root);
    assert_eq!(read_key(&mut cache, &r1, "a"), Some(file("1")));
    assert_eq!(mgr.ready_len(), 1);

    let r2 = run_head_commit(&mut mgr, &mut cache, 2, &r1);
    assert_eq!(read_key(&mut cache, &r2, "a"), Some(file("2")));
    assert_eq!(mgr.ready_len(), 0);
}

#[test]
fn fence_outlives_its_commit() {
    let (mut cache, mut mgr) = (BlobCache::new(), CommitMgr::new());
    init_logging();
    let root = seed_root(&mut cache, Directory::new());

    queue_fence(&mut mgr, "f", vec![Op::set("a", file("v"))]);
    run_head_commit(&mut mgr, &mut cache, 1, &root);

    // The commit is gone but the fence stays registered until removed.
    assert_eq!(mgr.ready_len(), 0);
    assert!(mgr.lookup_fence("f").is_some());
    mgr.remove_fence("f");
    assert_eq!(mgr.fence_count(), 0);
}

// ---------------------------------------------------------------------------
// No-op store counter
// ---------------------------------------------------------------------------

#[test]
fn noop_counter_survives_commit_removal() {
    let (mut cache, mut mgr) = (BlobCache::new(), CommitMgr::new());
    init_logging();
    let root = seed_root(&mut cache, Directory::new());

    queue_fence(&mut mgr, "f1", vec![Op::set("a.b", file("x"))]);
    let root1 = run_head_commit(&mut mgr, &mut cache, 1, &root);
    assert_eq!(mgr.noop_stores(), 0);

    queue_fence(&mut mgr, "f2", vec![Op::set("a.b", file("x"))]);
    run_head_commit(&mut mgr, &mut cache, 2, &root1);
    assert_eq!(mgr.noop_stores(), 2);

    mgr.clear_noop_stores();
    assert_eq!(mgr.noop_stores(), 0);
}

#[test]
fn noop_counter_visible_while_commit_in_flight() {
    let (mut cache, mut mgr) = (BlobCache::new(), CommitMgr::new());
    init_logging();
    let root = seed_root(&mut cache, Directory::new());

    queue_fence(&mut mgr, "f1", vec![Op::set("a.b", file("x"))]);
    let root1 = run_head_commit(&mut mgr, &mut cache, 1, &root);

    // The second, identical commit stalls on nothing and finishes in one
    // call; read the counter before removing it from the queue.
    queue_fence(&mut mgr, "f2", vec![Op::set("a.b", file("x"))]);
    let c = mgr.head_commit_mut().unwrap();
    assert_eq!(c.process(&mut cache, 2, &root1), ProcessOutcome::Finished);
    assert_eq!(mgr.noop_stores(), 2);

    mgr.remove_commit();
    assert_eq!(mgr.noop_stores(), 2);
}
