//! Integration Tests for the Reactive Core
//!
//! These tests verify that cells, computeds, the scheduler, the differ,
//! and the staleness coordinator work together correctly, mirroring how
//! the view layer drives them: selections change, collections reload, and
//! overlapping fetches race each other.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use reflow_core::diff::{apply, diff, Keyed};
use reflow_core::fetch::{Coordinator, FetchStatus};
use reflow_core::reactive::{Cell, Computed, Readable, Runtime};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Contig {
    id: u64,
    bin: u64,
}

impl Keyed for Contig {
    type Key = u64;

    fn key(&self) -> u64 {
        self.id
    }
}

fn contig(id: u64, bin: u64) -> Contig {
    Contig { id, bin }
}

#[test]
fn batched_writes_notify_once_with_final_state() {
    let rt = Runtime::new();
    let a = Cell::new(&rt, 1);
    let a_clone = a.clone();
    let b = Computed::new(&rt, move || a_clone.get() * 2);
    assert_eq!(b.get(), 2);

    let fired = Arc::new(AtomicI32::new(0));
    let seen = Arc::new(AtomicI32::new(0));
    let (fired_clone, seen_clone, b_clone) = (fired.clone(), seen.clone(), b.clone());
    let _sub = b.subscribe(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
        seen_clone.store(b_clone.peek(), Ordering::SeqCst);
    });

    rt.batch(|| {
        a.set(5);
        a.set(5);
        a.set(3);
    });

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 6);
    assert_eq!(b.get(), 6);
}

#[test]
fn diamond_dependency_settles_each_node_once() {
    let rt = Runtime::new();
    let a = Cell::new(&rt, 1);

    let a1 = a.clone();
    let left = Computed::new(&rt, move || a1.get() + 1);
    let a2 = a.clone();
    let right = Computed::new(&rt, move || a2.get() * 10);

    let runs = Arc::new(AtomicI32::new(0));
    let (left_clone, right_clone, runs_clone) = (left.clone(), right.clone(), runs.clone());
    let bottom = Computed::new(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        left_clone.get() + right_clone.get()
    });
    assert_eq!(bottom.get(), 12);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let fired = Arc::new(AtomicI32::new(0));
    let fired_clone = fired.clone();
    let _sub = bottom.subscribe(move || {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    a.set(2);

    // exactly one recomputation, seeing both settled producers
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(bottom.get(), 23);
}

#[test]
fn chained_computeds_observe_consistent_state() {
    let rt = Runtime::new();
    let selected = Cell::new(&rt, 10u64);

    let selected_clone = selected.clone();
    let label = Computed::new(&rt, move || format!("bin-{}", selected_clone.get()));
    let label_clone = label.clone();
    let selected_again = selected.clone();
    let pair = Computed::new(&rt, move || (selected_again.get(), label_clone.get()));

    assert_eq!(pair.get(), (10, "bin-10".to_string()));

    // the pair must never mix an old id with a new label or vice versa
    let pair_clone = pair.clone();
    let consistent = Arc::new(AtomicI32::new(0));
    let consistent_clone = consistent.clone();
    let _sub = pair.subscribe(move || {
        let (id, label) = pair_clone.peek();
        assert_eq!(label, format!("bin-{id}"));
        consistent_clone.fetch_add(1, Ordering::SeqCst);
    });

    selected.set(11);
    selected.set(12);

    assert_eq!(consistent.load(Ordering::SeqCst), 2);
    assert_eq!(pair.get(), (12, "bin-12".to_string()));
}

#[test]
fn untracked_reads_do_not_resubscribe() {
    let rt = Runtime::new();
    let tracked = Cell::new(&rt, 1);
    let untracked = Cell::new(&rt, 100);

    let runs = Arc::new(AtomicI32::new(0));
    let (tracked_clone, untracked_clone, runs_clone) =
        (tracked.clone(), untracked.clone(), runs.clone());
    let sum = Computed::new(&rt, move || {
        runs_clone.fetch_add(1, Ordering::SeqCst);
        tracked_clone.get() + untracked_clone.peek()
    });

    assert_eq!(sum.get(), 101);
    assert_eq!(untracked.subscriber_count(), 0);

    untracked.set(200);
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    // the untracked value is picked up on the next tracked change
    tracked.set(2);
    assert_eq!(sum.get(), 202);
}

#[test]
fn unsubscribing_restores_subscriber_count() {
    let rt = Runtime::new();
    let cell = Cell::new(&rt, 0);
    let before = cell.subscriber_count();

    let sub = cell.subscribe(|| {});
    assert_eq!(cell.subscriber_count(), before + 1);

    sub.unsubscribe();
    assert_eq!(cell.subscriber_count(), before);
}

#[test]
fn diff_script_replays_collection_reload() {
    let old = vec![contig(1, 7), contig(2, 7), contig(3, 7)];
    let new = vec![contig(2, 7), contig(3, 7), contig(4, 8)];

    let script = diff(&old, &new).unwrap();
    assert_eq!(apply(&old, &script), new);
    assert_eq!(script.len(), 2);
}

#[tokio::test]
async fn reselection_discards_the_superseded_bin() {
    use tokio::sync::oneshot;

    let rt = Runtime::new();
    let contigs = Cell::new(&rt, Vec::<Contig>::new());
    let coordinator = Coordinator::new();

    // selecting bin A starts a slow fetch; bin B is selected before it
    // resolves, and its fetch completes first
    let (release_a, gate_a) = oneshot::channel::<()>();

    let contigs_a = contigs.clone();
    let load_bin_a = async {
        let status = coordinator
            .run(async {
                gate_a.await.ok();
                Ok(vec![contig(1, 1), contig(2, 1)])
            })
            .await;
        if let FetchStatus::Applied(items) = &status {
            contigs_a.set(items.clone());
        }
        status
    };

    let contigs_b = contigs.clone();
    let load_bin_b = async {
        let status = coordinator
            .run(async { Ok(vec![contig(3, 2), contig(4, 2)]) })
            .await;
        if let FetchStatus::Applied(items) = &status {
            contigs_b.set(items.clone());
        }
        release_a.send(()).ok();
        status
    };

    let (status_a, status_b) = tokio::join!(load_bin_a, load_bin_b);

    assert_eq!(status_a, FetchStatus::DiscardedStale);
    assert!(matches!(status_b, FetchStatus::Applied(_)));
    assert_eq!(contigs.peek(), vec![contig(3, 2), contig(4, 2)]);
}

#[tokio::test]
async fn applied_fetch_drives_the_reactive_graph() {
    let rt = Runtime::new();
    let contigs = Cell::new(&rt, Vec::<Contig>::new());

    let contigs_clone = contigs.clone();
    let count = Computed::new(&rt, move || contigs_clone.get().len());
    assert_eq!(count.get(), 0);

    let coordinator = Coordinator::new();
    let status = coordinator
        .run(async { Ok(vec![contig(1, 1), contig(2, 1), contig(3, 1)]) })
        .await;

    if let FetchStatus::Applied(items) = status {
        contigs.set(items);
    }

    assert_eq!(count.get(), 3);
}
