//! End-to-end scenarios: bulk build, bulk delete, mixed batches, root
//! rebuilds and collapses, and small Pareto extractions.

mod common;

use bulktree::{AdjacencyArray, Label, Operation, ParetoQueue, WbTree};
use common::{deletes, inserts, mixed, small_params};

/// Bulk build: 1000 keys into an empty tree.
#[test]
fn bulk_build_1000() {
    let mut tree: WbTree<i64> = WbTree::with_params(small_params());
    tree.apply_updates(&inserts(1..=1000));

    assert_eq!(tree.size(), 1000);
    // maxweight(2) = 512 < 1000, so the root must sit on level 3.
    assert_eq!(tree.height(), 3);
    for size in tree.leaf_sizes() {
        assert!((2..=8).contains(&size), "leaf weight {size} out of bounds");
    }
    assert_eq!(tree.collect_keys(), (1..=1000).collect::<Vec<_>>());
    tree.verify();
}

/// Bulk delete: drop the odd keys from the 1000-key tree.
#[test]
fn bulk_delete_odds() {
    let mut tree: WbTree<i64> = WbTree::with_params(small_params());
    tree.apply_updates(&inserts(1..=1000));

    tree.apply_updates(&deletes((1..=999).step_by(2)));
    assert_eq!(tree.size(), 500);
    assert!(tree.collect_keys().iter().all(|key| key % 2 == 0));
    tree.verify();
}

/// Mixed batch: delete the low evens, insert negatives of the same count.
#[test]
fn mixed_batch_swaps_ranges() {
    let mut tree: WbTree<i64> = WbTree::with_params(small_params());
    tree.apply_updates(&inserts(1..=1000));
    tree.apply_updates(&deletes((1..=999).step_by(2)));

    tree.apply_updates(&mixed((2..=100).step_by(2), -50..=-1));
    assert_eq!(tree.size(), 500);

    let mut expected: Vec<i64> = (-50..=-1).collect();
    expected.extend((102..=1000).step_by(2));
    assert_eq!(tree.collect_keys(), expected);
    tree.verify();
}

/// Inserting one key past `maxweight(root level)` raises the root level.
#[test]
fn root_rebuild_on_overflow() {
    let mut tree: WbTree<i64> = WbTree::with_params(small_params());

    // 40 keys build a level-1 root; 24 more reach maxweight(1) = 64
    // without triggering a rebuild.
    tree.apply_updates(&inserts(0..40));
    assert_eq!(tree.height(), 1);
    tree.apply_updates(&inserts(40..64));
    assert_eq!(tree.height(), 1);
    assert_eq!(tree.size(), 64);
    tree.verify();

    tree.apply_updates(&inserts(64..65));
    assert_eq!(tree.size(), 65);
    assert_eq!(tree.height(), 2);
    tree.verify();
}

/// Deleting far enough below `minweight(root level)` lowers the root level.
#[test]
fn root_collapse_on_underflow() {
    let mut tree: WbTree<i64> = WbTree::with_params(small_params());
    tree.apply_updates(&inserts(0..65));
    assert_eq!(tree.height(), 2);

    // 20 keys want a level-1 root: 20 < minweight(2) = 128.
    tree.apply_updates(&deletes(0..45));
    assert_eq!(tree.size(), 20);
    assert_eq!(tree.height(), 1);
    tree.verify();

    // A net-zero batch on a balanced tree changes nothing structural.
    tree.apply_updates(&mixed(45..50, 100..105));
    assert_eq!(tree.size(), 20);
    assert_eq!(tree.height(), 1);
    tree.verify();

    // Four keys fit a single leaf: the root becomes that leaf.
    let survivors: Vec<i64> = tree.collect_keys();
    tree.apply_updates(&deletes(survivors[..16].iter().copied()));
    assert_eq!(tree.size(), 4);
    assert_eq!(tree.height(), 0);
    tree.verify();
}

/// Pareto extraction on a hand-checked label set.
#[test]
fn pareto_small_frontier() {
    let graph = AdjacencyArray::from_edges(8, &[]);
    let mut queue = ParetoQueue::new(&graph, small_params());

    queue.init(Label::new(1, 0, 0));
    queue.apply_updates(&[
        Operation::insert(Label::new(2, 1, 5)),
        Operation::insert(Label::new(3, 2, 4)),
        Operation::insert(Label::new(4, 3, 3)),
        Operation::insert(Label::new(5, 4, 6)),
        Operation::insert(Label::new(6, 5, 2)),
    ]);
    assert_eq!(queue.size(), 6);
    queue.verify();

    // (1, 0, 0) dominates everything else.
    queue.find_pareto_minima();
    let mut updates = Vec::new();
    queue.drain_updates(&mut updates);
    assert_eq!(updates, vec![Operation::delete(Label::new(1, 0, 0))]);

    // Without it, only (5, 4, 6) stays dominated (by (4, 3, 3)).
    queue.apply_updates(&updates);
    queue.verify();
    queue.find_pareto_minima();
    let mut updates = Vec::new();
    queue.drain_updates(&mut updates);
    let mut minima: Vec<Label> = updates.iter().map(|op| op.key).collect();
    minima.sort();
    assert_eq!(
        minima,
        vec![
            Label::new(2, 1, 5),
            Label::new(3, 2, 4),
            Label::new(4, 3, 3),
            Label::new(6, 5, 2),
        ]
    );
}

/// Candidate distribution: the frontier is relaxed along the graph's
/// edges into per-target buffers, each affected target visited once.
#[test]
fn pareto_candidate_distribution() {
    let edge = |target, w1, w2| bulktree::Edge {
        target,
        first_weight: w1,
        second_weight: w2,
    };
    let graph = AdjacencyArray::from_edges(
        5,
        &[
            (1, edge(2, 1, 1)),
            (1, edge(3, 2, 5)),
            (4, edge(2, 7, 1)),
        ],
    );
    let mut queue = ParetoQueue::new(&graph, small_params());
    queue.init(Label::new(1, 10, 10));
    queue.apply_updates(&[Operation::insert(Label::new(4, 20, 2))]);

    // Both labels are Pareto-minimal; their edges produce three candidates.
    queue.find_pareto_minima();
    let mut updates = Vec::new();
    queue.drain_updates(&mut updates);
    assert_eq!(updates.len(), 2);

    let mut per_target: std::collections::BTreeMap<u32, Vec<Label>> = Default::default();
    queue.drain_candidates(|target, buffer| {
        per_target.entry(target).or_default().append(buffer);
    });

    let mut to_node2 = per_target.remove(&2).unwrap_or_default();
    to_node2.sort();
    assert_eq!(
        to_node2,
        vec![Label::new(2, 11, 11), Label::new(2, 27, 3)]
    );
    assert_eq!(
        per_target.remove(&3).unwrap_or_default(),
        vec![Label::new(3, 12, 15)]
    );
    assert!(per_target.is_empty());
}

/// A queue batch keeps the per-slot minima consistent through patches and
/// rebuilds alike.
#[test]
fn pareto_minima_survive_rebalancing() {
    let graph = AdjacencyArray::from_edges(2, &[]);
    let mut queue = ParetoQueue::new(&graph, small_params());

    let batch: Vec<Operation<Label>> = (0..200)
        .map(|i| Operation::insert(Label::new(0, i, 1000 - i)))
        .collect();
    queue.apply_updates(&batch);
    queue.verify();

    // Drop every other label; the minima must be refreshed along the way.
    let batch: Vec<Operation<Label>> = (0..200)
        .step_by(2)
        .map(|i| Operation::delete(Label::new(0, i, 1000 - i)))
        .collect();
    queue.apply_updates(&batch);
    assert_eq!(queue.size(), 100);
    queue.verify();

    // Descending second weights: every remaining label is Pareto-minimal.
    queue.find_pareto_minima();
    let mut updates = Vec::new();
    queue.drain_updates(&mut updates);
    assert_eq!(updates.len(), 100);
}
