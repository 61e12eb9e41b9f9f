//! The weight-balanced B+-tree with bulk batch updates.
//!
//! All keys live in the leaves; inner slots carry the router (largest key
//! of the subtree), the exact subtree weight, and — in Pareto mode — the
//! subtree's minimum descriptor. The single mutating entry point is
//! [`WbTree::apply_updates`]: a sorted batch goes in, the tree is patched
//! or partially rebuilt in parallel, and every structural invariant holds
//! again on return.
//!
//! There are deliberately no point operations: no lookup, no single-key
//! insert or erase, no iteration. The workload is bulk-synchronous, which
//! is what makes the lock-free divide-and-conquer rewrite possible in the
//! first place.

use std::marker::PhantomData;

use tracing::debug;

use crate::minima::{MinPolicy, NoMin};
use crate::node::{self, LeafNode, Node};
use crate::ops::{self, BatchKind, Operation};
use crate::params::{Level, TreeParams};
use crate::scan::{self, WeightDeltas};
use crate::stats::{TreeStats, GATHER_STATS};
use crate::workers::PerWorker;

mod rebuild;
mod update;

use update::{UpdateCtx, UpdateDescriptor};

/// A weight-balanced B+-tree over keys `K`, with per-slot aggregation
/// policy `P` (unit for the plain tree, Pareto minima for the queue).
pub struct WbTree<K, P = NoMin>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    root: Option<Node<K, P::Min>>,
    params: TreeParams,
    stats: TreeStats,
    /// One merge scratch leaf per worker, owned for the tree's lifetime.
    spare_leaves: PerWorker<LeafNode<K>>,
    /// Prefix-sum scratch, reused across batches.
    weightdelta: Vec<i64>,
    _policy: PhantomData<P>,
}

impl<K, P> Default for WbTree<K, P>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> WbTree<K, P>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    /// Empty tree with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::with_params(TreeParams::default())
    }

    /// Empty tree with the given parameters.
    ///
    /// The per-worker scratch is sized from the ambient rayon pool; use the
    /// tree from within the pool it was created under.
    #[must_use]
    pub fn with_params(params: TreeParams) -> Self {
        let leaf_max = params.leaf_max();
        Self {
            root: None,
            params,
            stats: TreeStats::default(),
            spare_leaves: PerWorker::new(|| LeafNode::with_capacity(leaf_max)),
            weightdelta: Vec::new(),
            _policy: PhantomData,
        }
    }

    /// Number of keys in the tree.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.stats.items()
    }

    /// Whether the tree holds no keys.
    #[inline]
    #[must_use]
    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    /// Level of the root; 0 for a leaf-only or empty tree.
    #[inline]
    #[must_use]
    pub fn height(&self) -> Level {
        self.root.as_ref().map_or(0, Node::level)
    }

    /// The tree's parameters.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    /// Current statistics.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &TreeStats {
        &self.stats
    }

    pub(crate) fn root(&self) -> Option<&Node<K, P::Min>> {
        self.root.as_ref()
    }

    /// Apply a bulk update batch atomically (from the caller's view;
    /// internally parallel).
    ///
    /// The batch must be strictly sorted by key; every delete must target a
    /// present key and no insert may collide with a present key. Violations
    /// are asserted in debug builds and undetected in release builds.
    /// Allocation failure follows std collection semantics (the process
    /// aborts); no partially applied batch is ever observable.
    pub fn apply_updates(&mut self, updates: &[Operation<K>]) {
        if updates.is_empty() {
            return;
        }
        ops::debug_validate_batch(updates);

        let kind = ops::classify(updates);
        if kind == BatchKind::Mixed {
            scan::compute_mixed_deltas(updates, &mut self.weightdelta);
        }
        let deltas = match kind {
            BatchKind::Mixed => WeightDeltas::Mixed(&self.weightdelta),
            pure => WeightDeltas::Pure(pure.sign()),
        };

        let old_size = self.stats.items();
        let new_size =
            old_size as i64 + scan::total_delta(kind, updates.len(), &self.weightdelta);
        debug_assert!(new_size >= 0, "batch deletes more keys than present");
        let new_size = new_size as usize;
        self.stats.items = new_size;

        if new_size == 0 {
            self.clear();
            return;
        }
        if self.root.is_none() {
            self.stats.inc_leaf();
            self.root = Some(Node::Leaf(Box::new(LeafNode::with_capacity(
                self.params.leaf_max(),
            ))));
        }

        let root_level = self.root.as_ref().map_or(0, Node::level);
        let target_level = self.params.optimal_levels(new_size);
        let rebuild_needed = (target_level < root_level
            && new_size < self.params.minweight(root_level))
            || new_size > self.params.maxweight(root_level);
        debug!(
            old_size,
            new_size,
            batch = updates.len(),
            rebuild = rebuild_needed,
            "bulk update"
        );

        let full = UpdateDescriptor {
            upd_begin: 0,
            upd_end: updates.len(),
            weight: new_size,
            rebalance: rebuild_needed,
        };
        let ctx = UpdateCtx {
            params: &self.params,
            updates,
            deltas,
            stats: &self.stats,
            spares: &self.spare_leaves,
        };

        if rebuild_needed {
            if let Some(old_root) = self.root.take() {
                let keys =
                    rebuild::rewrite_region::<K, P>(&ctx, vec![(old_root, full)], new_size);
                self.root = Some(rebuild::build_tree::<K, P>(&ctx, &keys, target_level));
            }
        } else if let Some(root) = self.root.as_mut() {
            let _ = update::update_node::<K, P>(&ctx, root, &full);
        }

        self.collapse_root();
    }

    /// A root with a single subtree is redundant; hand the role down.
    fn collapse_root(&mut self) {
        loop {
            match self.root.take() {
                Some(Node::Inner(mut inner)) if inner.slots.len() == 1 => {
                    let slot = inner.slots.pop().expect("length checked");
                    self.stats.dec_inner();
                    self.root = Some(slot.child);
                }
                other => {
                    self.root = other;
                    return;
                }
            }
        }
    }

    /// Release every node; the tree becomes empty.
    pub fn clear(&mut self) {
        if let Some(root) = self.root.take() {
            node::release(&self.stats, root);
        }
        if GATHER_STATS {
            debug_assert_eq!(self.stats.nodes(), 0);
        }
        self.stats.reset();
    }

    /// All keys in ascending order. Verification support; the tree itself
    /// deliberately has no iteration surface.
    #[must_use]
    pub fn collect_keys(&self) -> Vec<K> {
        fn walk<K: Clone, M>(node: &Node<K, M>, out: &mut Vec<K>) {
            match node {
                Node::Leaf(leaf) => out.extend(leaf.keys.iter().cloned()),
                Node::Inner(inner) => {
                    for slot in &inner.slots {
                        walk(&slot.child, out);
                    }
                }
            }
        }
        let mut out = Vec::with_capacity(self.size());
        if let Some(root) = &self.root {
            walk(root, &mut out);
        }
        out
    }

    /// Key counts of all leaves in order. Verification support.
    #[must_use]
    pub fn leaf_sizes(&self) -> Vec<usize> {
        fn walk<K, M>(node: &Node<K, M>, out: &mut Vec<usize>) {
            match node {
                Node::Leaf(leaf) => out.push(leaf.keys.len()),
                Node::Inner(inner) => {
                    for slot in &inner.slots {
                        walk(&slot.child, out);
                    }
                }
            }
        }
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            walk(root, &mut out);
        }
        out
    }

    /// Walk the whole tree asserting every structural invariant: strict
    /// key order, router correctness, exact weights, per-level weight
    /// bounds, and aggregate minima.
    ///
    /// The weight lower bound is not asserted for the last slot of a node:
    /// when the final subtree of a rebalancing run underflows with no right
    /// sibling to absorb it, the structure knowingly leaves it light.
    ///
    /// # Panics
    /// Panics if any invariant is violated.
    pub fn verify(&self) {
        let Some(root) = self.root.as_ref() else {
            assert_eq!(self.size(), 0, "empty tree with nonzero item count");
            return;
        };

        let mut counts = VerifyCounts::default();
        let info = self.verify_node(root, true, &mut counts);
        assert_eq!(counts.items, self.size(), "item count mismatch");
        assert_eq!(info.items, self.size(), "root weight mismatch");
        if GATHER_STATS {
            assert_eq!(counts.leaves, self.stats.leaves(), "leaf count drifted");
            assert_eq!(
                counts.inner_nodes,
                self.stats.inner_nodes(),
                "inner node count drifted"
            );
        }
    }

    fn verify_node(
        &self,
        node: &Node<K, P::Min>,
        is_root: bool,
        counts: &mut VerifyCounts,
    ) -> VerifyInfo<K, P::Min> {
        match node {
            Node::Leaf(leaf) => {
                assert!(!leaf.keys.is_empty(), "empty leaf in a non-empty tree");
                assert!(
                    leaf.keys.len() <= self.params.leaf_max(),
                    "leaf exceeds its capacity"
                );
                assert!(
                    leaf.keys.windows(2).all(|w| w[0] < w[1]),
                    "leaf keys not strictly sorted"
                );
                counts.leaves += 1;
                counts.items += leaf.keys.len();
                VerifyInfo {
                    min_key: leaf.keys[0].clone(),
                    max_key: leaf.keys[leaf.keys.len() - 1].clone(),
                    min_agg: P::leaf_min(&leaf.keys),
                    items: leaf.keys.len(),
                }
            }
            Node::Inner(inner) => {
                assert!(!inner.slots.is_empty(), "inner node without slots");
                assert!(
                    inner.slots.len() <= self.params.inner_max(),
                    "inner node exceeds its capacity"
                );
                counts.inner_nodes += 1;

                let min_weight = self.params.minweight(inner.level - 1);
                let max_weight = self.params.maxweight(inner.level - 1);
                let last = inner.slots.len() - 1;

                let mut items = 0usize;
                let mut min_key = None;
                let mut prev_router: Option<&K> = None;
                for (i, slot) in inner.slots.iter().enumerate() {
                    assert_eq!(
                        slot.child.level() + 1,
                        inner.level,
                        "child level out of step"
                    );
                    assert!(slot.weight <= max_weight, "subtree overweight");
                    // The root's children absorb whatever the batch leaves
                    // behind; the last slot carries the documented
                    // underflow deviation.
                    if !is_root && i != last {
                        assert!(slot.weight >= min_weight, "subtree underweight");
                    }

                    let info = self.verify_node(&slot.child, false, counts);
                    assert_eq!(info.items, slot.weight, "stored weight is stale");
                    assert!(info.max_key == slot.router, "router is not the subtree max");
                    assert!(info.min_agg == slot.min, "slot minimum is stale");
                    if let Some(prev) = prev_router {
                        assert!(*prev < slot.router, "routers not strictly sorted");
                        assert!(*prev < info.min_key, "subtree reaches under its router");
                    }

                    if i == 0 {
                        min_key = Some(info.min_key);
                    }
                    prev_router = Some(&slot.router);
                    items += slot.weight;
                }

                VerifyInfo {
                    min_key: min_key.expect("non-empty inner node"),
                    max_key: inner.slots[last].router.clone(),
                    min_agg: P::fold(inner.slots.iter().map(|slot| &slot.min)),
                    items,
                }
            }
        }
    }
}

#[derive(Default)]
struct VerifyCounts {
    items: usize,
    leaves: usize,
    inner_nodes: usize,
}

struct VerifyInfo<K, M> {
    min_key: K,
    max_key: K,
    min_agg: M,
    items: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inserts(range: std::ops::Range<i64>) -> Vec<Operation<i64>> {
        range.map(Operation::insert).collect()
    }

    fn small_tree() -> WbTree<i64> {
        WbTree::with_params(TreeParams::new(8, 8))
    }

    #[test]
    fn test_new_tree_is_empty() {
        let tree = small_tree();
        assert_eq!(tree.size(), 0);
        assert!(tree.empty());
        assert_eq!(tree.height(), 0);
        tree.verify();
    }

    #[test]
    fn test_single_batch_single_leaf() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..5));
        assert_eq!(tree.size(), 5);
        assert_eq!(tree.height(), 0);
        assert_eq!(tree.collect_keys(), (0..5).collect::<Vec<_>>());
        tree.verify();
    }

    #[test]
    fn test_batch_overflowing_one_leaf_rebuilds() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..40));
        assert_eq!(tree.size(), 40);
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.collect_keys(), (0..40).collect::<Vec<_>>());
        tree.verify();
    }

    #[test]
    fn test_incremental_batches() {
        let mut tree = small_tree();
        for chunk in (0..200).collect::<Vec<i64>>().chunks(25) {
            let batch: Vec<_> = chunk.iter().copied().map(Operation::insert).collect();
            tree.apply_updates(&batch);
            tree.verify();
        }
        assert_eq!(tree.size(), 200);
        assert_eq!(tree.collect_keys(), (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn test_delete_everything_clears() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..100));
        let deletes: Vec<_> = (0..100).map(Operation::delete).collect();
        tree.apply_updates(&deletes);
        assert!(tree.empty());
        assert_eq!(tree.height(), 0);
        tree.verify();
    }

    #[test]
    fn test_interleaved_mixed_batch() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..64));

        // Delete the evens, insert 100..132: net zero on the low range.
        let mut batch: Vec<Operation<i64>> =
            (0..64).step_by(2).map(Operation::delete).collect();
        batch.extend((100..132).map(Operation::insert));
        tree.apply_updates(&batch);

        let mut expected: Vec<i64> = (0..64).filter(|k| k % 2 == 1).collect();
        expected.extend(100..132);
        assert_eq!(tree.collect_keys(), expected);
        tree.verify();
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..100));
        tree.clear();
        assert!(tree.empty());
        assert_eq!(tree.stats().nodes(), 0);
        tree.verify();
    }

    #[test]
    fn test_empty_batch_is_a_noop() {
        let mut tree = small_tree();
        tree.apply_updates(&inserts(0..10));
        tree.apply_updates(&[]);
        assert_eq!(tree.size(), 10);
        tree.verify();
    }
}
