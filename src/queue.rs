//! The Pareto queue: all tentative labels of a bi-objective search, held
//! in a weight-balanced tree with per-slot minima.
//!
//! Labels are ordered lexicographically by `(first_weight, second_weight,
//! node)`, so an in-order walk sees `first_weight` ascending. Every inner
//! slot carries the best `second_weight` of its subtree, which lets
//! [`ParetoQueue::find_pareto_minima`] skip any subtree whose aggregate is
//! already dominated by the running prefix minimum, and extract the whole
//! Pareto frontier without touching most of the tree.
//!
//! Extraction runs task-parallel down to a small level threshold and emits
//! into per-worker buffers: the frontier labels themselves (as deletions
//! for the next batch) and, per outgoing edge of each settled node, the
//! relaxed candidate labels, grouped by target node so the outer algorithm
//! can merge them without sorting across workers.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::AtomicU16;

use tracing::trace;

use crate::graph::{Graph, NodeId, Weight};
use crate::minima::{MinPolicy, MinTag};
use crate::node::Node;
use crate::ops::Operation;
use crate::ordering::CLAIM_ORD;
use crate::params::{Level, TreeParams};
use crate::stats::TreeStats;
use crate::tree::WbTree;
use crate::workers::PerWorker;

/// Below this level a surviving subtree is scanned serially by the worker
/// that reached it; task creation no longer pays off.
pub const DEFAULT_RECURSION_END_LEVEL: Level = 3;

/// A tentative label: a node and its two objective weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    pub node: NodeId,
    pub first_weight: Weight,
    pub second_weight: Weight,
}

impl Label {
    #[must_use]
    pub const fn new(node: NodeId, first_weight: Weight, second_weight: Weight) -> Self {
        Self {
            node,
            first_weight,
            second_weight,
        }
    }

    /// The label's minimum descriptor.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> MinTag {
        MinTag {
            first_weight: self.first_weight,
            second_weight: self.second_weight,
        }
    }
}

impl Ord for Label {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.first_weight
            .cmp(&other.first_weight)
            .then(self.second_weight.cmp(&other.second_weight))
            .then(self.node.cmp(&other.node))
    }
}

impl PartialOrd for Label {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Aggregation policy of the queue's tree: per slot, the descriptor of the
/// subtree's best `second_weight`, earliest key on ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParetoMin;

impl MinPolicy<Label> for ParetoMin {
    type Min = MinTag;

    #[inline]
    fn project(key: &Label) -> Self::Min {
        key.tag()
    }

    #[inline]
    fn better(a: &Self::Min, b: &Self::Min) -> bool {
        a.second_weight < b.second_weight
    }
}

/// Per-worker output of one extraction round.
#[derive(Debug, Default)]
struct QueueBuffers {
    /// Deletions of the emitted minima, in traversal order.
    updates: Vec<Operation<Label>>,
    /// Scratch for the minima of one subtree scan.
    minima: Vec<Label>,
    /// Candidate labels grouped by target node.
    candidates: Vec<Vec<Label>>,
    /// Targets this worker claimed first this round.
    affected: Vec<NodeId>,
}

/// Which workers appended candidates for which target: a `[target x
/// worker]` matrix of worker ids, positions claimed by an atomic
/// per-target counter so every cell has exactly one writer.
struct ClaimRegistry {
    workers: usize,
    counts: Box<[AtomicU16]>,
    slots: Box<[AtomicU16]>,
}

impl ClaimRegistry {
    fn new(nodes: usize, workers: usize) -> Self {
        Self {
            workers,
            counts: (0..nodes).map(|_| AtomicU16::new(0)).collect(),
            slots: (0..nodes * workers).map(|_| AtomicU16::new(0)).collect(),
        }
    }

    /// Claim the next position for `target` and record the worker there.
    /// Position 0 makes the caller responsible for the target.
    fn claim(&self, target: NodeId, worker: usize) -> usize {
        let position = self.counts[target as usize].fetch_add(1, CLAIM_ORD) as usize;
        debug_assert!(position < self.workers);
        self.slots[target as usize * self.workers + position]
            .store(worker as u16, CLAIM_ORD);
        position
    }

    /// The workers that appended for `target`, resetting its counter.
    fn take(&self, target: NodeId) -> Vec<usize> {
        let claimed = self.counts[target as usize].swap(0, CLAIM_ORD) as usize;
        (0..claimed)
            .map(|position| {
                self.slots[target as usize * self.workers + position].load(CLAIM_ORD) as usize
            })
            .collect()
    }
}

/// Priority queue over all tentative labels of a bi-objective search.
pub struct ParetoQueue<'g, G: Graph> {
    tree: WbTree<Label, ParetoMin>,
    graph: &'g G,
    buffers: PerWorker<QueueBuffers>,
    claims: ClaimRegistry,
    recursion_end_level: Level,
}

impl<'g, G: Graph> ParetoQueue<'g, G> {
    /// Empty queue over `graph`'s label space.
    #[must_use]
    pub fn new(graph: &'g G, params: TreeParams) -> Self {
        let buffers: PerWorker<QueueBuffers> = PerWorker::new(QueueBuffers::default);
        let claims = ClaimRegistry::new(graph.node_count(), buffers.len());
        Self {
            tree: WbTree::with_params(params),
            graph,
            buffers,
            claims,
            recursion_end_level: DEFAULT_RECURSION_END_LEVEL,
        }
    }

    /// Tune the level below which extraction stops forking.
    pub fn set_recursion_end_level(&mut self, level: Level) {
        self.recursion_end_level = level;
    }

    /// Seed the queue with the source label.
    pub fn init(&mut self, label: Label) {
        self.tree.apply_updates(&[Operation::insert(label)]);
    }

    /// Apply a sorted batch of label insertions/deletions.
    pub fn apply_updates(&mut self, updates: &[Operation<Label>]) {
        self.tree.apply_updates(updates);
    }

    /// Number of labels in the queue.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.tree.size()
    }

    /// Whether the queue holds no labels.
    #[inline]
    #[must_use]
    pub fn empty(&self) -> bool {
        self.tree.empty()
    }

    /// Tree statistics.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &TreeStats {
        self.tree.stats()
    }

    /// Assert every tree invariant, including the per-slot minima.
    pub fn verify(&self) {
        self.tree.verify();
    }

    /// Extract the Pareto frontier into the per-worker buffers.
    ///
    /// Every Pareto-minimal label is emitted exactly once: recorded as a
    /// [`Operation::delete`] in its worker's update buffer, and relaxed
    /// over its node's outgoing edges into per-`(target, worker)` candidate
    /// buffers. Collect the results with [`Self::drain_updates`] and
    /// [`Self::drain_candidates`] before the next round.
    pub fn find_pareto_minima(&self) {
        let Some(root) = self.tree.root() else {
            return;
        };
        trace!(size = self.size(), "extracting pareto minima");
        self.visit(root, MinTag::sentinel());
    }

    /// Descend into every subtree that can still contribute a minimum,
    /// forking per surviving slot while above the recursion end level.
    fn visit(&self, node: &Node<Label, MinTag>, prefix: MinTag) {
        if node.level() < self.recursion_end_level {
            self.scan_and_distribute(node, prefix);
            return;
        }
        match node {
            Node::Leaf(_) => self.scan_and_distribute(node, prefix),
            Node::Inner(inner) => {
                rayon::scope(|scope| {
                    let mut prefix = prefix;
                    for slot in &inner.slots {
                        if slot.min.improves(&prefix) {
                            let below = prefix;
                            let child = &slot.child;
                            scope.spawn(move |_| self.visit(child, below));
                            prefix = slot.min;
                        }
                    }
                });
            }
        }
    }

    /// Serial part: collect the subtree's minima on this worker, then turn
    /// them into deletions and edge-relaxed candidates.
    fn scan_and_distribute(&self, node: &Node<Label, MinTag>, prefix: MinTag) {
        self.buffers.with_local(|worker, buffers| {
            let QueueBuffers {
                updates,
                minima,
                candidates,
                affected,
            } = buffers;

            debug_assert!(minima.is_empty());
            Self::scan(node, prefix, minima);
            if candidates.len() < self.graph.node_count() {
                candidates.resize_with(self.graph.node_count(), Vec::new);
            }

            for min in minima.drain(..) {
                updates.push(Operation::delete(min));

                for edge in self.graph.out_edges(min.node) {
                    let target = edge.target as usize;
                    if candidates[target].is_empty() {
                        let position = self.claims.claim(edge.target, worker);
                        if position == 0 {
                            // First writer this round owns the target.
                            affected.push(edge.target);
                        }
                    }
                    candidates[target].push(Label::new(
                        edge.target,
                        min.first_weight + edge.first_weight,
                        min.second_weight + edge.second_weight,
                    ));
                }
            }
        });
    }

    /// In-order walk emitting every key that improves the running prefix
    /// minimum; subtrees whose aggregate cannot improve it are skipped.
    fn scan(node: &Node<Label, MinTag>, prefix: MinTag, out: &mut Vec<Label>) {
        match node {
            Node::Leaf(leaf) => {
                let mut min = prefix;
                for key in &leaf.keys {
                    let tag = key.tag();
                    if tag.improves(&min) {
                        out.push(*key);
                        min = tag;
                    }
                }
            }
            Node::Inner(inner) => {
                let mut min = prefix;
                for slot in &inner.slots {
                    if slot.min.improves(&min) {
                        Self::scan(&slot.child, min, out);
                        min = slot.min;
                    }
                }
            }
        }
    }

    /// Move every worker's pending deletions into `out` (unsorted across
    /// workers; the outer algorithm merges them into its next batch).
    pub fn drain_updates(&mut self, out: &mut Vec<Operation<Label>>) {
        for buffers in self.buffers.iter_mut() {
            out.append(&mut buffers.updates);
        }
    }

    /// Visit every `(affected target, candidate buffer)` pair of the last
    /// extraction round exactly once, then reset the claim registry.
    pub fn drain_candidates(&mut self, mut f: impl FnMut(NodeId, &mut Vec<Label>)) {
        let mut affected = Vec::new();
        for buffers in self.buffers.iter_mut() {
            affected.append(&mut buffers.affected);
        }
        for target in affected {
            for worker in self.claims.take(target) {
                let buffer = &mut self.buffers.get_mut(worker).candidates[target as usize];
                debug_assert!(!buffer.is_empty());
                f(target, buffer);
                buffer.clear();
            }
        }
    }
}
