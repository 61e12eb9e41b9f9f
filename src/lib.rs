//! # bulktree
//!
//! A weight-balanced B+-tree with parallel bulk batch updates, and a
//! Pareto queue for parallel bi-objective shortest-path search layered on
//! top of it.
//!
//! The tree has a single mutating entry point, [`WbTree::apply_updates`]:
//! a batch of insertions and deletions, sorted by key, is applied as one
//! atomic step. Subtrees whose post-update weight stays within the
//! per-level balance bounds are patched in place; subtrees that leave
//! their bounds are rewritten by streaming their merged key sequence into
//! freshly built subtrees of designated size. Disjoint subtrees are
//! processed by disjoint fork/join tasks, so the whole update runs without
//! a single lock.
//!
//! ## Design
//!
//! - Weight balance instead of slot balance: a subtree on level `l` weighs
//!   between `b^l * k / 4` and `b^l * k`, which makes "does this batch
//!   unbalance that subtree" answerable from a prefix sum before ever
//!   descending into it.
//! - Bulk only: no point lookups, no single-key operations, no iterators.
//!   The workload alternates batches and queries, so nothing pays for
//!   concurrent-reader machinery.
//! - [`ParetoQueue`] specializes the tree with labels ordered by
//!   `(first_weight, second_weight, node)` and per-slot minima, and
//!   extracts the full Pareto frontier in one pruned parallel traversal.

pub mod graph;
pub mod minima;
pub mod ops;
pub mod params;
pub mod queue;
pub mod stats;
pub mod tree;

mod node;
mod ordering;
mod scan;
mod workers;

pub use graph::{AdjacencyArray, Edge, Graph, NodeId, Weight};
pub use minima::{MinPolicy, MinTag, NoMin};
pub use ops::{BatchKind, OpKind, Operation};
pub use params::{Level, TreeParams};
pub use queue::{Label, ParetoMin, ParetoQueue, DEFAULT_RECURSION_END_LEVEL};
pub use stats::TreeStats;
pub use tree::WbTree;
