//! Subtree-minimum aggregation.
//!
//! The plain tree carries no aggregates; the Pareto queue carries, per
//! inner slot, the descriptor of the key with the smallest `second_weight`
//! in that subtree. The original toggled this with a compile-time switch;
//! here it is a capability trait so both tree flavors coexist as ordinary
//! types.

use std::fmt;

use crate::graph::Weight;

/// Per-subtree minimum aggregation capability.
///
/// `Min` is the aggregate stored in every inner slot. It is computed from
/// leaves with [`MinPolicy::leaf_min`] and merged upward with
/// [`MinPolicy::better`], which must be a strict order ("is `a` a strictly
/// better subtree minimum than `b`"). Ties keep the earlier (leftmost)
/// element, so aggregation is deterministic regardless of how the work was
/// split across tasks.
pub trait MinPolicy<K>: Send + Sync + 'static {
    /// Aggregate carried per inner slot.
    type Min: Clone + PartialEq + Send + Sync + fmt::Debug;

    /// Project one key to its aggregate descriptor.
    fn project(key: &K) -> Self::Min;

    /// Strictly-better comparison between aggregates.
    fn better(a: &Self::Min, b: &Self::Min) -> bool;

    /// Aggregate of a non-empty run of keys.
    fn leaf_min(keys: &[K]) -> Self::Min {
        debug_assert!(!keys.is_empty());
        let mut best = Self::project(&keys[0]);
        for key in &keys[1..] {
            let candidate = Self::project(key);
            if Self::better(&candidate, &best) {
                best = candidate;
            }
        }
        best
    }

    /// Aggregate over a non-empty sequence of child aggregates.
    fn fold<'a, I>(mins: I) -> Self::Min
    where
        Self::Min: 'a,
        I: IntoIterator<Item = &'a Self::Min>,
    {
        let mut iter = mins.into_iter();
        let mut best = iter
            .next()
            .expect("aggregating an empty node")
            .clone();
        for min in iter {
            if Self::better(min, &best) {
                best = min.clone();
            }
        }
        best
    }
}

/// No aggregation: the plain weight-balanced tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMin;

impl<K> MinPolicy<K> for NoMin {
    type Min = ();

    #[inline]
    fn project(_key: &K) -> Self::Min {}

    #[inline]
    fn better(_a: &Self::Min, _b: &Self::Min) -> bool {
        false
    }

    #[inline]
    fn leaf_min(_keys: &[K]) -> Self::Min {}
}

/// Minimum descriptor of a subtree in Pareto mode: the two objective
/// weights of the key with the smallest `second_weight` below a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinTag {
    pub first_weight: Weight,
    pub second_weight: Weight,
}

impl MinTag {
    /// Prefix-minimum seed: nothing dominates it from the left, everything
    /// with a finite `second_weight` improves on it.
    #[must_use]
    pub const fn sentinel() -> Self {
        Self {
            first_weight: Weight::MIN,
            second_weight: Weight::MAX,
        }
    }

    /// Whether a subtree (or key) with this descriptor can still contribute
    /// a Pareto minimum given the running prefix minimum.
    ///
    /// Leaf keys are sorted by `first_weight`, so once the prefix minimum
    /// is at least as good in both components, everything further right is
    /// dominated; a strictly smaller `second_weight` keeps the subtree
    /// alive, and exact equality keeps duplicates of the current optimum.
    #[inline]
    #[must_use]
    pub fn improves(&self, prefix: &Self) -> bool {
        self.second_weight < prefix.second_weight
            || (self.first_weight == prefix.first_weight
                && self.second_weight == prefix.second_weight)
    }

    /// Componentwise dominance (used by tests and the outer algorithm).
    #[inline]
    #[must_use]
    pub fn dominates(&self, other: &Self) -> bool {
        self.first_weight <= other.first_weight
            && self.second_weight <= other.second_weight
            && self != other
    }
}
