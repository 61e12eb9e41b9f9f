//! Memory orderings for the crate's few atomics.
//!
//! Every parallel phase ends at a fork/join barrier before its results are
//! read, so the barrier provides the happens-before edge and the atomics
//! themselves only need to be atomic, not ordered.

use std::sync::atomic::Ordering;

/// Ordering for the debug node counters. Pure counting; totals are only
/// read after the update has joined.
pub(crate) const STATS_ORD: Ordering = Ordering::Relaxed;

/// Ordering for claiming a position in the per-target candidate registry.
/// `fetch_add` makes the claim unique; the claimed cell is written and read
/// on opposite sides of the traversal's join.
pub(crate) const CLAIM_ORD: Ordering = Ordering::Relaxed;
