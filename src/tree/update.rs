//! Recursive bulk update.
//!
//! Per subtree the algorithm picks one of three actions:
//!
//! 1. No child leaves its weight bounds: patch in place. Children with
//!    updates are descended into concurrently (they are disjoint slots),
//!    routers/weights/minima refreshed from the recursion.
//! 2. The subtree is inside a region an ancestor is rewriting: stream its
//!    merged key sequence into the region's output buffer
//!    (see [`super::rebuild`]).
//! 3. Some children leave their bounds: find maximal runs of defective
//!    slots, rewrite each run into freshly built subtrees of designated
//!    size, and splice the results between the untouched slots.
//!
//! Leaf patches merge into the worker's spare leaf and swap, so the hot
//! path allocates nothing.

use std::mem;

use rayon::prelude::*;
use tracing::trace;

use crate::minima::MinPolicy;
use crate::node::{release, InnerNode, LeafNode, Node, Slot};
use crate::ops::{OpKind, Operation};
use crate::params::{Level, TreeParams};
use crate::scan::WeightDeltas;
use crate::stats::TreeStats;
use crate::workers::PerWorker;

use super::rebuild;

/// Batches below this many operations are descended serially.
const PARALLEL_UPDATE_GRAIN: usize = 512;

/// Shared, immutable state of one `apply_updates` call.
pub(crate) struct UpdateCtx<'a, K> {
    pub params: &'a TreeParams,
    pub updates: &'a [Operation<K>],
    pub deltas: WeightDeltas<'a>,
    pub stats: &'a TreeStats,
    pub spares: &'a PerWorker<LeafNode<K>>,
}

impl<K> Clone for UpdateCtx<'_, K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for UpdateCtx<'_, K> {}

/// The slice of the batch aimed at one subtree, and what it does to it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UpdateDescriptor {
    pub upd_begin: usize,
    pub upd_end: usize,
    /// Post-update weight of the subtree.
    pub weight: usize,
    /// Whether the post-update weight leaves the level's bounds.
    pub rebalance: bool,
}

impl UpdateDescriptor {
    #[inline]
    pub fn has_updates(&self) -> bool {
        self.upd_begin != self.upd_end
    }

    #[inline]
    fn len(&self) -> usize {
        self.upd_end - self.upd_begin
    }
}

/// What a parent needs to refresh its slot after updating the child.
pub(crate) struct SlotMeta<K, M> {
    pub router: K,
    pub min: M,
}

/// Partition the update range of `inner` across its children by binary
/// search against the routers, and decide per child whether its new weight
/// forces rebalancing.
pub(crate) fn partition_updates<K, M>(
    ctx: &UpdateCtx<'_, K>,
    inner: &InnerNode<K, M>,
    upd: &UpdateDescriptor,
) -> (Vec<UpdateDescriptor>, bool)
where
    K: Ord,
{
    let min_weight = ctx.params.minweight(inner.level - 1);
    let max_weight = ctx.params.maxweight(inner.level - 1);

    let last = inner.slots.len() - 1;
    let mut descs = Vec::with_capacity(inner.slots.len());
    let mut rebalancing_needed = false;
    let mut begin = upd.upd_begin;

    for (i, slot) in inner.slots.iter().enumerate() {
        // Keys <= router belong to this child; everything the routers do
        // not cover falls to the last child.
        let end = if i == last {
            upd.upd_end
        } else {
            begin
                + ctx.updates[begin..upd.upd_end]
                    .partition_point(|op| op.key <= slot.router)
        };

        let new_weight = slot.weight as i64 + ctx.deltas.delta(begin, end);
        debug_assert!(new_weight >= 0, "batch deletes more keys than present");
        let new_weight = new_weight as usize;

        let rebalance = new_weight < min_weight || new_weight > max_weight;
        rebalancing_needed |= rebalance;
        descs.push(UpdateDescriptor {
            upd_begin: begin,
            upd_end: end,
            weight: new_weight,
            rebalance,
        });
        begin = end;
    }
    (descs, rebalancing_needed)
}

/// Apply `upd` to `node` in place, returning the refreshed router and
/// minimum for the enclosing slot.
pub(crate) fn update_node<K, P>(
    ctx: &UpdateCtx<'_, K>,
    node: &mut Node<K, P::Min>,
    upd: &UpdateDescriptor,
) -> SlotMeta<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    match node {
        Node::Leaf(leaf) => patch_leaf::<K, P>(ctx, leaf, upd),
        Node::Inner(inner) => {
            let (descs, rebalancing_needed) = partition_updates(ctx, inner, upd);
            if rebalancing_needed {
                splice_children::<K, P>(ctx, inner, descs, upd)
            } else {
                patch_children::<K, P>(ctx, inner, &descs, upd)
            }
        }
    }
}

/// Case 1: descend into the children that have updates; slots stay put.
fn patch_children<K, P>(
    ctx: &UpdateCtx<'_, K>,
    inner: &mut InnerNode<K, P::Min>,
    descs: &[UpdateDescriptor],
    upd: &UpdateDescriptor,
) -> SlotMeta<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    let patch_one = |slot: &mut Slot<K, P::Min>, desc: &UpdateDescriptor| {
        if desc.has_updates() {
            slot.weight = desc.weight;
            let meta = update_node::<K, P>(ctx, &mut slot.child, desc);
            slot.router = meta.router;
            slot.min = meta.min;
        }
    };

    if upd.len() < PARALLEL_UPDATE_GRAIN {
        for (slot, desc) in inner.slots.iter_mut().zip(descs) {
            patch_one(slot, desc);
        }
    } else {
        inner
            .slots
            .par_iter_mut()
            .zip(descs.par_iter())
            .for_each(|(slot, desc)| patch_one(slot, desc));
    }
    meta_of_inner::<K, P>(inner)
}

/// One unit of work while splicing a rebalanced inner node.
enum Segment<K, M> {
    /// Slot outside every run; patched if it has updates, copied otherwise.
    Single(Slot<K, M>, UpdateDescriptor),
    /// Maximal run of defective slots rewritten as one region.
    Run {
        members: Vec<(Slot<K, M>, UpdateDescriptor)>,
        weight: usize,
    },
}

/// Case 3: some children leave their bounds. Rewrite maximal defective
/// runs into fresh subtrees of designated size and splice them between the
/// surviving slots.
fn splice_children<K, P>(
    ctx: &UpdateCtx<'_, K>,
    inner: &mut InnerNode<K, P::Min>,
    descs: Vec<UpdateDescriptor>,
    upd: &UpdateDescriptor,
) -> SlotMeta<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    let level = inner.level;
    let designated = ctx.params.designated_subtreesize(level);
    trace!(level, slots = inner.slots.len(), "rewrite session");

    // Segment boundaries: a run keeps absorbing slots while they are
    // defective themselves, or while the run is still lighter than one
    // designated subtree (a too-small run could not be rebuilt in balance).
    let mut bounds: Vec<(usize, bool, usize)> = Vec::new(); // (end, is_run, weight)
    let mut i = 0;
    while i < descs.len() {
        let mut weight = 0usize;
        let mut open = false;
        while i < descs.len()
            && (descs[i].rebalance || (open && weight != 0 && weight < designated))
        {
            open = true;
            weight += descs[i].weight;
            i += 1;
        }
        if open {
            bounds.push((i, true, weight));
        } else {
            i += 1;
            bounds.push((i, false, 0));
        }
    }

    // Hand the slots out to their segments.
    let mut pairs = mem::take(&mut inner.slots).into_iter().zip(descs);
    let mut taken = 0usize;
    let segments: Vec<Segment<K, P::Min>> = bounds
        .into_iter()
        .map(|(end, is_run, weight)| {
            let members: Vec<_> = pairs.by_ref().take(end - taken).collect();
            taken = end;
            if is_run {
                Segment::Run { members, weight }
            } else {
                let (slot, desc) = members
                    .into_iter()
                    .next()
                    .expect("singleton segment is never empty");
                Segment::Single(slot, desc)
            }
        })
        .collect();

    let groups: Vec<Vec<Slot<K, P::Min>>> = if upd.len() < PARALLEL_UPDATE_GRAIN {
        segments
            .into_iter()
            .map(|segment| run_segment::<K, P>(ctx, level, segment))
            .collect()
    } else {
        segments
            .into_par_iter()
            .map(|segment| run_segment::<K, P>(ctx, level, segment))
            .collect()
    };

    inner.slots = groups.into_iter().flatten().collect();
    debug_assert!(!inner.slots.is_empty());
    debug_assert!(inner.slots.len() <= ctx.params.inner_max());
    meta_of_inner::<K, P>(inner)
}

fn run_segment<K, P>(
    ctx: &UpdateCtx<'_, K>,
    level: Level,
    segment: Segment<K, P::Min>,
) -> Vec<Slot<K, P::Min>>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    match segment {
        Segment::Single(mut slot, desc) => {
            if desc.has_updates() {
                slot.weight = desc.weight;
                let meta = update_node::<K, P>(ctx, &mut slot.child, &desc);
                slot.router = meta.router;
                slot.min = meta.min;
            }
            vec![slot]
        }
        Segment::Run { members, weight } => {
            if weight == 0 {
                // The whole run is deleted.
                for (slot, _) in members {
                    release(ctx.stats, slot.child);
                }
                return Vec::new();
            }
            let members: Vec<(Node<K, P::Min>, UpdateDescriptor)> = members
                .into_iter()
                .map(|(slot, desc)| (slot.child, desc))
                .collect();
            let keys = rebuild::rewrite_region::<K, P>(ctx, members, weight);
            rebuild::build_run_slots::<K, P>(ctx, &keys, level)
        }
    }
}

/// Refreshed router and minimum of an inner node, from its (updated) slots.
pub(crate) fn meta_of_inner<K, P>(inner: &InnerNode<K, P::Min>) -> SlotMeta<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    let last = inner.slots.len() - 1;
    SlotMeta {
        router: inner.slots[last].router.clone(),
        min: P::fold(inner.slots.iter().map(|slot| &slot.min)),
    }
}

/// Patch a leaf in place: merge its keys with the batch slice into the
/// worker's spare leaf, then swap the storage so the spare role moves to
/// the old allocation.
fn patch_leaf<K, P>(
    ctx: &UpdateCtx<'_, K>,
    leaf: &mut LeafNode<K>,
    upd: &UpdateDescriptor,
) -> SlotMeta<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    let ops = &ctx.updates[upd.upd_begin..upd.upd_end];
    ctx.spares.with_local(|_, spare| {
        spare.keys.clear();
        merge_into_vec(&leaf.keys, ops, &mut spare.keys);
        mem::swap(&mut spare.keys, &mut leaf.keys);
    });

    debug_assert_eq!(leaf.keys.len(), upd.weight);
    debug_assert!(leaf.keys.len() <= ctx.params.leaf_max());
    SlotMeta {
        router: leaf.keys[leaf.keys.len() - 1].clone(),
        min: P::leaf_min(&leaf.keys),
    }
}

/// Merge a sorted key run with a batch slice, honoring insert/delete
/// semantics. Deleted keys must be present; inserted keys must be absent.
fn merge_into_vec<K: Ord + Clone>(src: &[K], ops: &[Operation<K>], out: &mut Vec<K>) {
    let mut i = 0usize;
    for op in ops {
        match op.kind {
            OpKind::Delete => {
                while src[i] < op.key {
                    out.push(src[i].clone());
                    i += 1;
                }
                debug_assert!(src[i] == op.key, "delete of an absent key");
                i += 1;
            }
            OpKind::Insert => {
                while i < src.len() && src[i] < op.key {
                    out.push(src[i].clone());
                    i += 1;
                }
                debug_assert!(
                    i == src.len() || src[i] > op.key,
                    "insert of a key that is already present"
                );
                out.push(op.key.clone());
            }
        }
    }
    out.extend(src[i..].iter().cloned());
}
