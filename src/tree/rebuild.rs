//! Region rewrite and fresh-subtree construction.
//!
//! A rewrite region covers one or more adjacent subtrees whose post-update
//! weights left their bounds. The region's merged key sequence is streamed
//! into one pre-sized output buffer: every subtree knows its post-update
//! weight up front, so the buffer splits into rank-disjoint sub-slices
//! before the tasks fork, and each task fills exactly its own slice. Over
//! the finished sequence, fresh leaves of designated size and the inner
//! levels above them are built bottom-up, again forking per subtree.

use std::mem::{self, MaybeUninit};

use rayon::prelude::*;
use tracing::trace;

use crate::minima::MinPolicy;
use crate::node::{release, InnerNode, LeafNode, Node, Slot};
use crate::ops::{OpKind, Operation};
use crate::params::Level;

use super::update::{partition_updates, UpdateCtx, UpdateDescriptor};

/// Regions below this weight are rewritten and rebuilt serially.
const PARALLEL_REBUILD_GRAIN: usize = 1 << 10;

/// Stream a region of subtrees through their updates into a fresh,
/// contiguous key sequence of exactly `weight` keys. The consumed nodes
/// are freed.
pub(crate) fn rewrite_region<K, P>(
    ctx: &UpdateCtx<'_, K>,
    members: Vec<(Node<K, P::Min>, UpdateDescriptor)>,
    weight: usize,
) -> Vec<K>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    let mut buffer: Vec<MaybeUninit<K>> = Vec::with_capacity(weight);
    buffer.resize_with(weight, MaybeUninit::uninit);

    let mut rest: &mut [MaybeUninit<K>] = &mut buffer;
    let mut tasks = Vec::with_capacity(members.len());
    for (node, desc) in members {
        let (mine, next) = mem::take(&mut rest).split_at_mut(desc.weight);
        rest = next;
        if desc.weight == 0 {
            // Entirely deleted; nothing to stream.
            release(ctx.stats, node);
        } else {
            tasks.push((node, desc, mine));
        }
    }
    debug_assert!(rest.is_empty(), "member weights must cover the region");
    run_rewrites::<K, P>(ctx, tasks, weight);

    // SAFETY: the member slices partition `buffer`, and every rewrite task
    // wrote each cell of its slice exactly once (the merge loops fill the
    // slice completely or panic on a contract violation).
    unsafe { assume_init_keys(buffer) }
}

fn run_rewrites<K, P>(
    ctx: &UpdateCtx<'_, K>,
    tasks: Vec<(Node<K, P::Min>, UpdateDescriptor, &mut [MaybeUninit<K>])>,
    weight: usize,
) where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    if weight < PARALLEL_REBUILD_GRAIN {
        for (node, desc, out) in tasks {
            rewrite_node::<K, P>(ctx, node, &desc, out);
        }
    } else {
        tasks
            .into_par_iter()
            .for_each(|(node, desc, out)| rewrite_node::<K, P>(ctx, node, &desc, out));
    }
}

/// Stream one subtree through its updates into `out` (its rank range in
/// the enclosing region), freeing the subtree.
pub(crate) fn rewrite_node<K, P>(
    ctx: &UpdateCtx<'_, K>,
    node: Node<K, P::Min>,
    upd: &UpdateDescriptor,
    out: &mut [MaybeUninit<K>],
) where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    debug_assert_eq!(out.len(), upd.weight);
    match node {
        Node::Leaf(leaf) => {
            rewrite_leaf(ctx, &leaf, upd, out);
            ctx.stats.dec_leaf();
        }
        Node::Inner(inner) => {
            let (descs, _) = partition_updates(ctx, &inner, upd);
            let InnerNode { slots, .. } = *inner;

            let mut rest = out;
            let mut tasks = Vec::with_capacity(slots.len());
            for (slot, desc) in slots.into_iter().zip(descs) {
                let (mine, next) = mem::take(&mut rest).split_at_mut(desc.weight);
                rest = next;
                if desc.weight == 0 {
                    release(ctx.stats, slot.child);
                } else {
                    tasks.push((slot.child, desc, mine));
                }
            }
            debug_assert!(rest.is_empty(), "child weights must cover the subtree");
            run_rewrites::<K, P>(ctx, tasks, upd.weight);
            ctx.stats.dec_inner();
        }
    }
}

/// Merge one leaf with its update slice into its rank range. Wide leaves
/// are split across workers: each chunk of the update range locates its
/// source position by binary search and its output position through the
/// weight-delta prefix sum, making the chunks fully independent.
fn rewrite_leaf<K>(
    ctx: &UpdateCtx<'_, K>,
    leaf: &LeafNode<K>,
    upd: &UpdateDescriptor,
    out: &mut [MaybeUninit<K>],
) where
    K: Ord + Clone + Send + Sync,
{
    let ops = &ctx.updates[upd.upd_begin..upd.upd_end];
    let cutoff = ctx.params.designated_leafsize() * ctx.params.rewrite_threshold;
    let workers = rayon::current_num_threads();

    if workers < 2 || ops.len() < 2 || out.len() < cutoff {
        merge_into_slice(&leaf.keys, ops, 0, out);
        return;
    }

    let chunk_count = workers.min(ops.len());
    let per_chunk = ops.len().div_ceil(chunk_count);
    let total = out.len();

    // (first op, source position, output position) per chunk. The first
    // chunk starts at the subtree's own origin; later chunks locate the
    // source keys consumed before them by binary search and the output
    // keys written before them through the weight deltas.
    let mut starts = Vec::with_capacity(chunk_count);
    starts.push((0usize, 0usize, 0usize));
    let mut op_index = per_chunk;
    while op_index < ops.len() {
        let source = leaf.keys.partition_point(|key| *key < ops[op_index].key);
        let delta = ctx
            .deltas
            .delta(upd.upd_begin, upd.upd_begin + op_index);
        debug_assert!(source as i64 + delta >= 0);
        starts.push((op_index, source, (source as i64 + delta) as usize));
        op_index += per_chunk;
    }

    let mut rest = out;
    let mut tasks = Vec::with_capacity(starts.len());
    for (i, &(op_lo, source, out_lo)) in starts.iter().enumerate() {
        let (op_hi, out_hi) = starts
            .get(i + 1)
            .map_or((ops.len(), total), |&(op, _, out)| (op, out));
        let (mine, next) = mem::take(&mut rest).split_at_mut(out_hi - out_lo);
        rest = next;
        tasks.push((&ops[op_lo..op_hi], source, mine));
    }

    tasks
        .into_par_iter()
        .for_each(|(chunk_ops, source, out_chunk)| {
            merge_into_slice(&leaf.keys, chunk_ops, source, out_chunk);
        });
}

/// Merge `src[i..]` with an update slice, writing exactly `out.len()` keys:
/// after the updates are exhausted, source keys are copied until the slice
/// is full (up to the next chunk's start, or the region end).
fn merge_into_slice<K: Ord + Clone>(
    src: &[K],
    ops: &[Operation<K>],
    mut i: usize,
    out: &mut [MaybeUninit<K>],
) {
    let mut o = 0usize;
    for op in ops {
        match op.kind {
            OpKind::Delete => {
                while src[i] < op.key {
                    out[o].write(src[i].clone());
                    o += 1;
                    i += 1;
                }
                debug_assert!(src[i] == op.key, "delete of an absent key");
                i += 1;
            }
            OpKind::Insert => {
                while i < src.len() && src[i] < op.key {
                    out[o].write(src[i].clone());
                    o += 1;
                    i += 1;
                }
                debug_assert!(
                    i == src.len() || src[i] > op.key,
                    "insert of a key that is already present"
                );
                out[o].write(op.key.clone());
                o += 1;
            }
        }
    }
    while o < out.len() {
        out[o].write(src[i].clone());
        o += 1;
        i += 1;
    }
}

/// Reinterpret a fully initialized buffer as its keys.
///
/// # Safety
/// Every cell of `buffer` must have been written.
unsafe fn assume_init_keys<K>(buffer: Vec<MaybeUninit<K>>) -> Vec<K> {
    let mut buffer = mem::ManuallyDrop::new(buffer);
    let ptr = buffer.as_mut_ptr().cast::<K>();
    let len = buffer.len();
    let cap = buffer.capacity();
    // SAFETY: `MaybeUninit<K>` has the layout of `K`, and per the caller's
    // contract all `len` cells are initialized.
    unsafe { Vec::from_raw_parts(ptr, len, cap) }
}

/// Build the children of an inner node on `level` over a finished key
/// sequence: `num_subtrees` subtrees of designated size, the last one
/// absorbing the remainder.
pub(crate) fn build_run_slots<K, P>(
    ctx: &UpdateCtx<'_, K>,
    keys: &[K],
    level: Level,
) -> Vec<Slot<K, P::Min>>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    debug_assert!(level >= 1);
    debug_assert!(!keys.is_empty());

    let designated = ctx.params.designated_subtreesize(level);
    let count = ctx.params.num_subtrees(keys.len(), designated);
    trace!(level, count, n = keys.len(), "building subtrees");

    let ranges: Vec<(usize, usize)> = (0..count)
        .map(|i| {
            let lo = i * designated;
            let hi = if i + 1 == count {
                keys.len()
            } else {
                lo + designated
            };
            (lo, hi)
        })
        .collect();

    if keys.len() < PARALLEL_REBUILD_GRAIN {
        ranges
            .into_iter()
            .map(|(lo, hi)| build_slot::<K, P>(ctx, &keys[lo..hi], level - 1))
            .collect()
    } else {
        ranges
            .into_par_iter()
            .map(|(lo, hi)| build_slot::<K, P>(ctx, &keys[lo..hi], level - 1))
            .collect()
    }
}

/// Build one subtree of `level` over `keys` and describe it as a slot.
fn build_slot<K, P>(ctx: &UpdateCtx<'_, K>, keys: &[K], level: Level) -> Slot<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    if level == 0 {
        ctx.stats.inc_leaf();
        let mut leaf = LeafNode::with_capacity(ctx.params.leaf_max());
        leaf.keys.extend(keys.iter().cloned());
        Slot {
            router: keys[keys.len() - 1].clone(),
            weight: keys.len(),
            min: P::leaf_min(keys),
            child: Node::Leaf(Box::new(leaf)),
        }
    } else {
        let slots = build_run_slots::<K, P>(ctx, keys, level);
        ctx.stats.inc_inner();
        Slot {
            router: slots[slots.len() - 1].router.clone(),
            weight: keys.len(),
            min: P::fold(slots.iter().map(|slot| &slot.min)),
            child: Node::Inner(Box::new(InnerNode { level, slots })),
        }
    }
}

/// Build a whole tree of the given root level over a finished sequence.
pub(crate) fn build_tree<K, P>(
    ctx: &UpdateCtx<'_, K>,
    keys: &[K],
    level: Level,
) -> Node<K, P::Min>
where
    K: Ord + Clone + Send + Sync,
    P: MinPolicy<K>,
{
    build_slot::<K, P>(ctx, keys, level).child
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(src: &[u64], ops: &[Operation<u64>]) -> Vec<u64> {
        let mut delta = 0i64;
        for op in ops {
            delta += op.kind.weight();
        }
        let len = (src.len() as i64 + delta) as usize;
        let mut out: Vec<MaybeUninit<u64>> = Vec::new();
        out.resize_with(len, MaybeUninit::uninit);
        merge_into_slice(src, ops, 0, &mut out);
        unsafe { assume_init_keys(out) }
    }

    #[test]
    fn test_merge_into_slice_mixed() {
        let out = merged(
            &[10, 20, 30, 40],
            &[
                Operation::insert(5),
                Operation::delete(20),
                Operation::delete(40),
            ],
        );
        assert_eq!(out, vec![5, 10, 30]);
    }

    #[test]
    fn test_merge_into_slice_copies_tail() {
        let out = merged(&[1, 2, 3, 4, 5], &[Operation::delete(1)]);
        assert_eq!(out, vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_merge_partial_chunk_fills_gap() {
        // A chunk that ends before the next chunk's source position must
        // keep copying until its slice is full.
        let src = [1u64, 2, 3, 4, 5, 6, 7, 8];
        let mut out: Vec<MaybeUninit<u64>> = Vec::new();
        out.resize_with(5, MaybeUninit::uninit);
        // Chunk owns ops [delete 2]; its slice spans output ranks [0, 5),
        // i.e. keys 1, 3, 4, 5, 6 -- the gap up to the next chunk.
        merge_into_slice(&src, &[Operation::delete(2)], 0, &mut out);
        let out = unsafe { assume_init_keys(out) };
        assert_eq!(out, vec![1, 3, 4, 5, 6]);
    }
}
