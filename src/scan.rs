//! Weight-delta prefix sums.
//!
//! `deltas[j] - deltas[i]` is the net size change realized by the updates
//! in `[i, j)`. Pure batches use the closed form `(j - i) * sign` and never
//! materialize anything; mixed batches fill an exclusive prefix-sum array
//! with a two-pass scan (per-chunk sums, then a downsweep writing final
//! values), chunked across workers.

use rayon::prelude::*;

use crate::ops::{BatchKind, Operation};

/// Below this many operations the serial scan wins.
const PARALLEL_SCAN_GRAIN: usize = 1 << 13;

/// Resolved weight deltas for one batch.
#[derive(Clone, Copy)]
pub(crate) enum WeightDeltas<'a> {
    /// Pure batch: every operation contributes `sign`.
    Pure(i64),
    /// Mixed batch: exclusive prefix sums, length `n + 1`.
    Mixed(&'a [i64]),
}

impl WeightDeltas<'_> {
    /// Net weight change of the update range `[begin, end)`.
    #[inline]
    pub fn delta(&self, begin: usize, end: usize) -> i64 {
        match self {
            Self::Pure(sign) => (end - begin) as i64 * sign,
            Self::Mixed(sums) => sums[end] - sums[begin],
        }
    }
}

/// Fill `out` with the exclusive prefix sums of a mixed batch:
/// `out[0] = 0`, `out[i + 1] = out[i] + weight(ops[i])`.
pub(crate) fn compute_mixed_deltas<K: Sync>(ops: &[Operation<K>], out: &mut Vec<i64>) {
    let n = ops.len();
    out.clear();
    out.resize(n + 1, 0);

    if n < PARALLEL_SCAN_GRAIN {
        let mut sum = 0i64;
        for (i, op) in ops.iter().enumerate() {
            sum += op.kind.weight();
            out[i + 1] = sum;
        }
        return;
    }

    let chunk = n.div_ceil(rayon::current_num_threads() * 4).max(1);

    // Upsweep: per-chunk sums.
    let sums: Vec<i64> = ops
        .par_chunks(chunk)
        .map(|c| c.iter().map(|op| op.kind.weight()).sum())
        .collect();

    // Exclusive scan of the chunk sums.
    let mut offsets = Vec::with_capacity(sums.len());
    let mut running = 0i64;
    for sum in &sums {
        offsets.push(running);
        running += sum;
    }

    // Downsweep: final values per chunk.
    out[1..]
        .par_chunks_mut(chunk)
        .zip(ops.par_chunks(chunk).zip(offsets.par_iter()))
        .for_each(|(out_chunk, (ops_chunk, &base))| {
            let mut sum = base;
            for (slot, op) in out_chunk.iter_mut().zip(ops_chunk) {
                sum += op.kind.weight();
                *slot = sum;
            }
        });
}

/// Net size change of a whole batch without touching any array.
#[inline]
pub(crate) fn total_delta(kind: BatchKind, n: usize, mixed: &[i64]) -> i64 {
    match kind {
        BatchKind::Mixed => mixed[n],
        pure => n as i64 * pure.sign(),
    }
}
