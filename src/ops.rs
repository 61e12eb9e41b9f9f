//! Batch update model.
//!
//! A bulk update is an ordered sequence of [`Operation`] values, sorted
//! strictly by key, with at most one update per key. Batches come in three
//! flavors ([`BatchKind`]): pure insertions, pure deletions, and mixed.
//! Pure batches admit a closed-form weight delta and skip the prefix-sum
//! materialization entirely.

/// Kind of a single bulk-update operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Insert a key that is not yet present.
    Insert,
    /// Delete a key that is currently present.
    Delete,
}

impl OpKind {
    /// Signed weight contribution of one operation of this kind.
    #[inline]
    #[must_use]
    pub const fn weight(self) -> i64 {
        match self {
            Self::Insert => 1,
            Self::Delete => -1,
        }
    }
}

/// A single element of a bulk update batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation<K> {
    /// What to do with the key.
    pub kind: OpKind,
    /// The key acted upon.
    pub key: K,
}

impl<K> Operation<K> {
    /// Shorthand for an insertion.
    #[inline]
    pub const fn insert(key: K) -> Self {
        Self {
            kind: OpKind::Insert,
            key,
        }
    }

    /// Shorthand for a deletion.
    #[inline]
    pub const fn delete(key: K) -> Self {
        Self {
            kind: OpKind::Delete,
            key,
        }
    }
}

/// Flavor of a whole batch.
///
/// For a pure batch the weight delta of any sub-range `[i, j)` is
/// `(j - i) * sign`, so no prefix-sum array is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Every operation is an insertion.
    InsertsOnly,
    /// Every operation is a deletion.
    DeletesOnly,
    /// Insertions and deletions interleave.
    Mixed,
}

impl BatchKind {
    /// Per-operation weight for pure batches.
    ///
    /// # Panics
    /// Panics if called on [`BatchKind::Mixed`].
    #[inline]
    #[must_use]
    pub const fn sign(self) -> i64 {
        match self {
            Self::InsertsOnly => 1,
            Self::DeletesOnly => -1,
            Self::Mixed => panic!("mixed batches have no uniform sign"),
        }
    }
}

/// Classify a batch by scanning for the first operation whose kind differs
/// from the first one. Pure batches pay a full scan but no allocation.
#[must_use]
pub fn classify<K>(ops: &[Operation<K>]) -> BatchKind {
    let Some(first) = ops.first() else {
        return BatchKind::InsertsOnly;
    };
    if ops[1..].iter().any(|op| op.kind != first.kind) {
        return BatchKind::Mixed;
    }
    match first.kind {
        OpKind::Insert => BatchKind::InsertsOnly,
        OpKind::Delete => BatchKind::DeletesOnly,
    }
}

/// Debug-only check of the batch contract: keys strictly ascending, hence
/// unique, hence at most one update per key.
///
/// Release builds skip the check; violating the contract there leaves the
/// tree in an unspecified (but memory-safe) state.
pub(crate) fn debug_validate_batch<K: Ord>(ops: &[Operation<K>]) {
    debug_assert!(
        ops.windows(2).all(|w| w[0].key < w[1].key),
        "bulk update batch must be strictly sorted by key"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_weights() {
        assert_eq!(OpKind::Insert.weight(), 1);
        assert_eq!(OpKind::Delete.weight(), -1);
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify::<u64>(&[]), BatchKind::InsertsOnly);
    }

    #[test]
    fn test_classify_pure() {
        let ins: Vec<_> = (0..10u64).map(Operation::insert).collect();
        assert_eq!(classify(&ins), BatchKind::InsertsOnly);

        let del: Vec<_> = (0..10u64).map(Operation::delete).collect();
        assert_eq!(classify(&del), BatchKind::DeletesOnly);
    }

    #[test]
    fn test_classify_mixed() {
        let ops = vec![
            Operation::insert(1u64),
            Operation::delete(2),
            Operation::insert(3),
        ];
        assert_eq!(classify(&ops), BatchKind::Mixed);
    }

    #[test]
    fn test_sign() {
        assert_eq!(BatchKind::InsertsOnly.sign(), 1);
        assert_eq!(BatchKind::DeletesOnly.sign(), -1);
    }

    #[test]
    #[should_panic(expected = "strictly sorted")]
    #[cfg(debug_assertions)]
    fn test_validate_rejects_unsorted() {
        let ops = vec![Operation::insert(3u64), Operation::insert(1)];
        debug_validate_batch(&ops);
    }

    #[test]
    #[should_panic(expected = "strictly sorted")]
    #[cfg(debug_assertions)]
    fn test_validate_rejects_duplicate_key() {
        let ops = vec![Operation::delete(3u64), Operation::insert(3)];
        debug_validate_batch(&ops);
    }
}
