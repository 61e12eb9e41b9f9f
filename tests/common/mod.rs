//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use bulktree::{OpKind, Operation, TreeParams};

/// Small parameters so modest batches exercise every rebalancing path.
pub fn small_params() -> TreeParams {
    TreeParams::new(8, 8)
}

/// Insert operations for an iterator of keys (must yield sorted keys).
pub fn inserts(keys: impl IntoIterator<Item = i64>) -> Vec<Operation<i64>> {
    keys.into_iter().map(Operation::insert).collect()
}

/// Delete operations for an iterator of keys (must yield sorted keys).
pub fn deletes(keys: impl IntoIterator<Item = i64>) -> Vec<Operation<i64>> {
    keys.into_iter().map(Operation::delete).collect()
}

/// Merge deletions and insertions into one batch sorted by key.
pub fn mixed(
    delete_keys: impl IntoIterator<Item = i64>,
    insert_keys: impl IntoIterator<Item = i64>,
) -> Vec<Operation<i64>> {
    let mut by_key = BTreeMap::new();
    for key in delete_keys {
        let previous = by_key.insert(key, OpKind::Delete);
        assert!(previous.is_none(), "duplicate key in batch");
    }
    for key in insert_keys {
        let previous = by_key.insert(key, OpKind::Insert);
        assert!(previous.is_none(), "duplicate key in batch");
    }
    by_key
        .into_iter()
        .map(|(key, kind)| Operation { kind, key })
        .collect()
}
