//! Record-map splitting shared by insert and rebalance.
//!
//! A split takes an ordered record map and cuts it at `ceil(len / 2)`: the
//! lower half keeps the original node's id, the upper half moves to a new
//! (or the sibling's) id. The split key — the first key of the upper half —
//! becomes the separator the parent files the upper half under. For
//! internal nodes the upper half's first entry is renamed to the
//! minus-infinity sentinel, since its subtree already covers everything at
//! or above the split key.

use std::collections::BTreeMap;

use crate::{
    error::NodeId,
    node::Separator,
};

/// Splits leaf records. Returns `(lower, split_key, upper)`.
pub(crate) fn split_leaf_records(
    records: BTreeMap<Vec<u8>, Vec<u8>>,
) -> (BTreeMap<Vec<u8>, Vec<u8>>, Vec<u8>, BTreeMap<Vec<u8>, Vec<u8>>) {
    let pos = records.len().div_ceil(2);
    let split_key = records
        .keys()
        .nth(pos)
        .cloned()
        .expect("split position lies strictly inside the record range");

    let mut lower = records;
    let upper = lower.split_off(&split_key);
    (lower, split_key, upper)
}

/// Splits internal records and installs the sentinel in the upper half.
/// Returns `(lower, split_key, upper)`.
pub(crate) fn split_internal_records(
    records: BTreeMap<Separator, NodeId>,
) -> (BTreeMap<Separator, NodeId>, Vec<u8>, BTreeMap<Separator, NodeId>) {
    let pos = records.len().div_ceil(2);
    let split_at = records
        .keys()
        .nth(pos)
        .cloned()
        .expect("split position lies strictly inside the record range");

    let mut lower = records;
    let mut upper = lower.split_off(&split_at);

    // The sentinel sorts first, so a non-zero split position always lands
    // on a real separator.
    let split_key = split_at.expect("split key is a real separator");
    let first_child = upper
        .remove(&Some(split_key.clone()))
        .expect("upper half starts at the split key");
    upper.insert(None, first_child);

    (lower, split_key, upper)
}
