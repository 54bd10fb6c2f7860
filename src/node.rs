//! In-memory node representation for the copy-on-write B+ tree.
//!
//! A node is either a leaf (key → value records plus a link to the next leaf
//! in key order) or an internal node (separator → child-id records). The
//! smallest entry of an internal node uses the minus-infinity sentinel,
//! modeled as `None`: Rust's `Option` ordering places `None` below every
//! `Some(key)`, so the sentinel sorts below all real separators for free.
//!
//! Nodes are plain values: tree operations clone a node out of its `Arc`,
//! mutate the clone, and stage it as dirty. The previous image remains
//! readable by older snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::NodeId;

/// Per-node fanout bound. Nodes split when their record count reaches this
/// value; non-root nodes rebalance when they drop below `ORDER / 2`.
pub const ORDER: usize = 32;

/// Minimum record count for non-root nodes.
pub const MIN_RECORDS: usize = ORDER / 2;

/// Id of the bootstrap root: fetching it from an empty database yields a
/// synthetic empty leaf.
pub const BOOTSTRAP_ROOT_ID: NodeId = 1;

/// Separator key in an internal node. `None` is the minus-infinity sentinel
/// covering all keys below the first real separator.
pub type Separator = Option<Vec<u8>>;

/// A B+ tree node: leaf or internal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    /// Leaf node carrying user records.
    Leaf(LeafNode),
    /// Internal node carrying separator → child-id records.
    Internal(InternalNode),
}

/// Leaf node: ordered user records plus the id of the next leaf in key
/// order (`None` at the right edge of the tree).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafNode {
    /// Unique node id.
    pub id: NodeId,
    /// Ordered key → value records.
    pub records: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Next leaf in ascending key order.
    pub next: Option<NodeId>,
}

/// Internal node: ordered separator → child-id records. An internal node
/// with `r` records has `r` children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalNode {
    /// Unique node id.
    pub id: NodeId,
    /// Ordered separator → child records; the `None` sentinel is always the
    /// first entry when present.
    pub records: BTreeMap<Separator, NodeId>,
}

impl LeafNode {
    /// Creates an empty leaf with the given id.
    pub fn empty(id: NodeId) -> Self {
        Self { id, records: BTreeMap::new(), next: None }
    }
}

impl InternalNode {
    /// Returns the entry with the greatest separator `<=` the key: the child
    /// whose subtree covers `key`. The sentinel matches everything below the
    /// first real separator.
    pub fn matching_child(&self, key: &[u8]) -> (Separator, NodeId) {
        let bound = Some(key.to_vec());
        let (sep, &child) = self
            .records
            .range(..=bound)
            .next_back()
            .expect("internal node has at least the sentinel entry");
        (sep.clone(), child)
    }

    /// Returns the id of the child selected for `key`.
    pub fn child_for(&self, key: &[u8]) -> NodeId {
        self.matching_child(key).1
    }
}

impl Node {
    /// Returns the node's id.
    pub fn id(&self) -> NodeId {
        match self {
            Node::Leaf(leaf) => leaf.id,
            Node::Internal(node) => node.id,
        }
    }

    /// Returns the number of records in the node.
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf(leaf) => leaf.records.len(),
            Node::Internal(node) => node.records.len(),
        }
    }

    /// Checks whether the node has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks whether the node is a leaf.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn internal_with(records: &[(Separator, NodeId)]) -> InternalNode {
        InternalNode { id: 10, records: records.iter().cloned().collect() }
    }

    #[test]
    fn test_sentinel_sorts_below_real_keys() {
        let node = internal_with(&[
            (None, 1),
            (Some(b"m".to_vec()), 2),
            (Some(b"t".to_vec()), 3),
        ]);

        // First entry must be the sentinel
        let first = node.records.keys().next().unwrap();
        assert!(first.is_none());
    }

    #[test]
    fn test_matching_child_selects_greatest_leq() {
        let node = internal_with(&[
            (None, 1),
            (Some(b"m".to_vec()), 2),
            (Some(b"t".to_vec()), 3),
        ]);

        assert_eq!(node.child_for(b"a"), 1); // below all separators -> sentinel
        assert_eq!(node.child_for(b"m"), 2); // exact separator match
        assert_eq!(node.child_for(b"p"), 2);
        assert_eq!(node.child_for(b"t"), 3);
        assert_eq!(node.child_for(b"z"), 3);
    }

    #[test]
    fn test_matching_child_returns_separator() {
        let node = internal_with(&[(None, 1), (Some(b"m".to_vec()), 2)]);

        let (sep, child) = node.matching_child(b"a");
        assert_eq!(sep, None);
        assert_eq!(child, 1);

        let (sep, child) = node.matching_child(b"x");
        assert_eq!(sep, Some(b"m".to_vec()));
        assert_eq!(child, 2);
    }

    #[test]
    fn test_empty_leaf() {
        let leaf = LeafNode::empty(BOOTSTRAP_ROOT_ID);
        assert_eq!(leaf.id, 1);
        assert!(leaf.records.is_empty());
        assert_eq!(leaf.next, None);

        let node = Node::Leaf(leaf);
        assert!(node.is_leaf());
        assert!(node.is_empty());
        assert_eq!(node.len(), 0);
    }
}
