//! Insert with split propagation.
//!
//! Descent and split incorporation are mutually recursive: a leaf that
//! reaches the fanout bound splits, handing its parent a split record to
//! incorporate; a parent that overflows incorporating one splits in turn.
//! A split outcome surfacing at the root grows the tree by one level.

use std::collections::BTreeMap;

use super::{
    split::{split_internal_records, split_leaf_records},
    BTree, NodeProvider,
};
use crate::{
    error::{NodeId, Result},
    node::{InternalNode, LeafNode, Node, ORDER},
};

/// Result of inserting into a subtree: either the transaction absorbed the
/// change, or the subtree's top node split and the caller must incorporate
/// the new separator.
pub(crate) enum InsertOutcome {
    /// Change absorbed; no structural propagation.
    Done,
    /// The node split: `key` separates `left` (original id) from `right`
    /// (fresh id).
    Split { key: Vec<u8>, left: NodeId, right: NodeId },
}

impl<P: NodeProvider> BTree<P> {
    /// Inserts (or replaces) `key → value`.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.insert_into(self.root, key, value)? {
            InsertOutcome::Done => {},
            InsertOutcome::Split { key, left, right } => {
                // Root split: a new internal root covers the two halves.
                let id = self.provider.fresh_id();
                let mut records = BTreeMap::new();
                records.insert(None, left);
                records.insert(Some(key), right);
                self.provider.stage(Node::Internal(InternalNode { id, records }));
                self.root = id;
            },
        }
        Ok(())
    }

    fn insert_into(&mut self, id: NodeId, key: &[u8], value: &[u8]) -> Result<InsertOutcome> {
        let node = self.provider.node(id)?;
        match &*node {
            Node::Leaf(leaf) => Ok(self.insert_leaf(leaf.clone(), key, value)),
            Node::Internal(internal) => {
                let child = internal.child_for(key);
                match self.insert_into(child, key, value)? {
                    InsertOutcome::Done => Ok(InsertOutcome::Done),
                    InsertOutcome::Split { key: split_key, left: _, right } => {
                        // The left half kept the child's id and is already
                        // filed under its separator; only the right half
                        // needs a new entry.
                        let mut parent = internal.clone();
                        parent.records.insert(Some(split_key), right);
                        if parent.records.len() < ORDER {
                            self.provider.stage(Node::Internal(parent));
                            Ok(InsertOutcome::Done)
                        } else {
                            Ok(self.split_internal(parent))
                        }
                    },
                }
            },
        }
    }

    fn insert_leaf(&mut self, mut leaf: LeafNode, key: &[u8], value: &[u8]) -> InsertOutcome {
        leaf.records.insert(key.to_vec(), value.to_vec());
        if leaf.records.len() < ORDER {
            self.provider.stage(Node::Leaf(leaf));
            InsertOutcome::Done
        } else {
            self.split_leaf(leaf)
        }
    }

    fn split_leaf(&mut self, leaf: LeafNode) -> InsertOutcome {
        let LeafNode { id, records, next } = leaf;
        let (lower, split_key, upper) = split_leaf_records(records);

        let right_id = self.provider.fresh_id();
        // Thread the leaf chain: original → new right half → old successor
        self.provider.stage(Node::Leaf(LeafNode { id: right_id, records: upper, next }));
        self.provider.stage(Node::Leaf(LeafNode { id, records: lower, next: Some(right_id) }));

        InsertOutcome::Split { key: split_key, left: id, right: right_id }
    }

    fn split_internal(&mut self, node: InternalNode) -> InsertOutcome {
        let InternalNode { id, records } = node;
        let (lower, split_key, upper) = split_internal_records(records);

        let right_id = self.provider.fresh_id();
        self.provider.stage(Node::Internal(InternalNode { id: right_id, records: upper }));
        self.provider.stage(Node::Internal(InternalNode { id, records: lower }));

        InsertOutcome::Split { key: split_key, left: id, right: right_id }
    }
}
