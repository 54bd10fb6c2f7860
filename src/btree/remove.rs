//! Remove with rebalancing.
//!
//! A leaf that drops below the minimum record count signals an underflow
//! to its parent, which resolves it against a sibling: borrow records
//! (redistribute) when a sibling has spares, otherwise merge the pair into
//! one node and tombstone the other. The parent's separator bookkeeping
//! may underflow the parent in turn, propagating the signal upward. A root
//! left with a single record collapses: its only child becomes the root.
//!
//! Removing a key that is not present is a no-op: nothing is dirtied and
//! no rebalancing runs.

use std::collections::BTreeMap;

use super::{
    split::{split_internal_records, split_leaf_records},
    BTree, NodeProvider,
};
use crate::{
    error::{NodeId, Result},
    node::{InternalNode, LeafNode, Node, Separator, MIN_RECORDS},
};

/// Result of removing from a subtree: either the transaction absorbed the
/// change, or the subtree's top node dropped below the minimum and the
/// caller must combine it with a sibling. The underflowed node rides along
/// unstaged; whoever resolves the underflow stages its final form.
pub(crate) enum RemoveOutcome {
    /// Change absorbed; no structural propagation.
    Done,
    /// The node underflowed; its parent must rebalance it.
    Underflow(Node),
}

/// How a sibling pair was rebalanced.
enum Resolution {
    /// Records were shared out evenly; the new separator between the pair.
    DistributedBy(Vec<u8>),
    /// The pair became one node; the right member was tombstoned.
    Merged,
}

impl<P: NodeProvider> BTree<P> {
    /// Removes `key` if present. Removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        let root = self.provider.node(self.root)?;
        match &*root {
            Node::Leaf(leaf) => {
                // The root leaf may hold any record count, including zero.
                match self.remove_from_leaf(leaf.clone(), key) {
                    RemoveOutcome::Done => {},
                    RemoveOutcome::Underflow(node) => self.provider.stage(node),
                }
                Ok(())
            },
            Node::Internal(internal) => {
                match self.remove_from_internal(internal.clone(), key)? {
                    RemoveOutcome::Done => {},
                    RemoveOutcome::Underflow(node) => {
                        let Node::Internal(root_node) = node else {
                            unreachable!("internal removal propagates internal nodes");
                        };
                        if root_node.records.len() == 1 {
                            // Collapse: the only child becomes the root.
                            let (_, child) = root_node
                                .records
                                .into_iter()
                                .next()
                                .expect("single-record root");
                            self.provider.tombstone(self.root);
                            self.root = child;
                        } else {
                            self.provider.stage(Node::Internal(root_node));
                        }
                    },
                }
                Ok(())
            },
        }
    }

    fn remove_from_leaf(&mut self, mut leaf: LeafNode, key: &[u8]) -> RemoveOutcome {
        if leaf.records.remove(key).is_none() {
            return RemoveOutcome::Done;
        }
        if leaf.records.len() >= MIN_RECORDS {
            self.provider.stage(Node::Leaf(leaf));
            RemoveOutcome::Done
        } else {
            RemoveOutcome::Underflow(Node::Leaf(leaf))
        }
    }

    fn remove_from_internal(&mut self, node: InternalNode, key: &[u8]) -> Result<RemoveOutcome> {
        let (child_key, child_id) = node.matching_child(key);
        let child = self.provider.node(child_id)?;

        let outcome = match &*child {
            Node::Leaf(leaf) => self.remove_from_leaf(leaf.clone(), key),
            Node::Internal(internal) => self.remove_from_internal(internal.clone(), key)?,
        };

        match outcome {
            RemoveOutcome::Done => Ok(RemoveOutcome::Done),
            RemoveOutcome::Underflow(focal) => self.combine_children(node, child_key, focal),
        }
    }

    /// Resolves an underflowed child against one of its siblings and
    /// applies the separator bookkeeping to the parent.
    fn combine_children(
        &mut self,
        mut parent: InternalNode,
        child_key: Separator,
        focal: Node,
    ) -> Result<RemoveOutcome> {
        let separators: Vec<Separator> = parent.records.keys().cloned().collect();
        let idx = separators
            .iter()
            .position(|sep| *sep == child_key)
            .expect("focal child is filed in its parent");

        let left = match idx.checked_sub(1) {
            Some(i) => {
                let id = parent.records[&separators[i]];
                Some((*self.provider.node(id)?).clone())
            },
            None => None,
        };
        let right = match separators.get(idx + 1) {
            Some(sep) => {
                let sep = sep.clone().expect("non-first separator is a real key");
                let id = parent.records[&Some(sep.clone())];
                Some((sep, (*self.provider.node(id)?).clone()))
            },
            None => None,
        };

        // Prefer borrowing over merging: a spare record in the right
        // sibling is borrowed first, then one in the left; only when both
        // siblings sit at the minimum is the pair merged, right first.
        let (mid_key, resolution) = match (left, right) {
            (_, Some((right_key, sibling))) if sibling.len() > MIN_RECORDS => {
                let by = self.redistribute(&right_key, focal, sibling);
                (right_key, Resolution::DistributedBy(by))
            },
            (Some(sibling), _) if sibling.len() > MIN_RECORDS => {
                let mid = child_key.expect("child with a left sibling has a real separator");
                let by = self.redistribute(&mid, sibling, focal);
                (mid, Resolution::DistributedBy(by))
            },
            (_, Some((right_key, sibling))) => {
                self.merge(&right_key, focal, sibling);
                (right_key, Resolution::Merged)
            },
            (Some(sibling), None) => {
                let mid = child_key.expect("child with a left sibling has a real separator");
                self.merge(&mid, sibling, focal);
                (mid, Resolution::Merged)
            },
            (None, None) => {
                // No sibling at all: nothing to combine with. Keep the
                // small child and leave the parent untouched.
                self.provider.stage(focal);
                return Ok(RemoveOutcome::Done);
            },
        };

        // The mid separator filed the pair's right member; a merge drops
        // it, a redistribution refiles it under the new separator.
        let right_member = parent
            .records
            .remove(&Some(mid_key))
            .expect("mid separator is filed in the parent");
        if let Resolution::DistributedBy(separator) = resolution {
            parent.records.insert(Some(separator), right_member);
        }

        if parent.records.len() < MIN_RECORDS {
            Ok(RemoveOutcome::Underflow(Node::Internal(parent)))
        } else {
            self.provider.stage(Node::Internal(parent));
            Ok(RemoveOutcome::Done)
        }
    }

    /// Sibling selection happens in the caller; here the pair arrives in
    /// key order. Shares the pair's records out evenly and returns the
    /// new separator between them.
    fn redistribute(&mut self, mid_key: &[u8], left: Node, right: Node) -> Vec<u8> {
        match (left, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                let mut combined = left.records;
                combined.extend(right.records);
                let (lower, split_key, upper) = split_leaf_records(combined);

                self.provider.stage(Node::Leaf(LeafNode {
                    id: left.id,
                    records: lower,
                    next: left.next,
                }));
                self.provider.stage(Node::Leaf(LeafNode {
                    id: right.id,
                    records: upper,
                    next: right.next,
                }));
                split_key
            },
            (Node::Internal(left), Node::Internal(right)) => {
                let combined = combine_internal_records(mid_key, left.records, right.records);
                let (lower, split_key, upper) = split_internal_records(combined);

                self.provider.stage(Node::Internal(InternalNode { id: left.id, records: lower }));
                self.provider.stage(Node::Internal(InternalNode { id: right.id, records: upper }));
                split_key
            },
            _ => unreachable!("siblings share a node type"),
        }
    }

    /// Folds the pair into its left member and tombstones the right.
    fn merge(&mut self, mid_key: &[u8], left: Node, right: Node) {
        match (left, right) {
            (Node::Leaf(left), Node::Leaf(right)) => {
                let mut combined = left.records;
                combined.extend(right.records);
                self.provider.stage(Node::Leaf(LeafNode {
                    id: left.id,
                    records: combined,
                    next: right.next,
                }));
                self.provider.tombstone(right.id);
            },
            (Node::Internal(left), Node::Internal(right)) => {
                let combined = combine_internal_records(mid_key, left.records, right.records);
                self.provider.stage(Node::Internal(InternalNode { id: left.id, records: combined }));
                self.provider.tombstone(right.id);
            },
            _ => unreachable!("siblings share a node type"),
        }
    }
}

/// Concatenates internal sibling records, restoring the right node's
/// sentinel entry to its real separator (the mid key) first.
fn combine_internal_records(
    mid_key: &[u8],
    left: BTreeMap<Separator, NodeId>,
    mut right: BTreeMap<Separator, NodeId>,
) -> BTreeMap<Separator, NodeId> {
    let first_child = right.remove(&None).expect("internal node has a sentinel entry");
    right.insert(Some(mid_key.to_vec()), first_child);

    let mut combined = left;
    combined.extend(right);
    combined
}
