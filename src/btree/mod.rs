//! Copy-on-write B+ tree algorithms.
//!
//! The tree never mutates a node in place: operations clone the node they
//! touch, apply the change, and stage the clone through the
//! [`NodeProvider`]. Staged nodes overlay the committed snapshot until the
//! owning transaction commits, so every reader keeps a consistent view.
//!
//! ## Structure
//!
//! - `split.rs`: record-map splitting shared by insert and rebalance
//! - `insert.rs`: insert with split propagation
//! - `remove.rs`: remove with redistribute/merge and root collapse

mod insert;
mod remove;
mod split;

use std::{ops::Bound, sync::Arc};

use crate::{
    error::{NodeId, Result},
    node::Node,
};

/// Trait for providing node access to the B+ tree.
///
/// This abstraction allows the tree to work with different providers:
/// - Read-only providers for read transactions
/// - Dirty-overlay providers for write transactions
pub trait NodeProvider {
    /// Fetches a node by id (dirty overlay first, then committed state).
    fn node(&self, id: NodeId) -> Result<Arc<Node>>;

    /// Stages a new image of a node as dirty.
    fn stage(&mut self, node: Node);

    /// Stages a deletion tombstone for a node id.
    fn tombstone(&mut self, id: NodeId);

    /// Allocates a fresh node id.
    fn fresh_id(&mut self) -> NodeId;
}

/// B+ tree accessor rooted at a specific node.
///
/// Short-lived: transactions construct one per operation and read the
/// (possibly changed) root id back afterwards.
pub struct BTree<P: NodeProvider> {
    provider: P,
    root: NodeId,
}

impl<P: NodeProvider> BTree<P> {
    /// Creates a tree accessor over `provider`, rooted at `root`.
    pub fn new(root: NodeId, provider: P) -> Self {
        Self { provider, root }
    }

    /// Returns the current root id (updated by splits and collapses).
    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Returns the value associated with `key`, or `None` if the key does
    /// not exist in the tree.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let leaf = self.find_leaf(key)?;
        let Node::Leaf(leaf) = &*leaf else {
            unreachable!("find_leaf descends to a leaf");
        };
        Ok(leaf.records.get(key).cloned())
    }

    /// Collects the entries with keys in `[start, end]`, in ascending key
    /// order. With a `limit`, collection stops once that many pairs are
    /// gathered.
    ///
    /// Descends to the leaves holding each endpoint and walks the leaf
    /// chain between them; the walk also terminates at the right edge of
    /// the tree (a leaf with no `next`).
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn seek(
        &self,
        start: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        if start > end {
            return Ok(Vec::new());
        }

        let start_node = self.find_leaf(start)?;
        let end_node = self.find_leaf(end)?;
        let end_id = end_node.id();

        let Node::Leaf(start_leaf) = &*start_node else {
            unreachable!("find_leaf descends to a leaf");
        };

        let cap = limit.unwrap_or(usize::MAX);
        let mut entries = Vec::new();

        if start_node.id() == end_id {
            for (k, v) in start_leaf
                .records
                .range::<[u8], _>((Bound::Included(start), Bound::Included(end)))
            {
                if entries.len() >= cap {
                    break;
                }
                entries.push((k.clone(), v.clone()));
            }
            return Ok(entries);
        }

        for (k, v) in
            start_leaf.records.range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
        {
            if entries.len() >= cap {
                return Ok(entries);
            }
            entries.push((k.clone(), v.clone()));
        }

        let mut next_id = start_leaf.next;
        while let Some(id) = next_id {
            if id == end_id {
                break;
            }
            let node = self.provider.node(id)?;
            let Node::Leaf(leaf) = &*node else {
                unreachable!("leaf chain links only leaves");
            };
            for (k, v) in &leaf.records {
                if entries.len() >= cap {
                    return Ok(entries);
                }
                entries.push((k.clone(), v.clone()));
            }
            next_id = leaf.next;
        }

        if next_id == Some(end_id) {
            let Node::Leaf(end_leaf) = &*end_node else {
                unreachable!("find_leaf descends to a leaf");
            };
            for (k, v) in
                end_leaf.records.range::<[u8], _>((Bound::Unbounded, Bound::Included(end)))
            {
                if entries.len() >= cap {
                    break;
                }
                entries.push((k.clone(), v.clone()));
            }
        }

        Ok(entries)
    }

    /// Computes the depth of the tree (1 = root is a leaf) by walking the
    /// leftmost spine.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn depth(&self) -> Result<u32> {
        let mut depth = 1u32;
        let mut current = self.provider.node(self.root)?;
        while let Node::Internal(internal) = &*current {
            let child = internal
                .records
                .values()
                .next()
                .copied()
                .expect("internal node has at least one record");
            current = self.provider.node(child)?;
            depth += 1;
        }
        Ok(depth)
    }

    /// Walks the whole tree and reports structural violations: node size
    /// bounds, sentinel placement, leaf-chain linkage, and key ordering.
    /// An empty report means the tree is well-formed.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn verify(&self) -> Result<Vec<String>> {
        use crate::node::{MIN_RECORDS, ORDER};

        let mut violations = Vec::new();
        let mut tree_leaves = Vec::new();

        // In-order walk checking per-node bounds and collecting leaf ids.
        fn walk<P: NodeProvider>(
            tree: &BTree<P>,
            id: NodeId,
            is_root: bool,
            violations: &mut Vec<String>,
            leaves: &mut Vec<NodeId>,
        ) -> Result<()> {
            let node = tree.provider.node(id)?;
            if !is_root && node.len() < MIN_RECORDS {
                violations.push(format!("node {id} underfull: {} records", node.len()));
            }
            if node.len() > ORDER - 1 {
                violations.push(format!("node {id} overfull: {} records", node.len()));
            }
            match &*node {
                Node::Leaf(_) => leaves.push(id),
                Node::Internal(internal) => {
                    if !matches!(internal.records.keys().next(), Some(None)) {
                        violations.push(format!("node {id} missing its sentinel record"));
                    }
                    for &child in internal.records.values() {
                        walk(tree, child, false, violations, leaves)?;
                    }
                },
            }
            Ok(())
        }
        walk(self, self.root, true, &mut violations, &mut tree_leaves)?;

        // The leaf chain must visit exactly the in-order leaves, with keys
        // strictly ascending across the whole chain.
        let mut chain = Vec::new();
        let mut current = tree_leaves.first().copied();
        let mut prev_key: Option<Vec<u8>> = None;
        while let Some(id) = current {
            let node = self.provider.node(id)?;
            let Node::Leaf(leaf) = &*node else {
                violations.push(format!("leaf chain reached non-leaf node {id}"));
                break;
            };
            for key in leaf.records.keys() {
                if prev_key.as_ref().is_some_and(|prev| key <= prev) {
                    violations.push(format!("key order violation in leaf {id}"));
                }
                prev_key = Some(key.clone());
            }
            chain.push(id);
            current = leaf.next;
        }
        if chain != tree_leaves {
            violations.push(format!(
                "leaf chain {chain:?} does not match in-order leaves {tree_leaves:?}"
            ));
        }

        Ok(violations)
    }

    /// Descends from the root to the leaf whose key range covers `key`.
    fn find_leaf(&self, key: &[u8]) -> Result<Arc<Node>> {
        let mut current = self.provider.node(self.root)?;
        loop {
            match &*current {
                Node::Leaf(_) => return Ok(current),
                Node::Internal(internal) => {
                    current = self.provider.node(internal.child_for(key))?;
                },
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::{
        error::Error,
        node::{LeafNode, Node, ORDER},
    };

    /// Simple in-memory node provider for testing the tree algorithms in
    /// isolation from transactions and storage.
    pub(crate) struct TestNodeProvider {
        pub nodes: HashMap<NodeId, Node>,
        pub id_counter: NodeId,
    }

    impl TestNodeProvider {
        pub fn new() -> Self {
            let mut nodes = HashMap::new();
            nodes.insert(1, Node::Leaf(LeafNode::empty(1)));
            Self { nodes, id_counter: 1 }
        }
    }

    impl NodeProvider for TestNodeProvider {
        fn node(&self, id: NodeId) -> Result<Arc<Node>> {
            self.nodes
                .get(&id)
                .cloned()
                .map(Arc::new)
                .ok_or(Error::CorruptState { node_id: id })
        }

        fn stage(&mut self, node: Node) {
            self.nodes.insert(node.id(), node);
        }

        fn tombstone(&mut self, id: NodeId) {
            self.nodes.remove(&id);
        }

        fn fresh_id(&mut self) -> NodeId {
            self.id_counter += 1;
            self.id_counter
        }
    }

    pub(crate) fn make_tree() -> BTree<TestNodeProvider> {
        BTree::new(1, TestNodeProvider::new())
    }

    pub(crate) fn key(i: u32) -> Vec<u8> {
        format!("key{i:05}").into_bytes()
    }

    pub(crate) fn value(i: u32) -> Vec<u8> {
        format!("value{i}").into_bytes()
    }

    /// Walks the leaf chain from the leftmost leaf, returning every key in
    /// visit order. Used to check the linkage invariant.
    pub(crate) fn leaf_chain_keys(tree: &BTree<TestNodeProvider>) -> Vec<Vec<u8>> {
        let mut current = tree.provider.node(tree.root).unwrap();
        while let Node::Internal(internal) = &*current {
            let (_, &child) = internal.records.iter().next().unwrap();
            current = tree.provider.node(child).unwrap();
        }

        let mut keys = Vec::new();
        loop {
            let Node::Leaf(leaf) = &*current else { unreachable!() };
            keys.extend(leaf.records.keys().cloned());
            match leaf.next {
                Some(id) => current = tree.provider.node(id).unwrap(),
                None => break,
            }
        }
        keys
    }

    /// Asserts the size bounds on every node reachable from the root.
    pub(crate) fn assert_size_bounds(tree: &BTree<TestNodeProvider>) {
        fn walk(tree: &BTree<TestNodeProvider>, id: NodeId, is_root: bool) {
            let node = tree.provider.node(id).unwrap();
            if !is_root {
                assert!(
                    node.len() >= ORDER / 2,
                    "node {} underfull: {} records",
                    id,
                    node.len()
                );
            }
            assert!(node.len() <= ORDER - 1, "node {} overfull: {} records", id, node.len());
            if let Node::Internal(internal) = &*node {
                for &child in internal.records.values() {
                    walk(tree, child, false);
                }
            }
        }
        walk(tree, tree.root, true);
    }

    #[test]
    fn test_empty_tree() {
        let tree = make_tree();
        assert_eq!(tree.get(b"key").unwrap(), None);
        assert_eq!(tree.seek(b"", b"\xff", None).unwrap(), Vec::new());
        assert_eq!(tree.depth().unwrap(), 1);
    }

    #[test]
    fn test_get_after_insert() {
        let mut tree = make_tree();
        tree.insert(b"hello", b"world").unwrap();

        assert_eq!(tree.get(b"hello").unwrap(), Some(b"world".to_vec()));
        assert_eq!(tree.get(b"nonexistent").unwrap(), None);
    }

    #[test]
    fn test_seek_single_leaf() {
        let mut tree = make_tree();
        tree.insert(&key(1), &value(1)).unwrap();
        tree.insert(&key(2), &value(2)).unwrap();
        tree.insert(&key(5), &value(5)).unwrap();

        let entries = tree.seek(&key(1), &key(2), None).unwrap();
        assert_eq!(entries, vec![(key(1), value(1)), (key(2), value(2))]);

        // Inclusive on both ends
        let entries = tree.seek(&key(0), &key(9), None).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[test]
    fn test_seek_cross_leaf() {
        let mut tree = make_tree();
        for i in 0..200 {
            tree.insert(&key(i), &value(i)).unwrap();
        }
        assert!(tree.depth().unwrap() > 1, "200 keys should split the root");

        let entries = tree.seek(&key(0), &key(199), None).unwrap();
        assert_eq!(entries.len(), 200);
        for (i, (k, v)) in entries.iter().enumerate() {
            assert_eq!(k, &key(i as u32));
            assert_eq!(v, &value(i as u32));
        }

        let partial = tree.seek(&key(50), &key(149), None).unwrap();
        assert_eq!(partial.len(), 100);
        assert_eq!(partial[0].0, key(50));
        assert_eq!(partial[99].0, key(149));
    }

    #[test]
    fn test_seek_limit_truncates() {
        let mut tree = make_tree();
        for i in 0..100 {
            tree.insert(&key(i), &value(i)).unwrap();
        }

        let entries = tree.seek(&key(0), &key(99), Some(7)).unwrap();
        assert_eq!(entries.len(), 7);
        assert_eq!(entries[6].0, key(6));
    }

    #[test]
    fn test_seek_inverted_range_is_empty() {
        let mut tree = make_tree();
        tree.insert(&key(1), &value(1)).unwrap();
        assert!(tree.seek(&key(9), &key(1), None).unwrap().is_empty());
    }

    #[test]
    fn test_seek_unbounded_endpoints() {
        let mut tree = make_tree();
        for i in 0..50 {
            tree.insert(&key(i), &value(i)).unwrap();
        }

        // Endpoints below and above every stored key
        let entries = tree.seek(b"", b"\xff\xff", None).unwrap();
        assert_eq!(entries.len(), 50);
    }
}
