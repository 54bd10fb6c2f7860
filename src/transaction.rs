//! Committed-state snapshots and the dirty-node overlay.
//!
//! The committed state is published through an atomic cell: every
//! transaction captures one `Arc` of it at construction and navigates that
//! immutable value for its whole life. Write transactions accumulate their
//! mutations in a dirty overlay keyed by node id; a `None` entry is a
//! deletion tombstone, which commit must distinguish from "not touched".

use std::{collections::HashMap, sync::Arc};

use crate::{error::NodeId, node::Node};

/// The committed database state readers snapshot.
///
/// This is what gets atomically swapped on commit.
#[derive(Debug, Clone)]
pub struct CommittedState {
    /// Id of the current tree root.
    pub root_id: NodeId,
    /// Largest node id ever assigned.
    pub id_counter: u64,
    /// Length of the node log in bytes — the next append position.
    pub nodes_len: u64,
    /// Node id → offset of its latest image in the node log.
    ///
    /// Shared behind an `Arc`: snapshots alias the map, commit clones it
    /// once to apply the delta.
    pub index: Arc<HashMap<NodeId, u64>>,
}

impl CommittedState {
    /// State of a freshly created (empty) database.
    pub fn empty() -> Self {
        Self {
            root_id: crate::node::BOOTSTRAP_ROOT_ID,
            id_counter: crate::node::BOOTSTRAP_ROOT_ID,
            nodes_len: 0,
            index: Arc::new(HashMap::new()),
        }
    }
}

/// Per-transaction mutation overlay: node id → new image, or `None` for a
/// deletion tombstone.
pub type DirtyNodes = HashMap<NodeId, Option<Node>>;
