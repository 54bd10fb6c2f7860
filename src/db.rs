//! Database handle and transaction management.
//!
//! A [`Database`] owns the storage backend, the node codec, the node
//! cache, and the committed-state cell. Transactions borrow the database:
//! read transactions capture a snapshot and never block anyone; write
//! transactions additionally hold the database's write lock for their
//! whole life, so exactly one commit is in flight at a time.
//!
//! # Commit protocol
//!
//! 1. Freeze every dirty node and append the images (plus an 8-byte zero
//!    terminator) to the node log; sync it.
//! 2. Append the manifest delta — one record per dirty id, tombstones
//!    included — ending with the root pointer record; sync the manifest.
//! 3. Atomically swap the committed state and reconcile the cache.
//!
//! The root pointer is the final on-disk write, so a crash anywhere in the
//! sequence replays to the previous root: either the new records are fully
//! referenced or they are unreferenced garbage at the end of the log.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use arc_swap::ArcSwap;
use byteorder::{BigEndian, ByteOrder};
use parking_lot::{Mutex, MutexGuard};
use tracing::debug;

use crate::{
    backend::{FileBackend, InMemoryBackend, StorageBackend},
    btree::{BTree, NodeProvider},
    cache::{CacheStats, NodeCache, DEFAULT_CACHE_CAPACITY},
    codec::{NodeCodec, PostcardCodec},
    error::{Error, NodeId, Result},
    manifest,
    node::{LeafNode, Node, BOOTSTRAP_ROOT_ID},
    transaction::{CommittedState, DirtyNodes},
};

/// Process-wide registry of open databases, keyed by path.
fn registry() -> &'static Mutex<HashMap<PathBuf, Arc<Database>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<Database>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// An open tidelog database.
///
/// Thread-safe with interior mutability: any number of concurrent read
/// transactions, at most one write transaction.
pub struct Database {
    /// Directory this database lives in (`None` for in-memory databases).
    path: Option<PathBuf>,
    /// Storage backend (file or memory).
    backend: Box<dyn StorageBackend>,
    /// Node image codec.
    codec: Box<dyn NodeCodec>,
    /// Current committed state, atomically swapped on commit.
    state: ArcSwap<CommittedState>,
    /// Bounded cache of decoded nodes, keyed by log offset.
    cache: NodeCache,
    /// Serializes write transactions (held for their full duration).
    write_lock: Mutex<()>,
    /// Set by close; observed by in-flight operations.
    closed: AtomicBool,
}

impl Database {
    /// Opens the database at `path`, creating the directory and files if
    /// needed. If the same path is already open in this process, the
    /// existing handle is closed first and the database is reopened.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDatabase`] if `path` exists and is not a
    /// directory or the manifest header is malformed,
    /// [`Error::IncompatibleVersion`] / [`Error::OrderMismatch`] for
    /// foreign headers, and [`Error::Io`] for file failures.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_codec(path, Box::new(PostcardCodec))
    }

    /// Opens the database at `path` with a custom node codec.
    ///
    /// # Errors
    ///
    /// Same as [`Database::open`].
    pub fn open_with_codec(
        path: impl AsRef<Path>,
        codec: Box<dyn NodeCodec>,
    ) -> Result<Arc<Self>> {
        let path = path.as_ref();

        // Reopening an open path is an idempotent reinitialization.
        if let Some(existing) = registry().lock().remove(path) {
            existing.mark_closed();
        }

        if path.exists() {
            if !path.is_dir() {
                return Err(Error::InvalidDatabase {
                    reason: format!("{} exists and is not a directory", path.display()),
                });
            }
        } else {
            std::fs::create_dir_all(path)?;
        }

        let backend = FileBackend::open(path)?;
        let db = Arc::new(Self::from_backend(
            Box::new(backend),
            codec,
            Some(path.to_path_buf()),
        )?);
        registry().lock().insert(path.to_path_buf(), Arc::clone(&db));
        Ok(db)
    }

    /// Creates an in-memory database (not registered by path).
    ///
    /// # Errors
    ///
    /// Returns an error if writing the manifest header fails (it cannot
    /// for the in-memory backend).
    pub fn in_memory() -> Result<Arc<Self>> {
        Ok(Arc::new(Self::from_backend(
            Box::new(InMemoryBackend::new()),
            Box::new(PostcardCodec),
            None,
        )?))
    }

    fn from_backend(
        backend: Box<dyn StorageBackend>,
        codec: Box<dyn NodeCodec>,
        path: Option<PathBuf>,
    ) -> Result<Self> {
        if backend.manifest_len()? == 0 {
            backend.append_manifest(&manifest::encode_header())?;
            backend.sync_manifest()?;
        }

        let contents = backend.read_manifest()?;
        manifest::validate_header(&contents)?;
        let recovered = manifest::replay(&contents);
        let nodes_len = backend.nodes_len()?;

        debug!(
            root_id = recovered.root_id,
            id_counter = recovered.id_counter,
            indexed = recovered.index.len(),
            nodes_len,
            "database opened"
        );

        Ok(Self {
            path,
            backend,
            codec,
            state: ArcSwap::from_pointee(CommittedState {
                root_id: recovered.root_id,
                id_counter: recovered.id_counter,
                nodes_len,
                index: Arc::new(recovered.index),
            }),
            cache: NodeCache::new(DEFAULT_CACHE_CAPACITY),
            write_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Closes the database registered at `path`, if any. Returns whether a
    /// database was open there.
    pub fn close_at(path: impl AsRef<Path>) -> bool {
        match registry().lock().remove(path.as_ref()) {
            Some(db) => {
                db.mark_closed();
                true
            },
            None => false,
        }
    }

    /// Closes this database: in-flight operations observe the close and
    /// fail with [`Error::Closed`]; file handles are released once the
    /// last reference drops.
    pub fn close(&self) {
        if let Some(path) = &self.path {
            registry().lock().remove(path);
        }
        self.mark_closed();
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        debug!("database closed");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Begins a read-only transaction over the current committed state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the database is closed.
    pub fn read(&self) -> Result<ReadTransaction<'_>> {
        self.ensure_open()?;
        Ok(ReadTransaction { db: self, snapshot: self.state.load_full() })
    }

    /// Begins a write transaction, blocking until the write lock is free.
    /// The lock is held until the transaction commits or drops.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] if the database is closed.
    pub fn write(&self) -> Result<WriteTransaction<'_>> {
        self.ensure_open()?;
        let guard = self.write_lock.lock();
        // Snapshot under the lock: no commit can slip in between.
        let snapshot = self.state.load_full();
        Ok(WriteTransaction {
            db: self,
            root_id: snapshot.root_id,
            id_counter: snapshot.id_counter,
            snapshot,
            dirty: DirtyNodes::new(),
            committed: false,
            _guard: guard,
        })
    }

    /// Returns database statistics.
    pub fn stats(&self) -> DatabaseStats {
        let state = self.state.load();
        DatabaseStats {
            root_id: state.root_id,
            id_counter: state.id_counter,
            nodes_len: state.nodes_len,
            indexed_nodes: state.index.len(),
            cache: self.cache.stats(),
        }
    }

    /// Fetches a committed node: cache first, then the node log.
    fn load_node(&self, snapshot: &CommittedState, id: NodeId) -> Result<Arc<Node>> {
        self.ensure_open()?;

        let Some(&offset) = snapshot.index.get(&id) else {
            if id == BOOTSTRAP_ROOT_ID {
                // Nothing committed yet: the tree is a synthetic empty leaf.
                return Ok(Arc::new(Node::Leaf(LeafNode::empty(id))));
            }
            return Err(Error::CorruptState { node_id: id });
        };

        if let Some(node) = self.cache.get(offset) {
            return Ok(node);
        }

        let mut len_buf = [0u8; 8];
        self.backend.read_nodes_at(offset, &mut len_buf)?;
        let len = BigEndian::read_u64(&len_buf);

        let mut bytes = vec![0u8; len as usize];
        self.backend.read_nodes_at(offset + 8, &mut bytes)?;

        let node = Arc::new(self.codec.thaw(&bytes)?);
        self.cache.insert(offset, Arc::clone(&node));
        Ok(node)
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    /// Current root node id.
    pub root_id: NodeId,
    /// Largest node id ever assigned.
    pub id_counter: u64,
    /// Node log length in bytes.
    pub nodes_len: u64,
    /// Number of live ids in the manifest index.
    pub indexed_nodes: usize,
    /// Node cache statistics.
    pub cache: CacheStats,
}

// ---------------------------------------------------------------------------
// Node providers
// ---------------------------------------------------------------------------

/// Read-only provider over a committed snapshot.
struct SnapshotProvider<'txn> {
    db: &'txn Database,
    snapshot: &'txn CommittedState,
}

impl NodeProvider for SnapshotProvider<'_> {
    fn node(&self, id: NodeId) -> Result<Arc<Node>> {
        self.db.load_node(self.snapshot, id)
    }

    fn stage(&mut self, _node: Node) {
        panic!("stage called on a read-only node provider");
    }

    fn tombstone(&mut self, _id: NodeId) {
        panic!("tombstone called on a read-only node provider");
    }

    fn fresh_id(&mut self) -> NodeId {
        panic!("fresh_id called on a read-only node provider");
    }
}

/// Read-only provider over a snapshot plus a write transaction's dirty
/// overlay: lets a writer read back its own uncommitted changes.
struct OverlayProvider<'txn> {
    db: &'txn Database,
    snapshot: &'txn CommittedState,
    dirty: &'txn DirtyNodes,
}

impl NodeProvider for OverlayProvider<'_> {
    fn node(&self, id: NodeId) -> Result<Arc<Node>> {
        match self.dirty.get(&id) {
            Some(Some(node)) => Ok(Arc::new(node.clone())),
            Some(None) => Err(Error::CorruptState { node_id: id }),
            None => self.db.load_node(self.snapshot, id),
        }
    }

    fn stage(&mut self, _node: Node) {
        panic!("stage called on a read-only node provider");
    }

    fn tombstone(&mut self, _id: NodeId) {
        panic!("tombstone called on a read-only node provider");
    }

    fn fresh_id(&mut self) -> NodeId {
        panic!("fresh_id called on a read-only node provider");
    }
}

/// Mutable provider backing insert and remove: stages dirty nodes and
/// allocates ids from the transaction's counter.
struct DirtyProvider<'txn> {
    db: &'txn Database,
    snapshot: &'txn CommittedState,
    dirty: &'txn mut DirtyNodes,
    id_counter: &'txn mut u64,
}

impl NodeProvider for DirtyProvider<'_> {
    fn node(&self, id: NodeId) -> Result<Arc<Node>> {
        match self.dirty.get(&id) {
            Some(Some(node)) => Ok(Arc::new(node.clone())),
            Some(None) => Err(Error::CorruptState { node_id: id }),
            None => self.db.load_node(self.snapshot, id),
        }
    }

    fn stage(&mut self, node: Node) {
        self.dirty.insert(node.id(), Some(node));
    }

    fn tombstone(&mut self, id: NodeId) {
        self.dirty.insert(id, None);
    }

    fn fresh_id(&mut self) -> NodeId {
        *self.id_counter += 1;
        *self.id_counter
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// A read-only transaction.
///
/// Captures an immutable snapshot at construction: the view never changes,
/// no matter what commits afterwards, and holds no locks.
pub struct ReadTransaction<'db> {
    db: &'db Database,
    snapshot: Arc<CommittedState>,
}

impl ReadTransaction<'_> {
    /// Returns the value stored under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let provider = SnapshotProvider { db: self.db, snapshot: &self.snapshot };
        BTree::new(self.snapshot.root_id, provider).get(key)
    }

    /// Returns the entries with keys in `[start, end]` in ascending order,
    /// up to `limit` pairs if given.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn seek(
        &self,
        start: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let provider = SnapshotProvider { db: self.db, snapshot: &self.snapshot };
        BTree::new(self.snapshot.root_id, provider).seek(start, end, limit)
    }

    /// Returns the snapshot's root node id.
    pub fn root_id(&self) -> NodeId {
        self.snapshot.root_id
    }

    /// Returns the tree depth under this snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn depth(&self) -> Result<u32> {
        let provider = SnapshotProvider { db: self.db, snapshot: &self.snapshot };
        BTree::new(self.snapshot.root_id, provider).depth()
    }

    /// Walks the whole tree and reports structural violations (size
    /// bounds, sentinel placement, leaf linkage). Empty means well-formed.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch fails.
    pub fn verify(&self) -> Result<Vec<String>> {
        let provider = SnapshotProvider { db: self.db, snapshot: &self.snapshot };
        BTree::new(self.snapshot.root_id, provider).verify()
    }
}

/// A write transaction.
///
/// Mutations accumulate in a local dirty overlay, invisible to everyone
/// else until [`commit`](WriteTransaction::commit). Dropping the
/// transaction without committing discards the overlay; nothing reaches
/// disk.
pub struct WriteTransaction<'db> {
    db: &'db Database,
    /// Snapshot captured at construction.
    snapshot: Arc<CommittedState>,
    /// Root id as of the latest mutation in this transaction.
    root_id: NodeId,
    /// Id counter as of the latest mutation in this transaction.
    id_counter: u64,
    /// Mutation overlay (tombstones included).
    dirty: DirtyNodes,
    /// Whether the transaction has been committed or aborted.
    committed: bool,
    /// Holds the database write lock for the transaction's lifetime.
    _guard: MutexGuard<'db, ()>,
}

impl WriteTransaction<'_> {
    /// Returns the value stored under `key` in this transaction's view
    /// (uncommitted changes included).
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let provider =
            OverlayProvider { db: self.db, snapshot: &self.snapshot, dirty: &self.dirty };
        BTree::new(self.root_id, provider).get(key)
    }

    /// Returns the entries with keys in `[start, end]` in this
    /// transaction's view, up to `limit` pairs if given.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn seek(
        &self,
        start: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let provider =
            OverlayProvider { db: self.db, snapshot: &self.snapshot, dirty: &self.dirty };
        BTree::new(self.root_id, provider).seek(start, end, limit)
    }

    /// Inserts (or replaces) `key → value`.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.ensure_open()?;
        let provider = DirtyProvider {
            db: self.db,
            snapshot: &self.snapshot,
            dirty: &mut self.dirty,
            id_counter: &mut self.id_counter,
        };
        let mut tree = BTree::new(self.root_id, provider);
        tree.insert(key, value)?;
        self.root_id = tree.root_id();
        Ok(())
    }

    /// Removes `key` if present; removing an absent key is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if a node fetch or decode fails.
    pub fn remove(&mut self, key: &[u8]) -> Result<()> {
        self.db.ensure_open()?;
        let provider = DirtyProvider {
            db: self.db,
            snapshot: &self.snapshot,
            dirty: &mut self.dirty,
            id_counter: &mut self.id_counter,
        };
        let mut tree = BTree::new(self.root_id, provider);
        tree.remove(key)?;
        self.root_id = tree.root_id();
        Ok(())
    }

    /// Commits the transaction: appends dirty node images and the manifest
    /// delta durably, then publishes the new state.
    ///
    /// On error the on-disk log may carry unreferenced bytes, but the
    /// published state — and therefore every current and future reader —
    /// is untouched.
    ///
    /// # Errors
    ///
    /// Returns an error if freezing a node or an append/sync fails.
    pub fn commit(mut self) -> Result<()> {
        self.db.ensure_open()?;

        if self.dirty.is_empty() {
            self.committed = true;
            return Ok(());
        }

        let snapshot = Arc::clone(&self.snapshot);
        let mut ids: Vec<NodeId> = self.dirty.keys().copied().collect();
        ids.sort_unstable();

        let mut nodes_buf = Vec::new();
        let mut manifest_buf = Vec::new();
        let mut new_index = (*snapshot.index).clone();
        let mut fresh_images: Vec<(u64, Arc<Node>)> = Vec::new();
        let mut offset = snapshot.nodes_len;

        for id in &ids {
            match &self.dirty[id] {
                Some(node) => {
                    let bytes = self.db.codec.freeze(node)?;
                    let mut len_buf = [0u8; 8];
                    BigEndian::write_u64(&mut len_buf, bytes.len() as u64);
                    nodes_buf.extend_from_slice(&len_buf);
                    nodes_buf.extend_from_slice(&bytes);

                    manifest_buf.extend_from_slice(&manifest::encode_record(*id, offset));
                    new_index.insert(*id, offset);
                    fresh_images.push((offset, Arc::new(node.clone())));
                    offset += 8 + bytes.len() as u64;
                },
                None => {
                    manifest_buf
                        .extend_from_slice(&manifest::encode_record(*id, manifest::TOMBSTONE_PAYLOAD));
                    new_index.remove(id);
                },
            }
        }

        // Node images land (durably) before any manifest record points at
        // them.
        if !nodes_buf.is_empty() {
            nodes_buf.extend_from_slice(&[0u8; 8]);
            offset += 8;
            self.db.backend.append_nodes(&nodes_buf)?;
            self.db.backend.sync_nodes()?;
        }

        // The root pointer is the last write of the commit.
        manifest_buf
            .extend_from_slice(&manifest::encode_record(manifest::ROOT_RECORD_ID, self.root_id));
        self.db.backend.append_manifest(&manifest_buf)?;
        self.db.backend.sync_manifest()?;

        let new_state = Arc::new(CommittedState {
            root_id: self.root_id,
            id_counter: self.id_counter,
            nodes_len: offset,
            index: Arc::new(new_index),
        });
        self.db.state.store(new_state);

        // Reconcile the cache: superseded offsets out, fresh images in.
        for id in &ids {
            if let Some(&old_offset) = snapshot.index.get(id) {
                self.db.cache.evict(old_offset);
            }
        }
        for (image_offset, node) in fresh_images {
            self.db.cache.insert(image_offset, node);
        }

        debug!(root_id = self.root_id, dirty = ids.len(), "commit published");
        self.committed = true;
        Ok(())
    }

    /// Discards the transaction's changes explicitly.
    pub fn abort(mut self) {
        self.dirty.clear();
        self.committed = true;
    }

    /// Returns the root id as seen by this transaction.
    pub fn root_id(&self) -> NodeId {
        self.root_id
    }
}

impl Drop for WriteTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed && !self.dirty.is_empty() {
            debug!(dirty = self.dirty.len(), "write transaction dropped without commit");
        }
    }
}
