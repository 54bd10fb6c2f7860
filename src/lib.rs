//! tidelog: an embedded, durable, ordered key-value store.
//!
//! tidelog is a single-process storage engine built around a disk-backed
//! B+ tree with copy-on-write node updates:
//!
//! - **Append-only layout**: node images land in an append-only log; an
//!   append-only manifest maps each node id to its latest image. Nothing
//!   is ever rewritten in place.
//! - **Snapshot reads**: transactions capture the committed state
//!   atomically at construction. Readers never block writers or each
//!   other.
//! - **Serialized writes**: one write transaction at a time; commit
//!   appends node images, then the manifest delta, then the root pointer,
//!   and only then publishes the new state in memory.
//! - **Manifest replay**: opening a database folds the manifest records
//!   into `(root id, id counter, id → offset)`; the last complete root
//!   pointer defines the recovered snapshot.
//! - **Bounded node cache**: decoded nodes are cached by log offset, which
//!   is immutable, so cached entries can never be stale.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                Database API                  │
//! │      (open, close, read, write, stats)      │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │             Transaction Layer                │
//! │   (snapshot + dirty overlay, commit)        │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │              B+ Tree Layer                   │
//! │     (get, seek, insert, remove)             │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │       Manifest · Node cache · Codec          │
//! └────────────────┬────────────────────────────┘
//!                  │
//! ┌────────────────▼────────────────────────────┐
//! │            Storage Backend                   │
//! │      (FileBackend / InMemoryBackend)        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use tidelog::Database;
//!
//! let db = Database::open("/tmp/example-db")?;
//!
//! let mut txn = db.write()?;
//! txn.insert(b"key", b"value")?;
//! txn.commit()?;
//!
//! let txn = db.read()?;
//! assert_eq!(txn.get(b"key")?, Some(b"value".to_vec()));
//! # Ok::<(), tidelog::Error>(())
//! ```
//!
//! Keys are arbitrary byte strings ordered lexicographically. The
//! [`keys`] module provides an order-preserving encoding for typed,
//! composite keys, so that e.g. numbers sort numerically and instants
//! chronologically.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod btree;
pub mod cache;
pub mod codec;
pub mod db;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod node;
pub mod transaction;

// Re-export commonly used types
pub use backend::{FileBackend, InMemoryBackend, StorageBackend};
pub use cache::{CacheStats, NodeCache, DEFAULT_CACHE_CAPACITY};
pub use codec::{NodeCodec, PostcardCodec};
pub use db::{Database, DatabaseStats, ReadTransaction, WriteTransaction};
pub use error::{Error, NodeId, Result};
pub use keys::{KeyCodec, PathValue};
pub use node::{Node, ORDER};
pub use transaction::CommittedState;
