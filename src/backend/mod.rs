//! Storage backend abstraction for the tidelog engine.
//!
//! The engine writes two append-only channels — the manifest and the node
//! log — and reads node images back at arbitrary offsets. The backend trait
//! abstracts those three channels, allowing both a file-based (production)
//! and an in-memory (testing) implementation.
//!
//! Durability relies on append-then-sync: the engine appends a batch, then
//! calls the matching `sync_*` before anything references the new bytes.
//! Nothing in a backend is ever rewritten; offsets handed out once remain
//! valid for the life of the database.

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::InMemoryBackend;

use crate::error::Result;

/// Storage backend trait abstracting the manifest and node-log channels.
pub trait StorageBackend: Send + Sync {
    /// Appends bytes to the manifest channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    fn append_manifest(&self, bytes: &[u8]) -> Result<()>;

    /// Appends bytes to the node-log channel.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the write fails.
    fn append_nodes(&self, bytes: &[u8]) -> Result<()>;

    /// Reads exactly `buf.len()` bytes from the node log starting at
    /// `offset`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails or runs past the end of the
    /// log.
    fn read_nodes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Returns the full manifest contents (header plus records) for replay.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the read fails.
    fn read_manifest(&self) -> Result<Vec<u8>>;

    /// Returns the current length of the manifest channel in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn manifest_len(&self) -> Result<u64>;

    /// Returns the current length of the node log in bytes.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the metadata query fails.
    fn nodes_len(&self) -> Result<u64>;

    /// Flushes manifest appends to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync_manifest(&self) -> Result<()>;

    /// Flushes node-log appends to durable storage.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the sync fails.
    fn sync_nodes(&self) -> Result<()>;
}
