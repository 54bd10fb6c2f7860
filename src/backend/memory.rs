//! In-memory storage backend for testing.

use std::io;

use parking_lot::RwLock;

use super::StorageBackend;
use crate::error::Result;

/// In-memory backend: a byte vector per channel. Sync is a no-op.
#[derive(Default)]
pub struct InMemoryBackend {
    manifest: RwLock<Vec<u8>>,
    nodes: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty in-memory backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for InMemoryBackend {
    fn append_manifest(&self, bytes: &[u8]) -> Result<()> {
        self.manifest.write().extend_from_slice(bytes);
        Ok(())
    }

    fn append_nodes(&self, bytes: &[u8]) -> Result<()> {
        self.nodes.write().extend_from_slice(bytes);
        Ok(())
    }

    fn read_nodes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let nodes = self.nodes.read();
        let start = offset as usize;
        let end = start + buf.len();
        if end > nodes.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} past node log end {}", start, end, nodes.len()),
            )
            .into());
        }
        buf.copy_from_slice(&nodes[start..end]);
        Ok(())
    }

    fn read_manifest(&self) -> Result<Vec<u8>> {
        Ok(self.manifest.read().clone())
    }

    fn manifest_len(&self) -> Result<u64> {
        Ok(self.manifest.read().len() as u64)
    }

    fn nodes_len(&self) -> Result<u64> {
        Ok(self.nodes.read().len() as u64)
    }

    fn sync_manifest(&self) -> Result<()> {
        Ok(())
    }

    fn sync_nodes(&self) -> Result<()> {
        Ok(())
    }
}
