//! File-based storage backend.
//!
//! A database directory holds two files, `manifest` and `nodes`. Both are
//! written strictly by appending; node images are read back through a
//! separate random-access handle on `nodes`.
//!
//! Each handle is wrapped in its own [`parking_lot::Mutex`]: the reader
//! because a seek followed by a read is two calls on one cursor and must
//! not interleave, the appenders because two concurrent `write_all` calls
//! could tear a record. In practice only commit writes (the database write
//! lock already serializes commits), so the append mutexes are never
//! contended.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
};

use parking_lot::Mutex;

use super::StorageBackend;
use crate::error::Result;

/// Name of the manifest file inside a database directory.
pub const MANIFEST_FILE: &str = "manifest";

/// Name of the node-log file inside a database directory.
pub const NODES_FILE: &str = "nodes";

/// File-based storage backend: two append handles plus a random-access
/// reader on the node log.
pub struct FileBackend {
    /// Append-only handle on `manifest`.
    manifest: Mutex<File>,
    /// Append-only handle on `nodes`.
    nodes: Mutex<File>,
    /// Random-access read handle on `nodes`.
    reader: Mutex<File>,
}

impl FileBackend {
    /// Opens (or creates) the `manifest` and `nodes` files inside `dir`.
    ///
    /// The directory must already exist; the caller is responsible for
    /// creating it and for validating the manifest header.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if any of the three handles cannot be opened.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest =
            OpenOptions::new().create(true).append(true).read(true).open(dir.join(MANIFEST_FILE))?;
        let nodes =
            OpenOptions::new().create(true).append(true).open(dir.join(NODES_FILE))?;
        let reader = OpenOptions::new().read(true).open(dir.join(NODES_FILE))?;

        Ok(Self {
            manifest: Mutex::new(manifest),
            nodes: Mutex::new(nodes),
            reader: Mutex::new(reader),
        })
    }
}

impl StorageBackend for FileBackend {
    fn append_manifest(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.manifest.lock();
        file.write_all(bytes)?;
        Ok(())
    }

    fn append_nodes(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.nodes.lock();
        file.write_all(bytes)?;
        Ok(())
    }

    fn read_nodes_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut file = self.reader.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn read_manifest(&self) -> Result<Vec<u8>> {
        // The append handle doubles as the read handle; rewind, read, and
        // leave the cursor wherever it lands (appends ignore the cursor).
        let mut file = self.manifest.lock();
        let mut contents = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut contents)?;
        Ok(contents)
    }

    fn manifest_len(&self) -> Result<u64> {
        Ok(self.manifest.lock().metadata()?.len())
    }

    fn nodes_len(&self) -> Result<u64> {
        Ok(self.nodes.lock().metadata()?.len())
    }

    fn sync_manifest(&self) -> Result<()> {
        self.manifest.lock().sync_data()?;
        Ok(())
    }

    fn sync_nodes(&self) -> Result<()> {
        self.nodes.lock().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.append_nodes(b"hello world").unwrap();
        backend.append_nodes(b"!").unwrap();
        assert_eq!(backend.nodes_len().unwrap(), 12);

        let mut buf = [0u8; 5];
        backend.read_nodes_at(6, &mut buf).unwrap();
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn test_read_past_end_fails() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.append_nodes(b"abc").unwrap();
        let mut buf = [0u8; 8];
        assert!(backend.read_nodes_at(0, &mut buf).is_err());
    }

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();

        backend.append_manifest(b"header--").unwrap();
        backend.append_manifest(b"record 1").unwrap();
        backend.sync_manifest().unwrap();

        assert_eq!(backend.read_manifest().unwrap(), b"header--record 1");
        assert_eq!(backend.manifest_len().unwrap(), 16);
    }

    #[test]
    fn test_reopen_preserves_contents() {
        let dir = tempdir().unwrap();
        {
            let backend = FileBackend::open(dir.path()).unwrap();
            backend.append_manifest(b"persist!").unwrap();
            backend.append_nodes(b"node images").unwrap();
            backend.sync_manifest().unwrap();
            backend.sync_nodes().unwrap();
        }

        let backend = FileBackend::open(dir.path()).unwrap();
        assert_eq!(backend.read_manifest().unwrap(), b"persist!");
        assert_eq!(backend.nodes_len().unwrap(), 11);

        // Appends land after the existing contents
        backend.append_manifest(b" more").unwrap();
        assert_eq!(backend.read_manifest().unwrap(), b"persist! more");
    }
}
