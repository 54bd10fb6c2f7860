//! Manifest format: header, records, and replay.
//!
//! The manifest is an append-only log. It begins with a 16-byte header
//! (file-type tag, format version, tree order) followed by 16-byte records
//! `(id, payload)`, both big-endian u64s:
//!
//! - `id == 0` — root pointer: `payload` is the new root id.
//! - `payload == u64::MAX` — tombstone: the node id was destroyed.
//! - otherwise — `payload` is the offset of id's latest image in the node
//!   log.
//!
//! Replaying the records in order reproduces the committed state: the last
//! root pointer wins, each id maps to its most recent offset, and the
//! largest id ever mentioned seeds the id counter. A trailing fragment
//! shorter than one record is a torn final write and is ignored; because
//! the root pointer is always the last record of a commit, a torn commit
//! replays to the previous root.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder};

use crate::{
    error::{Error, NodeId, Result},
    node::{BOOTSTRAP_ROOT_ID, ORDER},
};

/// File-type tag identifying a tidelog manifest.
pub const FILE_TYPE_TAG: u64 = 14_404_350;

/// On-disk format version understood by this implementation.
pub const FILE_VERSION_TAG: u32 = 1;

/// Size of the manifest header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Size of one manifest record in bytes.
pub const RECORD_SIZE: usize = 16;

/// Record id reserved for root pointers.
pub const ROOT_RECORD_ID: NodeId = 0;

/// Payload marking a node id as destroyed. Never a valid offset: offsets
/// are bounded by the node log's length.
pub const TOMBSTONE_PAYLOAD: u64 = u64::MAX;

/// Encodes the manifest header for a fresh database.
pub fn encode_header() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    BigEndian::write_u64(&mut buf[0..8], FILE_TYPE_TAG);
    BigEndian::write_u32(&mut buf[8..12], FILE_VERSION_TAG);
    BigEndian::write_u32(&mut buf[12..16], ORDER as u32);
    buf
}

/// Validates a manifest header against this implementation.
///
/// # Errors
///
/// Returns [`Error::InvalidDatabase`] if the buffer is too short or the
/// file-type tag mismatches, [`Error::IncompatibleVersion`] for a foreign
/// version, and [`Error::OrderMismatch`] if the tree order differs from
/// the compile-time [`ORDER`].
pub fn validate_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::InvalidDatabase { reason: "manifest header too short".to_string() });
    }

    let type_tag = BigEndian::read_u64(&bytes[0..8]);
    if type_tag != FILE_TYPE_TAG {
        return Err(Error::InvalidDatabase {
            reason: format!("unrecognized file-type tag {type_tag:#x}"),
        });
    }

    let version = BigEndian::read_u32(&bytes[8..12]);
    if version != FILE_VERSION_TAG {
        return Err(Error::IncompatibleVersion { version });
    }

    let disk_order = BigEndian::read_u32(&bytes[12..16]);
    if disk_order != ORDER as u32 {
        return Err(Error::OrderMismatch { disk_order });
    }

    Ok(())
}

/// Encodes one manifest record.
pub fn encode_record(id: NodeId, payload: u64) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    BigEndian::write_u64(&mut buf[0..8], id);
    BigEndian::write_u64(&mut buf[8..16], payload);
    buf
}

/// State recovered by replaying a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    /// Current root id (bootstrap root before any root pointer is seen).
    pub root_id: NodeId,
    /// Largest node id ever assigned.
    pub id_counter: u64,
    /// Node id → latest image offset in the node log.
    pub index: HashMap<NodeId, u64>,
}

impl Default for Recovered {
    fn default() -> Self {
        Self { root_id: BOOTSTRAP_ROOT_ID, id_counter: BOOTSTRAP_ROOT_ID, index: HashMap::new() }
    }
}

/// Replays full manifest contents (header included) into committed state.
///
/// Only complete records participate; a trailing fragment is ignored.
/// The header is assumed already validated.
pub fn replay(contents: &[u8]) -> Recovered {
    let mut recovered = Recovered::default();

    let body = &contents[HEADER_SIZE.min(contents.len())..];
    for record in body.chunks_exact(RECORD_SIZE) {
        let id = BigEndian::read_u64(&record[0..8]);
        let payload = BigEndian::read_u64(&record[8..16]);

        if id == ROOT_RECORD_ID {
            recovered.root_id = payload;
            continue;
        }

        if payload == TOMBSTONE_PAYLOAD {
            recovered.index.remove(&id);
        } else {
            recovered.index.insert(id, payload);
        }
        if id > recovered.id_counter {
            recovered.id_counter = id;
        }
    }

    recovered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(records: &[(NodeId, u64)]) -> Vec<u8> {
        let mut contents = encode_header().to_vec();
        for &(id, payload) in records {
            contents.extend_from_slice(&encode_record(id, payload));
        }
        contents
    }

    #[test]
    fn test_header_round_trip() {
        let header = encode_header();
        assert_eq!(header.len(), HEADER_SIZE);
        validate_header(&header).unwrap();
    }

    #[test]
    fn test_header_rejects_wrong_type_tag() {
        let mut header = encode_header();
        header[0] ^= 0xFF;
        assert!(matches!(validate_header(&header), Err(Error::InvalidDatabase { .. })));
    }

    #[test]
    fn test_header_rejects_wrong_version() {
        let mut header = encode_header();
        BigEndian::write_u32(&mut header[8..12], 2);
        assert!(matches!(
            validate_header(&header),
            Err(Error::IncompatibleVersion { version: 2 })
        ));
    }

    #[test]
    fn test_header_rejects_wrong_order() {
        let mut header = encode_header();
        BigEndian::write_u32(&mut header[12..16], 64);
        assert!(matches!(validate_header(&header), Err(Error::OrderMismatch { disk_order: 64 })));
    }

    #[test]
    fn test_header_rejects_short_buffer() {
        assert!(matches!(validate_header(&[0u8; 8]), Err(Error::InvalidDatabase { .. })));
    }

    #[test]
    fn test_replay_empty_manifest() {
        let recovered = replay(&encode_header());
        assert_eq!(recovered.root_id, BOOTSTRAP_ROOT_ID);
        assert_eq!(recovered.id_counter, 1);
        assert!(recovered.index.is_empty());
    }

    #[test]
    fn test_replay_tracks_latest_offset_and_root() {
        let contents = manifest_with(&[
            (1, 0),
            (2, 100),
            (0, 1), // root pointer
            (1, 200), // id 1 rewritten at a later offset
            (3, 300),
            (0, 3), // root moved
        ]);

        let recovered = replay(&contents);
        assert_eq!(recovered.root_id, 3);
        assert_eq!(recovered.id_counter, 3);
        assert_eq!(recovered.index.get(&1), Some(&200));
        assert_eq!(recovered.index.get(&2), Some(&100));
        assert_eq!(recovered.index.get(&3), Some(&300));
    }

    #[test]
    fn test_replay_tombstone_removes_entry() {
        let contents = manifest_with(&[
            (5, 100),
            (5, TOMBSTONE_PAYLOAD),
            (0, 6),
        ]);

        let recovered = replay(&contents);
        assert!(!recovered.index.contains_key(&5));
        // Tombstoned ids still advance the counter so ids are never reused
        assert_eq!(recovered.id_counter, 5);
        assert_eq!(recovered.root_id, 6);
    }

    #[test]
    fn test_replay_ignores_torn_trailing_record() {
        let mut contents = manifest_with(&[(1, 100), (0, 1)]);
        let clean = replay(&contents);

        // A torn final write leaves fewer than RECORD_SIZE trailing bytes
        contents.extend_from_slice(&[0xAB; 7]);
        let torn = replay(&contents);

        assert_eq!(clean, torn);
    }

    #[test]
    fn test_root_record_id_is_reserved() {
        // Root pointers never enter the index or advance the counter
        let contents = manifest_with(&[(0, 99)]);
        let recovered = replay(&contents);
        assert_eq!(recovered.root_id, 99);
        assert!(recovered.index.is_empty());
        assert_eq!(recovered.id_counter, 1);
    }
}
