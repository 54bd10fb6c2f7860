//! Error types for the tidelog storage engine.

use std::io;

use snafu::Snafu;

/// Node identifier type.
///
/// Ids are assigned monotonically from the database's id counter and are
/// never reused; the bootstrap root is id `1`.
pub type NodeId = u64;

/// Result type alias for tidelog operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during tidelog operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// I/O error from the underlying storage backend.
    #[snafu(display("I/O error: {source}"))]
    Io {
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The path is not a tidelog database (regular file in the way, bad
    /// manifest header, or malformed header fields).
    #[snafu(display("Invalid database: {reason}"))]
    InvalidDatabase {
        /// Description of what was rejected.
        reason: String,
    },

    /// On-disk format version does not match this implementation.
    #[snafu(display("Incompatible format version: {version}"))]
    IncompatibleVersion {
        /// The version found on disk.
        version: u32,
    },

    /// On-disk tree order does not match the compile-time order.
    #[snafu(display("Order mismatch: database was created with order {disk_order}"))]
    OrderMismatch {
        /// The order recorded in the manifest header.
        disk_order: u32,
    },

    /// A node id is referenced but has no manifest entry (and is not the
    /// bootstrap root).
    #[snafu(display("Corrupt state: node {node_id} has no manifest entry"))]
    CorruptState {
        /// The unresolvable node id.
        node_id: NodeId,
    },

    /// The node codec failed to freeze or thaw a node image.
    #[snafu(display("Codec failure: {source}"))]
    Codec {
        /// The codec's underlying error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// No encoder is registered for a key element.
    #[snafu(display("No matching key encoder for {value}"))]
    NoMatchingEncoder {
        /// Debug rendering of the offending element.
        value: String,
    },

    /// No decoder is registered for a key type byte.
    #[snafu(display("No matching key decoder for type byte {tag:#04x}"))]
    NoMatchingDecoder {
        /// The unrecognized type byte.
        tag: u8,
    },

    /// The database was closed while the operation was in flight.
    #[snafu(display("Database is closed"))]
    Closed,
}

impl Error {
    /// Wraps an arbitrary codec error.
    pub fn codec<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Codec { source: Box::new(source) }
    }
}

// Provide automatic conversion from io::Error to Error::Io for ergonomic ? usage
impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        let display = format!("{err}");
        assert!(display.starts_with("I/O error:"), "got: {display}");
    }

    #[test]
    fn test_error_display_invalid_database() {
        let err = Error::InvalidDatabase { reason: "bad header".to_string() };
        assert_eq!(format!("{err}"), "Invalid database: bad header");
    }

    #[test]
    fn test_error_display_incompatible_version() {
        let err = Error::IncompatibleVersion { version: 9 };
        assert_eq!(format!("{err}"), "Incompatible format version: 9");
    }

    #[test]
    fn test_error_display_order_mismatch() {
        let err = Error::OrderMismatch { disk_order: 64 };
        assert_eq!(format!("{err}"), "Order mismatch: database was created with order 64");
    }

    #[test]
    fn test_error_display_corrupt_state() {
        let err = Error::CorruptState { node_id: 42 };
        assert_eq!(format!("{err}"), "Corrupt state: node 42 has no manifest entry");
    }

    #[test]
    fn test_error_display_no_matching_decoder() {
        let err = Error::NoMatchingDecoder { tag: 0xa0 };
        assert_eq!(format!("{err}"), "No matching key decoder for type byte 0xa0");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        match err {
            Error::Io { source } => assert_eq!(source.kind(), io::ErrorKind::PermissionDenied),
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_error_source_chain() {
        use std::error::Error as StdError;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);

        // snafu should preserve the source chain
        assert!(err.source().is_some(), "Error::Io should have a source");
    }
}
