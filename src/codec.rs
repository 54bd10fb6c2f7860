//! Node image serialization.
//!
//! The engine is agnostic about how node images are laid out in the log:
//! any deterministic codec works, as long as `thaw(freeze(node)) == node`.
//! The default codec uses postcard, which is compact and cheap to decode.

use crate::{
    error::Result,
    node::Node,
};

/// Serializes nodes to log records and back.
///
/// Implementations must be deterministic: the engine compares nothing but
/// byte lengths, so a codec that produced different bytes for equal nodes
/// would only waste log space, but one that failed to round-trip would
/// corrupt reads.
pub trait NodeCodec: Send + Sync {
    /// Serializes a node into its on-disk image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`](crate::Error::Codec) if serialization fails.
    fn freeze(&self, node: &Node) -> Result<Vec<u8>>;

    /// Deserializes a node from its on-disk image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`](crate::Error::Codec) if the bytes do not
    /// decode to a node.
    fn thaw(&self, bytes: &[u8]) -> Result<Node>;
}

/// Default node codec backed by postcard.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostcardCodec;

impl NodeCodec for PostcardCodec {
    fn freeze(&self, node: &Node) -> Result<Vec<u8>> {
        postcard::to_allocvec(node).map_err(crate::Error::codec)
    }

    fn thaw(&self, bytes: &[u8]) -> Result<Node> {
        postcard::from_bytes(bytes).map_err(crate::Error::codec)
    }
}
