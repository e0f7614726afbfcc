//! Error types for the tree and its block store collaborators.

use thiserror::Error;

use crate::node::NodeId;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TreeError>;

/// Errors surfaced by the tree or a block store implementation.
#[derive(Error, Debug)]
pub enum TreeError {
    /// I/O error from a disk-backed block store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A block store lookup found no page under the given id.
    #[error("block {0} not found")]
    BlockNotFound(NodeId),

    /// A page ended before the last field the parser expected to read finished.
    #[error("truncated page while parsing {0} node")]
    TruncatedPage(&'static str),

    /// Bytes remained in the page after the parser read every field it expected.
    #[error("trailing bytes after parsing {0} node: {1} bytes left")]
    TrailingBytes(&'static str, usize),

    /// The page's leading flags byte did not name a known node kind.
    #[error("unknown node type byte: {0}")]
    UnknownNodeType(u8),

    /// A single key+value pair alone exceeds the block store's max block size.
    #[error("value too large: key+value is {size} bytes, max block size is {max}")]
    ValueTooLarge { size: usize, max: usize },

    /// A mutating call was made on a handle that already flushed once.
    #[error("mutation attempted on an already-flushed tree")]
    AlreadyFlushed,

    /// One or more pages failed to persist during a flush's `putAll`.
    #[error("put failed: one or more pages could not be written")]
    PutFailed,

    /// A disk block store detected corrupted page bytes (checksum mismatch).
    #[error("corruption detected in block {0}: {1}")]
    Corruption(NodeId, String),

    /// An invariant the tree relies on did not hold after a mutation step;
    /// this indicates a bug in the tree rather than a caller error.
    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl TreeError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn corruption(id: NodeId, msg: impl Into<String>) -> Self {
        Self::Corruption(id, msg.into())
    }
}
