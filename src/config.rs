//! Tree-wide tunables.
//!
//! Grounded on the teacher's `Config`/`BTreeConfig` pair (`lib.rs`,
//! `types/mod.rs`): a small builder-style struct carrying the node-size
//! limits, minus the disk-path and buffer-pool fields that belong to the
//! block store rather than the core tree.

/// The two size limits every node kind is accounted against.
#[derive(Debug, Clone, Copy)]
pub struct TreeLimits {
    /// Hard serialized-size ceiling for every node (spec §4.2's
    /// `maxBlockSize`).
    pub max_block_size: u32,
    /// Byte-size cap on an internal node's pending edit queue before it is
    /// flushed down into children (spec §4.4).
    pub max_edit_queue_size: u32,
}

impl TreeLimits {
    pub fn new(max_block_size: u32) -> Self {
        Self {
            max_block_size,
            max_edit_queue_size: max_block_size / 4,
        }
    }

    pub fn with_edit_queue_size(mut self, max_edit_queue_size: u32) -> Self {
        self.max_edit_queue_size = max_edit_queue_size;
        self
    }
}

impl Default for TreeLimits {
    fn default() -> Self {
        Self::new(4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_edit_queue_is_a_quarter_of_block_size() {
        let limits = TreeLimits::new(1024);
        assert_eq!(limits.max_edit_queue_size, 256);
    }
}
