//! The read-only tree: point lookups and cursor construction.
//!
//! Grounded on the teacher's `btree::cursor::Cursor`/`BTree::get`,
//! generalized per spec §4.7 to apply an internal node's pending edit
//! queue shallowly while descending, without persisting anything.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::bytes::Bytes;
use crate::codec::{self, TreeFunctions};
use crate::cursor::Cursor;
use crate::error::Result;
use crate::node::{ChildRef, EditKind, InternalNode, ItemCount, Node, NodeId};
use crate::store::BlockStore;

/// A read-only handle over a persisted (possibly empty) tree.
#[derive(Clone)]
pub struct QueryTree {
    pub(crate) store: Arc<dyn BlockStore>,
    pub(crate) fns: TreeFunctions,
    pub(crate) root_id: Option<NodeId>,
}

impl QueryTree {
    pub fn new(store: Arc<dyn BlockStore>, fns: TreeFunctions, root_id: Option<NodeId>) -> Self {
        Self { store, fns, root_id }
    }

    pub(crate) fn load(&self, id: NodeId) -> Result<Node> {
        let bytes = self.store.get(id)?;
        codec::parse_node(&bytes, &self.fns)
    }

    pub(crate) fn load_child(&self, child: &ChildRef) -> Result<Node> {
        match child {
            ChildRef::Owned(n) => Ok((**n).clone()),
            ChildRef::Id(id) => self.load(*id),
        }
    }

    pub(crate) fn find_branch_index(&self, internal: &InternalNode, key: &[u8]) -> usize {
        let mut idx = 0;
        for (i, b) in internal.branches.iter().enumerate().skip(1) {
            if self.fns.key_cmp(b.min_key.as_slice(), key) != Ordering::Greater {
                idx = i;
            } else {
                break;
            }
        }
        idx
    }

    /// Returns the root's total item count, or zero for an empty tree.
    pub fn item_count(&self) -> Result<ItemCount> {
        match self.root_id {
            None => Ok(0),
            Some(id) => Ok(self.load(id)?.item_count()),
        }
    }

    /// Looks up the first value stored under `key`, applying any pending
    /// edits encountered on the way down. Duplicate-key overflow chains are
    /// never consulted here: every key present anywhere in the tree also
    /// has at least one literal occurrence in the leaf that owns it.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        match self.root_id {
            None => Ok(None),
            Some(id) => {
                let root = self.load(id)?;
                self.get_rec(&root, key)
            }
        }
    }

    fn get_rec(&self, node: &Node, key: &[u8]) -> Result<Option<Bytes>> {
        match node {
            Node::Leaf(leaf) => {
                for (k, v) in &leaf.pairs {
                    if self.fns.key_cmp(k.as_slice(), key) == Ordering::Equal {
                        return Ok(Some(v.clone()));
                    }
                }
                Ok(None)
            }
            Node::Internal(internal) => {
                // Upsert/RemoveKey in the queue override the subtree outright
                // for this key. A queued RemoveKV can't be resolved without
                // knowing which value is "current", so it is conservatively
                // left for the descent to see once flushed down. A queued
                // Insert never overwrites an existing occurrence, so it is
                // kept only as a fallback if nothing is found below.
                let mut override_value: Option<Option<Bytes>> = None;
                let mut insert_fallback: Option<Bytes> = None;
                for edit in &internal.edits {
                    if self.fns.key_cmp(edit.key.as_slice(), key) != Ordering::Equal {
                        continue;
                    }
                    match edit.kind {
                        EditKind::Upsert => override_value = Some(edit.value.clone()),
                        EditKind::RemoveKey => override_value = Some(None),
                        EditKind::RemoveKV => {}
                        EditKind::Insert => {
                            if insert_fallback.is_none() {
                                insert_fallback = edit.value.clone();
                            }
                        }
                    }
                }
                if let Some(value) = override_value {
                    return Ok(value);
                }

                let idx = self.find_branch_index(internal, key);
                let child = self.load_child(&internal.branches[idx].child)?;
                let found = self.get_rec(&child, key)?;
                Ok(found.or(insert_fallback))
            }
            Node::Overflow(_) => Ok(None),
        }
    }

    /// Positions a cursor at the first occurrence of `key`, or past the end
    /// if the key is absent.
    pub fn find(&self, key: &[u8]) -> Result<Cursor> {
        Cursor::seek_key(self, key)
    }

    /// Positions a cursor at the item with the given zero-based rank across
    /// the whole tree (duplicates and overflowed values counted).
    pub fn seek(&self, rank: u64) -> Result<Cursor> {
        Cursor::seek_rank(self, rank)
    }

    /// A cursor positioned at the first item in the tree.
    pub fn cursor(&self) -> Result<Cursor> {
        Cursor::seek_rank(self, 0)
    }
}
