//! # cow-btree
//!
//! A persistent, copy-on-write B+-tree index over opaque byte-slice
//! keys/values, with a pluggable block store collaborator.
//!
//! ## Architecture
//!
//! The engine is composed of small, independently testable layers:
//!
//! - **Byte slice** (`bytes`): a cheaply-cloneable owned/borrowed byte range
//! - **Block store** (`store`): the tree's only I/O surface, with in-memory
//!   and disk-backed implementations
//! - **Node model / codec / size** (`node`, `codec`, `size`): the in-memory
//!   node shapes, their bit-exact wire format, and split-point accounting
//! - **Edit tree** (`edit`): the mutating, copy-on-write handle
//! - **Query tree + cursor** (`query`, `cursor`): read-only lookups and
//!   forward iteration
//! - **Typed façade** (`typed`): a `K`/`V`-generic wrapper over the
//!   byte-oriented core
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use cow_btree::{Tree, TreeLimits, MemStore, fixed_width_functions};
//!
//! let store = Arc::new(MemStore::new(1024));
//! let tree = Tree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024));
//!
//! tree.insert(1u32.to_le_bytes().to_vec().into(), 10u32.to_le_bytes().to_vec().into()).unwrap();
//! let value = tree.get(&1u32.to_le_bytes()).unwrap();
//! assert!(value.is_some());
//! ```

pub mod bytes;
pub mod codec;
pub mod config;
pub mod cursor;
pub mod edit;
pub mod error;
pub mod node;
pub mod query;
pub mod size;
pub mod store;
pub mod typed;

pub use bytes::Bytes;
pub use codec::{fixed_width_functions, TreeFunctions};
pub use config::TreeLimits;
pub use cursor::Cursor;
pub use edit::{EditTree, Mutation};
pub use error::{Result, TreeError};
pub use node::{ItemCount, NodeId};
pub use query::QueryTree;
pub use store::{BlockStore, DiskStore, MemStore, PutEntry};
pub use typed::{TypedCodec, TypedCursor, TypedEditTree, TypedQueryTree};

use std::sync::Arc;

use parking_lot::RwLock;

/// A convenience handle bundling a block store, its tree functions, and
/// the current root id behind a lock — single-operation insert/get/remove
/// calls that flush immediately, mirroring the teacher's `Db` façade over
/// its lower-level `BTree`/`BufferPool` pair.
pub struct Tree {
    store: Arc<dyn BlockStore>,
    fns: TreeFunctions,
    limits: TreeLimits,
    root_id: RwLock<Option<NodeId>>,
}

impl Tree {
    /// Opens an empty tree backed by `store`.
    pub fn new(store: Arc<dyn BlockStore>, fns: TreeFunctions, limits: TreeLimits) -> Self {
        Self::open(store, fns, limits, None)
    }

    /// Opens a tree at a previously flushed root.
    pub fn open(store: Arc<dyn BlockStore>, fns: TreeFunctions, limits: TreeLimits, root_id: Option<NodeId>) -> Self {
        Self {
            store,
            fns,
            limits,
            root_id: RwLock::new(root_id),
        }
    }

    pub fn root_id(&self) -> Option<NodeId> {
        *self.root_id.read()
    }

    fn query(&self) -> QueryTree {
        QueryTree::new(self.store.clone(), self.fns.clone(), self.root_id())
    }

    /// Starts a mutation session rooted at the tree's current root. The
    /// caller must call [`EditTree::flush`] and pass the result to
    /// [`Tree::commit`] for the change to become visible.
    pub fn edit(&self) -> EditTree {
        EditTree::new(self.store.clone(), self.fns.clone(), self.limits, self.root_id())
    }

    /// Adopts a flush result as the tree's new root.
    pub fn commit(&self, mutation: &Mutation) {
        *self.root_id.write() = mutation.new_root_id;
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.query().get(key)
    }

    pub fn item_count(&self) -> Result<ItemCount> {
        self.query().item_count()
    }

    pub fn find(&self, key: &[u8]) -> Result<Cursor> {
        self.query().find(key)
    }

    pub fn cursor(&self) -> Result<Cursor> {
        self.query().cursor()
    }

    fn apply_and_commit(&self, f: impl FnOnce(&mut EditTree) -> Result<()>) -> Result<()> {
        let mut editor = self.edit();
        f(&mut editor)?;
        let mutation = editor.flush()?;
        if !mutation.success {
            return Err(TreeError::PutFailed);
        }
        self.commit(&mutation);
        Ok(())
    }

    pub fn insert(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.apply_and_commit(|e| e.insert(key, value))
    }

    pub fn upsert(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.apply_and_commit(|e| e.upsert(key, value))
    }

    pub fn remove(&self, key: Bytes) -> Result<()> {
        self.apply_and_commit(|e| e.remove(key))
    }

    pub fn remove_kv(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.apply_and_commit(|e| e.remove_kv(key, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> Bytes {
        Bytes::from_vec(n.to_le_bytes().to_vec())
    }

    #[test]
    fn single_operation_round_trip() {
        let store = Arc::new(MemStore::new(1024));
        let tree = Tree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024));

        tree.insert(key(1), key(10)).unwrap();
        tree.insert(key(2), key(20)).unwrap();
        assert_eq!(tree.get(&key(1)).unwrap().unwrap().as_slice(), key(10).as_slice());

        tree.remove(key(1)).unwrap();
        assert!(tree.get(&key(1)).unwrap().is_none());
        assert_eq!(tree.item_count().unwrap(), 1);
    }

    #[test]
    fn cursor_walks_in_order_after_many_inserts() {
        let store = Arc::new(MemStore::new(1024));
        let tree = Tree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024));
        for i in (0u32..100).rev() {
            tree.insert(key(i), key(i)).unwrap();
        }

        let mut cursor = tree.cursor().unwrap();
        let mut expected = 0u32;
        while cursor.valid() {
            assert_eq!(cursor.key().unwrap().as_slice(), key(expected).as_slice());
            expected += 1;
            cursor.next().unwrap();
        }
        assert_eq!(expected, 100);
    }

    #[test]
    fn facade_handles_many_inserts_and_a_remove() {
        let store = Arc::new(MemStore::new(1024));
        let tree = Tree::new(store, fixed_width_functions(4, 4), TreeLimits::new(1024));
        for i in 0u32..50 {
            tree.insert(key(i), key(i * 2)).unwrap();
        }
        for i in 0u32..50 {
            assert_eq!(tree.get(&key(i)).unwrap().unwrap().as_slice(), key(i * 2).as_slice());
        }
        tree.remove(key(25)).unwrap();
        assert!(tree.get(&key(25)).unwrap().is_none());
        assert_eq!(tree.item_count().unwrap(), 49);
    }
}
