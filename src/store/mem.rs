//! An in-memory block store, used for tests and for embedders who persist
//! the tree some other way. Grounded on the teacher's buffer-pool style
//! `HashMap` fixtures, generalized into a standalone store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::bytes::Bytes;
use crate::error::{Result, TreeError};
use crate::node::NodeId;

use super::{BlockStore, PutEntry};

pub struct MemStore {
    pages: RwLock<HashMap<NodeId, Bytes>>,
    next_id: AtomicU64,
    max_block_size: u32,
}

impl MemStore {
    pub fn new(max_block_size: u32) -> Self {
        Self {
            pages: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_block_size,
        }
    }

    pub fn block_count(&self) -> usize {
        self.pages.read().len()
    }
}

impl BlockStore for MemStore {
    fn allocate_ids(&self, n: usize) -> Result<Vec<NodeId>> {
        let first = self.next_id.fetch_add(n as u64, Ordering::SeqCst);
        Ok((0..n as u64).map(|i| first + i).collect())
    }

    fn get(&self, id: NodeId) -> Result<Bytes> {
        self.pages
            .read()
            .get(&id)
            .cloned()
            .ok_or(TreeError::BlockNotFound(id))
    }

    fn put_all(&self, mut entries: Vec<PutEntry>) -> Result<Vec<PutEntry>> {
        let mut pages = self.pages.write();
        for entry in &mut entries {
            pages.insert(entry.id, entry.bytes.clone());
            entry.success = true;
        }
        Ok(entries)
    }

    fn delete_all(&self, ids: &[NodeId]) -> Result<()> {
        let mut pages = self.pages.write();
        for id in ids {
            pages.remove(id);
        }
        Ok(())
    }

    fn max_block_size(&self) -> u32 {
        self.max_block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_ids_are_disjoint_across_calls() {
        let store = MemStore::new(1024);
        let first = store.allocate_ids(3).unwrap();
        let second = store.allocate_ids(2).unwrap();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(second, vec![4, 5]);
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = MemStore::new(1024);
        let id = store.allocate_ids(1).unwrap()[0];
        let entries = store
            .put_all(vec![PutEntry::new(id, Bytes::copy_from(b"hello"))])
            .unwrap();
        assert!(entries[0].success);
        assert_eq!(store.get(id).unwrap().as_slice(), b"hello");
    }

    #[test]
    fn get_missing_block_fails() {
        let store = MemStore::new(1024);
        assert!(matches!(store.get(99), Err(TreeError::BlockNotFound(99))));
    }

    #[test]
    fn delete_all_removes_pages() {
        let store = MemStore::new(1024);
        let id = store.allocate_ids(1).unwrap()[0];
        store
            .put_all(vec![PutEntry::new(id, Bytes::copy_from(b"x"))])
            .unwrap();
        store.delete_all(&[id]).unwrap();
        assert!(store.get(id).is_err());
    }
}
