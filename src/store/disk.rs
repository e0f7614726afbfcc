//! A disk-backed block store: one file per block under `<prefix>/<id>`,
//! per spec §6's conformance requirement.
//!
//! Grounded on `storage::disk_manager::DiskManagerImpl` (teacher): a
//! `parking_lot`-guarded file handle per block, and a leading checksum on
//! every page mirroring the teacher's `file_header` checksum discipline
//! (`crc32fast`), even though the spec itself doesn't mandate one — a
//! disk-backed store with zero corruption detection would be a step back
//! from the teacher's own disk manager.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::bytes::Bytes;
use crate::error::{Result, TreeError};
use crate::node::NodeId;

use super::{BlockStore, PutEntry};

const CHECKSUM_LEN: usize = 4;

pub struct DiskStore {
    dir: PathBuf,
    next_id: AtomicU64,
    max_block_size: u32,
}

impl DiskStore {
    /// Opens (creating if absent) a directory of one-file-per-block pages.
    /// The id counter resumes from one past the highest-numbered file
    /// already present.
    pub fn open(dir: impl AsRef<Path>, max_block_size: u32) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut max_seen = 0u64;
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                max_seen = max_seen.max(id);
            }
        }

        Ok(Self {
            dir,
            next_id: AtomicU64::new(max_seen + 1),
            max_block_size,
        })
    }

    fn path_for(&self, id: NodeId) -> PathBuf {
        self.dir.join(id.to_string())
    }
}

impl BlockStore for DiskStore {
    fn allocate_ids(&self, n: usize) -> Result<Vec<NodeId>> {
        let first = self.next_id.fetch_add(n as u64, Ordering::SeqCst);
        Ok((0..n as u64).map(|i| first + i).collect())
    }

    fn get(&self, id: NodeId) -> Result<Bytes> {
        let path = self.path_for(id);
        let raw = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TreeError::BlockNotFound(id)
            } else {
                TreeError::Io(e)
            }
        })?;
        if raw.len() < CHECKSUM_LEN {
            return Err(TreeError::corruption(id, "page shorter than its checksum header"));
        }
        let (checksum_bytes, payload) = raw.split_at(CHECKSUM_LEN);
        let stored = u32::from_le_bytes([
            checksum_bytes[0],
            checksum_bytes[1],
            checksum_bytes[2],
            checksum_bytes[3],
        ]);
        let actual = crc32fast::hash(payload);
        if stored != actual {
            return Err(TreeError::corruption(id, "checksum mismatch"));
        }
        Ok(Bytes::copy_from(payload))
    }

    fn put_all(&self, mut entries: Vec<PutEntry>) -> Result<Vec<PutEntry>> {
        for entry in &mut entries {
            let checksum = crc32fast::hash(entry.bytes.as_slice());
            let mut framed = Vec::with_capacity(CHECKSUM_LEN + entry.bytes.len());
            framed.extend_from_slice(&checksum.to_le_bytes());
            framed.extend_from_slice(entry.bytes.as_slice());

            let final_path = self.path_for(entry.id);
            let tmp_path = self.dir.join(format!("{}.tmp", entry.id));
            entry.success = fs::write(&tmp_path, &framed)
                .and_then(|_| fs::rename(&tmp_path, &final_path))
                .is_ok();
        }
        Ok(entries)
    }

    fn delete_all(&self, ids: &[NodeId]) -> Result<()> {
        for id in ids {
            match fs::remove_file(self.path_for(*id)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(TreeError::Io(e)),
            }
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
    use tempfile::tempdir;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 1024).unwrap();
        let id = store.allocate_ids(1).unwrap()[0];
        let entries = store
            .put_all(vec![PutEntry::new(id, Bytes::copy_from(b"payload"))])
            .unwrap();
        assert!(entries[0].success);
        assert_eq!(store.get(id).unwrap().as_slice(), b"payload");
    }

    #[test]
    fn reopen_resumes_id_counter_past_existing_files() {
        let dir = tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path(), 1024).unwrap();
            let id = store.allocate_ids(1).unwrap()[0];
            store
                .put_all(vec![PutEntry::new(id, Bytes::copy_from(b"x"))])
                .unwrap();
            assert_eq!(id, 1);
        }
        let store = DiskStore::open(dir.path(), 1024).unwrap();
        assert_eq!(store.allocate_ids(1).unwrap()[0], 2);
    }

    #[test]
    fn corrupted_page_is_rejected() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 1024).unwrap();
        let id = store.allocate_ids(1).unwrap()[0];
        store
            .put_all(vec![PutEntry::new(id, Bytes::copy_from(b"payload"))])
            .unwrap();

        let path = dir.path().join(id.to_string());
        let mut raw = fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        fs::write(&path, raw).unwrap();

        assert!(matches!(store.get(id), Err(TreeError::Corruption(_, _))));
    }

    #[test]
    fn missing_block_fails() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open(dir.path(), 1024).unwrap();
        assert!(matches!(store.get(42), Err(TreeError::BlockNotFound(42))));
    }
}
