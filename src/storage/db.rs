//! Database persistence layer using Sled
//!
//! Ledger writes land in a single tree through one `sled::Batch`, so a
//! block is either fully on disk or not at all.

use sled::{Db, Tree};
use std::path::Path;

use super::store::{KvStore, StorageError, WriteBatch};

const LEDGER_TREE: &str = "ledger";

/// Database wrapper
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    ledger_tree: Tree,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let ledger_tree = db.open_tree(LEDGER_TREE)?;
        Ok(Self { db, ledger_tree })
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.ledger_tree.get(key)?.map(|value| value.to_vec()))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let mut entries = Vec::new();
        for item in self.ledger_tree.scan_prefix(prefix) {
            let (key, value) = item?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        batch.for_each(|key, value| match value {
            Some(value) => sled_batch.insert(key, value),
            None => sled_batch.remove(key),
        });
        self.ledger_tree.apply_batch(sled_batch)?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SledStore::open(dir.path()).unwrap();
            let mut batch = WriteBatch::new();
            batch.put(vec![1, 0], vec![9]);
            batch.put(vec![1, 1], vec![8]);
            batch.put(vec![2], vec![7]);
            store.apply(batch).unwrap();
        }

        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.get(&[2]).unwrap(), Some(vec![7]));
        let scanned = store.scan_prefix(&[1]).unwrap();
        assert_eq!(scanned.len(), 2);
        assert_eq!(scanned[0], (vec![1, 0], vec![9]));
    }

    #[test]
    fn test_delete_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        let mut batch = WriteBatch::new();
        batch.put(vec![5], vec![1]);
        store.apply(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.delete(vec![5]);
        store.apply(batch).unwrap();
        assert_eq!(store.get(&[5]).unwrap(), None);
    }
}
