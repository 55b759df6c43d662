//! Key-value backing store
//!
//! The ledger only needs ordered point reads, prefix scans and an atomic
//! batch write. Anything providing those can back a chain.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage backend failure: {0}")]
    Backend(#[from] sled::Error),
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Corrupted record: {0}")]
    Corrupted(String),
    #[error("Block index mismatch: expected {expected}, got {actual}")]
    IndexMismatch { expected: u32, actual: u32 },
    #[error("Balance overflow for account {0}")]
    BalanceOverflow(String),
    #[error("Name already bound: {0}")]
    NameConflict(String),
    #[error("Address does not resolve: {0}")]
    Unresolved(String),
    #[error("Stored genesis block does not match this network")]
    GenesisMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Ordered set of writes applied all-or-nothing
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Visit operations in insertion order; `None` marks a delete
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&[u8], Option<&[u8]>),
    {
        for op in &self.ops {
            match op {
                BatchOp::Put(key, value) => f(key, Some(value)),
                BatchOp::Delete(key) => f(key, None),
            }
        }
    }
}

/// Backing store used by the ledger
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Every entry whose key starts with `prefix`, in key order
    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError>;

    /// Apply a batch atomically. Later operations on the same key win.
    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError>;
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Independent copy of the current contents
    pub fn snapshot(&self) -> Self {
        Self {
            entries: Arc::new(RwLock::new(self.entries.read().clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StorageError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    fn apply(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut entries = self.entries.write();
        batch.for_each(|key, value| match value {
            Some(value) => {
                entries.insert(key.to_vec(), value.to_vec());
            }
            None => {
                entries.remove(key);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_applies_in_order() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"a".to_vec(), b"1".to_vec());
        batch.put(b"b".to_vec(), b"2".to_vec());
        batch.delete(b"a".to_vec());
        batch.put(b"c".to_vec(), b"3".to_vec());
        store.apply(batch).unwrap();

        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_prefix_scan_is_ordered_and_bounded() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for key in [&b"\x02\x00\x02"[..], b"\x02\x00\x01", b"\x03", b"\x01\xff"] {
            batch.put(key.to_vec(), key.to_vec());
        }
        store.apply(batch).unwrap();

        let keys: Vec<_> = store
            .scan_prefix(&[0x02])
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"\x02\x00\x01".to_vec(), b"\x02\x00\x02".to_vec()]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"k".to_vec(), b"v".to_vec());
        store.apply(batch).unwrap();

        let copy = store.snapshot();
        let mut batch = WriteBatch::new();
        batch.delete(b"k".to_vec());
        store.apply(batch).unwrap();

        assert!(store.is_empty());
        assert_eq!(copy.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
