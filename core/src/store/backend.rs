// Key-value persistence behind the snapshot store

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

/// Ordered byte-keyed storage
pub trait StorageBackend: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError>;
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError>;
    fn remove(&self, key: &[u8]) -> Result<(), BackendError>;
    /// Every entry, ordered by key
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError>;
    fn clear(&self) -> Result<(), BackendError>;
    fn flush(&self) -> Result<(), BackendError>;
}

/// In-memory storage for tests and throwaway simulations
#[derive(Clone, Default)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.data.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn remove(&self, key: &[u8]) -> Result<(), BackendError> {
        self.data.write().remove(key);
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        Ok(self
            .data
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.data.write().clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// One sled tree
pub struct SledBackend {
    _db: sled::Db,
    tree: sled::Tree,
}

impl SledBackend {
    pub fn open(path: impl AsRef<Path>, tree: &str) -> Result<Self, BackendError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(tree)?;
        Ok(Self { _db: db, tree })
    }
}

impl StorageBackend for SledBackend {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), BackendError> {
        self.tree.insert(key, value)?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.tree.get(key)?.map(|ivec| ivec.to_vec()))
    }

    fn remove(&self, key: &[u8]) -> Result<(), BackendError> {
        self.tree.remove(key)?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, BackendError> {
        let mut results = Vec::new();
        for item in self.tree.iter() {
            let (k, v) = item?;
            results.push((k.to_vec(), v.to_vec()));
        }
        Ok(results)
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.tree.clear()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), BackendError> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(backend: &dyn StorageBackend) {
        backend.put(b"b", b"2").unwrap();
        backend.put(b"a", b"1").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), Some(b"1".to_vec()));

        let keys: Vec<_> = backend.scan().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        backend.remove(b"a").unwrap();
        assert_eq!(backend.get(b"a").unwrap(), None);

        backend.clear().unwrap();
        assert!(backend.scan().unwrap().is_empty());
        backend.flush().unwrap();
    }

    #[test]
    fn test_memory_backend() {
        exercise(&MemoryBackend::new());
    }

    #[test]
    fn test_sled_backend() {
        let dir = tempdir().unwrap();
        let backend = SledBackend::open(dir.path().join("db"), "test").unwrap();
        exercise(&backend);
    }

    #[test]
    fn test_sled_backend_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let backend = SledBackend::open(&path, "test").unwrap();
            backend.put(b"k", b"v").unwrap();
            backend.flush().unwrap();
        }
        let backend = SledBackend::open(&path, "test").unwrap();
        assert_eq!(backend.get(b"k").unwrap(), Some(b"v".to_vec()));
    }
}
