use {
    auto_impl::auto_impl,
    parking_lot::RwLock,
    std::collections::BTreeMap,
    tracing::debug,
};

/// Key/value store of a single node.
///
/// The ring only decides *which* node stores a key; the store itself is
/// assumed to be internally consistent per key.
#[auto_impl(&, Box, Arc)]
pub trait StorageService: Send + Sync {
    /// Stores `value` under `key`, replacing any existing value.
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Concatenates `value` onto the existing value (or stores it, if absent).
    fn append(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Returns the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Number of stored pairs.
    fn count(&self) -> Result<usize, StorageError>;

    /// All stored pairs, in a stable order.
    fn scan(&self) -> Result<Vec<(String, String)>, StorageError>;

    /// Releases the store. Every later operation fails.
    fn destroy(&self) -> Result<(), StorageError>;
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// Store was destroyed.
    #[error("Storage has been destroyed")]
    Destroyed,
}

/// In-memory store, ordered by key.
#[derive(Debug)]
pub struct MemoryStorage {
    // `None` once destroyed.
    entries: RwLock<Option<BTreeMap<String, String>>>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Some(BTreeMap::new())),
        }
    }

    fn write<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> Result<T, StorageError> {
        self.entries
            .write()
            .as_mut()
            .map(f)
            .ok_or(StorageError::Destroyed)
    }

    fn read<T>(&self, f: impl FnOnce(&BTreeMap<String, String>) -> T) -> Result<T, StorageError> {
        self.entries
            .read()
            .as_ref()
            .map(f)
            .ok_or(StorageError::Destroyed)
    }
}

impl StorageService for MemoryStorage {
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(|entries| {
            entries.insert(key.to_owned(), value.to_owned());
        })
    }

    fn append(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.write(|entries| {
            entries.entry(key.to_owned()).or_default().push_str(value);
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.read(|entries| entries.get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write(|entries| {
            entries.remove(key);
        })
    }

    fn count(&self) -> Result<usize, StorageError> {
        self.read(BTreeMap::len)
    }

    fn scan(&self) -> Result<Vec<(String, String)>, StorageError> {
        self.read(|entries| {
            entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        })
    }

    fn destroy(&self) -> Result<(), StorageError> {
        let released = self.entries.write().take().map_or(0, |entries| entries.len());
        debug!(released, "memory storage destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::sync::Arc};

    #[test]
    fn basic_ops() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.put("k", "v1").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v1"));
        storage.put("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v2"));

        storage.delete("k").unwrap();
        assert_eq!(storage.get("k").unwrap(), None);
        storage.delete("k").unwrap();
    }

    #[test]
    fn append_concatenates() {
        let storage = MemoryStorage::new();
        storage.append("k", "a").unwrap();
        storage.append("k", "b").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("ab"));

        storage.put("k", "x").unwrap();
        storage.append("k", "y").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("xy"));
    }

    #[test]
    fn scan_is_ordered() {
        let storage = MemoryStorage::new();
        for key in ["c", "a", "b"] {
            storage.put(key, &key.to_uppercase()).unwrap();
        }
        let pairs = storage.scan().unwrap();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "A".to_string()),
                ("b".to_string(), "B".to_string()),
                ("c".to_string(), "C".to_string()),
            ]
        );
        assert_eq!(pairs, storage.scan().unwrap());
        assert_eq!(storage.count().unwrap(), 3);
    }

    #[test]
    fn destroyed_storage_rejects_ops() {
        let storage: Arc<dyn StorageService> = Arc::new(MemoryStorage::new());
        storage.put("k", "v").unwrap();
        storage.destroy().unwrap();

        assert_eq!(storage.get("k"), Err(StorageError::Destroyed));
        assert_eq!(storage.put("k", "v"), Err(StorageError::Destroyed));
        assert_eq!(storage.scan(), Err(StorageError::Destroyed));
        assert_eq!(storage.count(), Err(StorageError::Destroyed));
        // Destroying twice is harmless.
        storage.destroy().unwrap();
    }
}
