use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::KeyValueStore;
use super::error::{InvariantViolationSnafu, StorageResult};

/// Process-local store, used for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `set`/`remove` calls applied so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn entries(
        &self,
        stage: &'static str,
    ) -> StorageResult<MutexGuard<'_, BTreeMap<String, String>>> {
        match self.entries.lock() {
            Ok(guard) => Ok(guard),
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "memory store mutex was poisoned".to_string(),
            }
            .fail(),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries("memory-get")?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries("memory-set")?
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries("memory-remove")?.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries("memory-keys")?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_overwrites_whole_value_and_counts_writes() {
        let store = MemoryStore::new();
        store.set("chatCounter", "1").unwrap();
        store.set("chatCounter", "2").unwrap();

        assert_eq!(store.get("chatCounter").unwrap().as_deref(), Some("2"));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn removing_absent_key_succeeds() {
        let store = MemoryStore::new();
        store.remove("chat_missing").unwrap();
        assert!(store.get("chat_missing").unwrap().is_none());
        assert!(store.keys().unwrap().is_empty());
    }
}
