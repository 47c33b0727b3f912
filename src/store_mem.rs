use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::error::StoreError;
use crate::store::{Collection, Document, DocumentStore, KeyQuery};
use crate::types::compute_digest;

/// MemoryStore is an in-process document store.
/// Each collection is a key-ordered map, so prefix scans are range walks.
/// Writes are compare-and-swap on version under one lock.
/// `inject_conflicts` lets tests simulate a concurrent writer.
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<Collection, BTreeMap<String, Document>>,
    pending_conflicts: HashMap<(Collection, String), u32>,
    writes: HashMap<Collection, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    /// The next `times` writes to `key` fail as if another writer had just
    /// bumped its version. The stored document is left alone.
    pub fn inject_conflicts(&self, collection: Collection, key: &str, times: u32) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.pending_conflicts.insert((collection, key.to_string()), times);
        Ok(())
    }

    /// Overwrite a payload without restamping its digest.
    pub fn corrupt(&self, collection: Collection, key: &str, data: Value) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        let doc = inner
            .collections
            .get_mut(&collection)
            .and_then(|docs| docs.get_mut(key));
        match doc {
            Some(doc) => {
                doc.data = data;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Successful writes (sets and deletes) so far.
    pub fn write_count(&self, collection: Collection) -> u64 {
        self.lock()
            .map(|inner| inner.writes.get(&collection).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn len(&self, collection: Collection) -> usize {
        self.lock()
            .map(|inner| inner.collections.get(&collection).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, collection: Collection) -> bool {
        self.len(collection) == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn current_version(&self, collection: Collection, key: &str) -> u64 {
        self.collections
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .map_or(0, |doc| doc.version)
    }

    fn take_injected_conflict(&mut self, collection: Collection, key: &str) -> bool {
        let slot = (collection, key.to_string());
        match self.pending_conflicts.get_mut(&slot) {
            Some(n) if *n > 0 => {
                *n -= 1;
                if *n == 0 {
                    self.pending_conflicts.remove(&slot);
                }
                true
            }
            _ => false,
        }
    }

    fn check_version(&mut self, collection: Collection, key: &str, expected: u64) -> Result<(), StoreError> {
        let found = self.current_version(collection, key);
        if self.take_injected_conflict(collection, key) {
            return Err(StoreError::VersionConflict {
                collection,
                key: key.to_string(),
                expected,
                found: found + 1,
            });
        }
        if found != expected {
            return Err(StoreError::VersionConflict {
                collection,
                key: key.to_string(),
                expected,
                found,
            });
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .collections
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn list(&self, collection: Collection, query: &KeyQuery) -> Result<Vec<Document>, StoreError> {
        let inner = self.lock()?;
        let docs = match inner.collections.get(&collection) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };
        Ok(docs
            .range(query.prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&query.prefix))
            .map(|(_, doc)| doc)
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect())
    }

    fn set(
        &self,
        collection: Collection,
        key: &str,
        description: &str,
        data: Value,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        inner.check_version(collection, key, expected_version)?;

        let version = expected_version + 1;
        let digest = compute_digest(&data);
        let doc = Document {
            key: key.to_string(),
            description: description.to_string(),
            data,
            version,
            digest,
        };
        inner
            .collections
            .entry(collection)
            .or_insert_with(BTreeMap::new)
            .insert(key.to_string(), doc);
        *inner.writes.entry(collection).or_insert(0) += 1;
        Ok(version)
    }

    fn delete(&self, collection: Collection, key: &str, expected_version: u64) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.check_version(collection, key, expected_version)?;
        if let Some(docs) = inner.collections.get_mut(&collection) {
            docs.remove(key);
        }
        *inner.writes.entry(collection).or_insert(0) += 1;
        Ok(())
    }
}
