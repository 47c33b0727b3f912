use std::fmt;

use serde::{Serialize, Deserialize};
use serde_json::Value;

use crate::error::{RecordError, StoreError};
use crate::records::Record;
use crate::types::{compute_digest, Digest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Collection {
    Users,
    Tags,
    Votes,
    Reputations,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Tags => "tags",
            Collection::Votes => "votes",
            Collection::Reputations => "reputations",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the store holds: an untyped JSON payload plus bookkeeping.
/// `version` starts at 1 on creation and grows by one per write;
/// `digest` is stamped by the store over `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub description: String,
    pub data: Value,
    pub version: u64,
    pub digest: Digest,
}

impl Document {
    pub fn verify(&self) -> bool {
        compute_digest(&self.data) == self.digest
    }
}

/// Selection for `list`: a key prefix, optionally narrowed by a substring of
/// the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyQuery {
    pub prefix: String,
    pub description_contains: Option<String>,
}

impl KeyQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), description_contains: None }
    }

    pub fn with_description(mut self, fragment: impl Into<String>) -> Self {
        self.description_contains = Some(fragment.into());
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.key.starts_with(&self.prefix)
            && self
                .description_contains
                .as_deref()
                .map_or(true, |frag| doc.description.contains(frag))
    }
}

/// The external document store. `set` and `delete` are compare-and-swap on
/// version; `expected_version == 0` on `set` means "create, must be absent".
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Document>, StoreError>;

    /// Matching documents in ascending key order.
    fn list(&self, collection: Collection, query: &KeyQuery) -> Result<Vec<Document>, StoreError>;

    /// Returns the new version.
    fn set(
        &self,
        collection: Collection,
        key: &str,
        description: &str,
        data: Value,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    fn delete(&self, collection: Collection, key: &str, expected_version: u64) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// Validate a raw document against its collection's schema.
pub fn decode<R: Record>(doc: &Document) -> Result<R, RecordError> {
    if !doc.verify() {
        return Err(RecordError::DigestMismatch(doc.key.clone()));
    }
    let record: R = serde_json::from_value(doc.data.clone()).map_err(|e| RecordError::Malformed {
        key: doc.key.clone(),
        reason: e.to_string(),
    })?;
    let expected = record.key();
    if expected != doc.key {
        return Err(RecordError::KeyMismatch { expected, found: doc.key.clone() });
    }
    record
        .validate()
        .map_err(|reason| RecordError::Invalid { key: doc.key.clone(), reason })?;
    Ok(record)
}

pub fn load<R: Record>(
    store: &dyn DocumentStore,
    key: &str,
) -> Result<Option<Result<Versioned<R>, RecordError>>, StoreError> {
    let doc = match store.get(R::COLLECTION, key)? {
        Some(doc) => doc,
        None => return Ok(None),
    };
    Ok(Some(decode::<R>(&doc).map(|record| Versioned { record, version: doc.version })))
}

pub fn save<R: Record>(store: &dyn DocumentStore, record: &R, expected_version: u64) -> Result<u64, StoreError> {
    let key = record.key();
    let data = serde_json::to_value(record).map_err(|e| StoreError::Encode {
        key: key.clone(),
        reason: e.to_string(),
    })?;
    store.set(R::COLLECTION, &key, &record.description(), data, expected_version)
}
