//! Core traits and types for the caching system.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StorageError;

/// Trait for entities that can be cached.
///
/// Implementors provide a stable unique key and a content hash. Two records
/// with the same key and hash are considered identical by the sync engine.
/// A record whose hash cannot be computed is never identical to anything.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Unique identifier, stable across syncs (e.g., review id)
  fn cache_key(&self) -> String;

  /// Hash of the record content. Defaults to SHA-256 over the JSON encoding.
  fn content_hash(&self) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(self)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
  }

  /// Entity type name for storage organization (e.g., "review")
  fn entity_type() -> &'static str;
}

/// Indicates where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
  /// Read back from the cache store
  Cache,
  /// Built from a successful remote fetch
  Fresh,
  /// Built from a local submission
  Local,
}

/// Immutable, ordered view of the cached records at one point in time.
///
/// Record order is display order. A snapshot is never modified after it is
/// built; every change produces a new snapshot.
#[derive(Debug, Clone)]
pub struct CacheSnapshot<T> {
  records: Vec<T>,
  /// Keys of locally submitted records the remote has not returned yet
  pending: BTreeSet<String>,
  last_synced_at: Option<DateTime<Utc>>,
  source: SnapshotSource,
}

impl<T: Cacheable> CacheSnapshot<T> {
  pub fn new(
    records: Vec<T>,
    last_synced_at: Option<DateTime<Utc>>,
    source: SnapshotSource,
  ) -> Self {
    Self {
      records,
      pending: BTreeSet::new(),
      last_synced_at,
      source,
    }
  }

  /// Mark the given keys as pending local submissions.
  pub fn with_pending(mut self, pending: BTreeSet<String>) -> Self {
    self.pending = pending;
    self
  }

  /// Same records, relabelled with a different source.
  pub fn with_source(mut self, source: SnapshotSource) -> Self {
    self.source = source;
    self
  }

  pub fn records(&self) -> &[T] {
    &self.records
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }

  pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
    self.last_synced_at
  }

  pub fn source(&self) -> SnapshotSource {
    self.source
  }

  pub fn pending_keys(&self) -> &BTreeSet<String> {
    &self.pending
  }

  pub fn is_pending(&self, key: &str) -> bool {
    self.pending.contains(key)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.records.iter().any(|r| r.cache_key() == key)
  }

  /// Records that were submitted locally and not yet seen remotely, in display order.
  pub fn pending_records(&self) -> impl Iterator<Item = &T> {
    self
      .records
      .iter()
      .filter(|r| self.pending.contains(&r.cache_key()))
  }

  /// Key -> content hash for every record. Fails if any record cannot be hashed.
  pub fn fingerprint(&self) -> Result<BTreeMap<String, String>, serde_json::Error> {
    self
      .records
      .iter()
      .map(|r| r.content_hash().map(|hash| (r.cache_key(), hash)))
      .collect()
  }

  /// Order-insensitive content comparison: same keys, same hashes, same pending set.
  ///
  /// Unhashable content is treated as changed.
  pub fn same_content(&self, other: &Self) -> bool {
    if self.records.len() != other.records.len() || self.pending != other.pending {
      return false;
    }
    match (self.fingerprint(), other.fingerprint()) {
      (Ok(mine), Ok(theirs)) => mine == theirs,
      _ => false,
    }
  }
}

/// Trait for cache storage backends.
///
/// `write` replaces the persisted snapshot atomically: on error the previous
/// snapshot stays readable and readers never observe a partial write.
pub trait CacheStore<T: Cacheable>: Send + Sync {
  /// Latest persisted snapshot, `None` when nothing was ever written.
  fn read(&self) -> Result<Option<CacheSnapshot<T>>, StorageError>;

  /// Replace the persisted snapshot.
  fn write(&self, snapshot: &CacheSnapshot<T>) -> Result<(), StorageError>;
}
