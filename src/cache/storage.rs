//! Cache store implementations: SQLite for durability, memory for tests.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::sync::RwLock;

use super::traits::{CacheSnapshot, CacheStore, Cacheable, SnapshotSource};
use crate::db::{parse_datetime, Database};
use crate::error::StorageError;

/// SQLite-based snapshot store.
///
/// One snapshot per entity type. A write deletes and re-inserts every record
/// inside a single transaction, so readers see the old or the new snapshot.
pub struct SqliteStore<T> {
  db: Database,
  _entity: PhantomData<fn() -> T>,
}

impl<T: Cacheable> SqliteStore<T> {
  pub fn new(db: Database) -> Self {
    Self {
      db,
      _entity: PhantomData,
    }
  }
}

impl<T: Cacheable> CacheStore<T> for SqliteStore<T> {
  fn read(&self) -> Result<Option<CacheSnapshot<T>>, StorageError> {
    let conn = self.db.lock()?;
    let entity_type = T::entity_type();

    let meta: Option<Option<String>> = conn
      .query_row(
        "SELECT last_synced_at FROM snapshot_meta WHERE entity_type = ?",
        params![entity_type],
        |row| row.get(0),
      )
      .optional()?;

    let last_synced_at = match meta {
      Some(raw) => raw.as_deref().map(parse_datetime).transpose()?,
      None => return Ok(None),
    };

    let mut stmt = conn.prepare(
      "SELECT record_key, pending, data FROM snapshot_records
       WHERE entity_type = ?
       ORDER BY position",
    )?;

    let rows = stmt
      .query_map(params![entity_type], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, bool>(1)?,
          row.get::<_, Vec<u8>>(2)?,
        ))
      })?
      .collect::<Result<Vec<_>, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    let mut pending = BTreeSet::new();
    for (key, is_pending, data) in rows {
      let record: T = serde_json::from_slice(&data)
        .map_err(|e| StorageError::new(format!("Failed to deserialize record {}: {}", key, e)))?;
      if is_pending {
        pending.insert(key);
      }
      records.push(record);
    }

    Ok(Some(
      CacheSnapshot::new(records, last_synced_at, SnapshotSource::Cache).with_pending(pending),
    ))
  }

  fn write(&self, snapshot: &CacheSnapshot<T>) -> Result<(), StorageError> {
    let mut conn = self.db.lock()?;
    let entity_type = T::entity_type();

    // Dropping the transaction without commit rolls everything back
    let tx = conn.transaction()?;

    tx.execute(
      "DELETE FROM snapshot_records WHERE entity_type = ?",
      params![entity_type],
    )?;

    {
      let mut insert = tx.prepare(
        "INSERT INTO snapshot_records (entity_type, record_key, position, content_hash, pending, data)
         VALUES (?, ?, ?, ?, ?, ?)",
      )?;

      for (position, record) in snapshot.records().iter().enumerate() {
        let key = record.cache_key();
        let data = serde_json::to_vec(record)
          .map_err(|e| StorageError::new(format!("Failed to serialize record {}: {}", key, e)))?;
        let hash = record
          .content_hash()
          .map_err(|e| StorageError::new(format!("Failed to hash record {}: {}", key, e)))?;
        insert.execute(params![
          entity_type,
          key,
          position as i64,
          hash,
          snapshot.is_pending(&key),
          data
        ])?;
      }
    }

    tx.execute(
      "INSERT OR REPLACE INTO snapshot_meta (entity_type, last_synced_at, record_count, written_at)
       VALUES (?, ?, ?, ?)",
      params![
        entity_type,
        snapshot.last_synced_at().map(|t| t.to_rfc3339()),
        snapshot.len() as i64,
        Utc::now().to_rfc3339()
      ],
    )?;

    tx.commit()?;
    Ok(())
  }
}

/// In-memory snapshot store. Nothing survives the process.
pub struct MemoryStore<T> {
  snapshot: RwLock<Option<CacheSnapshot<T>>>,
}

impl<T: Cacheable> MemoryStore<T> {
  pub fn new() -> Self {
    Self {
      snapshot: RwLock::new(None),
    }
  }

  /// Start with an existing snapshot, as if it had been written earlier.
  pub fn with_snapshot(snapshot: CacheSnapshot<T>) -> Self {
    Self {
      snapshot: RwLock::new(Some(snapshot)),
    }
  }
}

impl<T: Cacheable> Default for MemoryStore<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Cacheable> CacheStore<T> for MemoryStore<T> {
  fn read(&self) -> Result<Option<CacheSnapshot<T>>, StorageError> {
    let guard = self
      .snapshot
      .read()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;
    Ok(
      guard
        .as_ref()
        .map(|s| s.clone().with_source(SnapshotSource::Cache)),
    )
  }

  fn write(&self, snapshot: &CacheSnapshot<T>) -> Result<(), StorageError> {
    let mut guard = self
      .snapshot
      .write()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))?;
    *guard = Some(snapshot.clone());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde::{Deserialize, Serialize};

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Dish {
    id: String,
    name: String,
  }

  impl Cacheable for Dish {
    fn cache_key(&self) -> String {
      self.id.clone()
    }

    fn entity_type() -> &'static str {
      "dish"
    }
  }

  fn dish(id: &str, name: &str) -> Dish {
    Dish {
      id: id.to_string(),
      name: name.to_string(),
    }
  }

  #[test]
  fn test_sqlite_empty_read() {
    let db = Database::open_in_memory().unwrap();
    let store: SqliteStore<Dish> = SqliteStore::new(db);
    assert!(store.read().unwrap().is_none());
  }

  #[test]
  fn test_sqlite_write_replaces_and_preserves_order() {
    let db = Database::open_in_memory().unwrap();
    let store = SqliteStore::new(db);
    let synced = Utc::now();

    let first = CacheSnapshot::new(
      vec![dish("b", "Biryani"), dish("a", "Aloo gobi"), dish("c", "Chana")],
      Some(synced),
      SnapshotSource::Fresh,
    );
    store.write(&first).unwrap();

    let second = CacheSnapshot::new(
      vec![dish("d", "Dal"), dish("b", "Biryani")],
      Some(synced),
      SnapshotSource::Fresh,
    )
    .with_pending(BTreeSet::from(["d".to_string()]));
    store.write(&second).unwrap();

    let read = store.read().unwrap().unwrap();
    assert_eq!(read.source(), SnapshotSource::Cache);
    assert_eq!(read.records(), &[dish("d", "Dal"), dish("b", "Biryani")]);
    assert!(read.is_pending("d"));
    assert!(!read.is_pending("b"));
    assert_eq!(
      read.last_synced_at().map(|t| t.timestamp_millis()),
      Some(synced.timestamp_millis())
    );
  }

  #[test]
  fn test_sqlite_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    {
      let store = SqliteStore::new(Database::open(Some(&path)).unwrap());
      let snapshot = CacheSnapshot::new(vec![dish("a", "Aloo")], None, SnapshotSource::Local);
      store.write(&snapshot).unwrap();
    }

    let store: SqliteStore<Dish> = SqliteStore::new(Database::open(Some(&path)).unwrap());
    let read = store.read().unwrap().unwrap();
    assert_eq!(read.records(), &[dish("a", "Aloo")]);
    assert!(read.last_synced_at().is_none());
  }

  #[test]
  fn test_sqlite_failed_write_keeps_previous_snapshot() {
    let db = Database::open_in_memory().unwrap();
    let store = SqliteStore::new(db.clone());
    let original = CacheSnapshot::new(vec![dish("a", "Aloo")], None, SnapshotSource::Fresh);
    store.write(&original).unwrap();

    // Duplicate keys violate the primary key halfway through the insert loop
    let broken = CacheSnapshot::new(
      vec![dish("x", "Xacuti"), dish("x", "Xacuti")],
      None,
      SnapshotSource::Fresh,
    );
    assert!(store.write(&broken).is_err());

    let read = store.read().unwrap().unwrap();
    assert_eq!(read.records(), &[dish("a", "Aloo")]);
  }

  #[test]
  fn test_memory_store_roundtrip() {
    let store = MemoryStore::new();
    assert!(store.read().unwrap().is_none());
    store
      .write(&CacheSnapshot::new(vec![dish("a", "Aloo")], None, SnapshotSource::Fresh))
      .unwrap();
    let read = store.read().unwrap().unwrap();
    assert_eq!(read.source(), SnapshotSource::Cache);
    assert_eq!(read.len(), 1);
  }
}
