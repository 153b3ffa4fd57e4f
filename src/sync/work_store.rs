//! Durable registry of recurring work.
//!
//! A [`WorkRecord`] survives process restarts so a scheduler can resume where
//! it left off: overdue work runs right away, and a cycle already marked
//! complete is never executed a second time.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::db::{parse_datetime, Database};
use crate::error::StorageError;

/// Persistent state of one registered recurring task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkRecord {
  pub name: String,
  pub period: Duration,
  /// When the next attempt (first run of a cycle, or a retry) is due
  pub next_run_at: DateTime<Utc>,
  /// Failed attempts in the current cycle
  pub attempt: u32,
  /// Logical trigger number, starting at 1
  pub cycle: u64,
  pub last_completed_cycle: Option<u64>,
}

impl WorkRecord {
  /// Fresh registration, due immediately.
  pub fn new(name: impl Into<String>, period: Duration, now: DateTime<Utc>) -> Self {
    Self {
      name: name.into(),
      period,
      next_run_at: now,
      attempt: 0,
      cycle: 1,
      last_completed_cycle: None,
    }
  }

  pub fn is_due(&self, now: DateTime<Utc>) -> bool {
    self.next_run_at <= now
  }

  pub fn is_cycle_completed(&self) -> bool {
    self.last_completed_cycle == Some(self.cycle)
  }

  /// Open the cycle after a completed one.
  pub fn begin_next_cycle(&mut self) {
    if self.is_cycle_completed() {
      self.cycle += 1;
      self.attempt = 0;
    }
  }

  /// Mark the current cycle done and schedule the next one a period from `now`.
  pub fn complete_cycle(&mut self, now: DateTime<Utc>) {
    self.last_completed_cycle = Some(self.cycle);
    self.attempt = 0;
    self.next_run_at = after(now, self.period);
  }
}

/// `now + delay`, saturating far in the future on overflow.
pub(crate) fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(delay)
    .ok()
    .and_then(|delay| now.checked_add_signed(delay))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Storage for [`WorkRecord`]s, keyed by name.
pub trait WorkStore: Send + Sync {
  fn load(&self, name: &str) -> Result<Option<WorkRecord>, StorageError>;

  /// Insert or replace the record, in one atomic write.
  fn save(&self, record: &WorkRecord) -> Result<(), StorageError>;

  /// Remove the record. Returns whether one existed.
  fn delete(&self, name: &str) -> Result<bool, StorageError>;
}

/// Work registry in the `scheduled_work` table
pub struct SqliteWorkStore {
  db: Database,
}

impl SqliteWorkStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl WorkStore for SqliteWorkStore {
  fn load(&self, name: &str) -> Result<Option<WorkRecord>, StorageError> {
    let conn = self.db.lock()?;

    let row = conn
      .query_row(
        "SELECT period_secs, next_run_at, attempt, cycle, last_completed_cycle
         FROM scheduled_work WHERE name = ?",
        params![name],
        |row| {
          Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, Option<i64>>(4)?,
          ))
        },
      )
      .optional()?;

    let Some((period_secs, next_run_at, attempt, cycle, last_completed_cycle)) = row else {
      return Ok(None);
    };

    Ok(Some(WorkRecord {
      name: name.to_string(),
      period: Duration::from_secs(period_secs.max(0) as u64),
      next_run_at: parse_datetime(&next_run_at)?,
      attempt: attempt.clamp(0, u32::MAX as i64) as u32,
      cycle: cycle.max(1) as u64,
      last_completed_cycle: last_completed_cycle.map(|c| c.max(0) as u64),
    }))
  }

  fn save(&self, record: &WorkRecord) -> Result<(), StorageError> {
    let conn = self.db.lock()?;
    conn.execute(
      "INSERT INTO scheduled_work (name, period_secs, next_run_at, attempt, cycle, last_completed_cycle)
       VALUES (?, ?, ?, ?, ?, ?)
       ON CONFLICT(name) DO UPDATE SET
         period_secs = excluded.period_secs,
         next_run_at = excluded.next_run_at,
         attempt = excluded.attempt,
         cycle = excluded.cycle,
         last_completed_cycle = excluded.last_completed_cycle",
      params![
        record.name,
        record.period.as_secs() as i64,
        record.next_run_at.to_rfc3339(),
        record.attempt as i64,
        record.cycle as i64,
        record.last_completed_cycle.map(|c| c as i64),
      ],
    )?;
    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool, StorageError> {
    let conn = self.db.lock()?;
    let removed = conn.execute("DELETE FROM scheduled_work WHERE name = ?", params![name])?;
    Ok(removed > 0)
  }
}

/// Non-durable registry for tests and ephemeral runs
#[derive(Default)]
pub struct MemoryWorkStore {
  records: Mutex<HashMap<String, WorkRecord>>,
}

impl MemoryWorkStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn records(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, WorkRecord>>, StorageError> {
    self
      .records
      .lock()
      .map_err(|e| StorageError::new(format!("Lock poisoned: {}", e)))
  }
}

impl WorkStore for MemoryWorkStore {
  fn load(&self, name: &str) -> Result<Option<WorkRecord>, StorageError> {
    Ok(self.records()?.get(name).cloned())
  }

  fn save(&self, record: &WorkRecord) -> Result<(), StorageError> {
    self
      .records()?
      .insert(record.name.clone(), record.clone());
    Ok(())
  }

  fn delete(&self, name: &str) -> Result<bool, StorageError> {
    Ok(self.records()?.remove(name).is_some())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{SubsecRound, TimeZone};

  fn sample(now: DateTime<Utc>) -> WorkRecord {
    WorkRecord {
      name: "reviews-refresh".to_string(),
      period: Duration::from_secs(3600),
      next_run_at: now,
      attempt: 2,
      cycle: 7,
      last_completed_cycle: Some(6),
    }
  }

  #[test]
  fn test_cycle_bookkeeping() {
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut record = WorkRecord::new("refresh", Duration::from_secs(60), now);
    assert!(record.is_due(now));
    assert!(!record.is_cycle_completed());

    record.attempt = 3;
    record.complete_cycle(now);
    assert!(record.is_cycle_completed());
    assert_eq!(record.attempt, 0);
    assert_eq!(record.next_run_at, now + chrono::Duration::seconds(60));
    assert!(!record.is_due(now));

    record.begin_next_cycle();
    assert_eq!(record.cycle, 2);
    assert!(!record.is_cycle_completed());

    // Only a completed cycle advances
    record.begin_next_cycle();
    assert_eq!(record.cycle, 2);
  }

  #[test]
  fn test_after_saturates() {
    let now = Utc::now();
    assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
  }

  #[test]
  fn test_sqlite_round_trip_and_delete() {
    let db = Database::open_in_memory().unwrap();
    let store = SqliteWorkStore::new(db);
    let record = sample(Utc::now().trunc_subsecs(0));

    assert_eq!(store.load("reviews-refresh").unwrap(), None);
    store.save(&record).unwrap();
    assert_eq!(store.load("reviews-refresh").unwrap(), Some(record.clone()));

    let mut updated = record.clone();
    updated.complete_cycle(record.next_run_at);
    store.save(&updated).unwrap();
    assert_eq!(store.load("reviews-refresh").unwrap(), Some(updated));

    assert!(store.delete("reviews-refresh").unwrap());
    assert!(!store.delete("reviews-refresh").unwrap());
    assert_eq!(store.load("reviews-refresh").unwrap(), None);
  }

  #[test]
  fn test_sqlite_record_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("work.db");
    let record = sample(Utc::now().trunc_subsecs(0));

    {
      let store = SqliteWorkStore::new(Database::open(Some(&path)).unwrap());
      store.save(&record).unwrap();
    }

    let store = SqliteWorkStore::new(Database::open(Some(&path)).unwrap());
    assert_eq!(store.load("reviews-refresh").unwrap(), Some(record));
  }

  #[test]
  fn test_memory_store() {
    let store = MemoryWorkStore::new();
    let record = sample(Utc::now());
    store.save(&record).unwrap();
    assert_eq!(store.load("reviews-refresh").unwrap(), Some(record));
    assert!(store.delete("reviews-refresh").unwrap());
  }
}
