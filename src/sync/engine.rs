//! Sync engine: fetch, merge and persist remote records with single-flight semantics.
//!
//! At most one sync runs at a time. A trigger arriving while a sync is in
//! flight joins it and receives the same [`SyncResult`] instead of starting a
//! second fetch. Every cache mutation (syncs and local submissions) is
//! serialized by the engine's write lock, so writes become visible in the
//! order they started.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use crate::cache::{CacheSnapshot, CacheStore, Cacheable, SnapshotSource};
use crate::error::{StorageError, SubmitError, SyncError};
use crate::observable::{Observable, Subscription};
use crate::remote::RemoteFetcher;

/// What triggered a sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
  /// Periodic wake-up; skipped while the cache is younger than the minimum interval
  Scheduled,
  /// User request; always fetches and may be cancelled
  Forced,
}

/// Outcome of one sync attempt, shared by every caller that joined it
#[derive(Debug, Clone)]
pub enum SyncResult<T> {
  /// A new snapshot was persisted
  Success(Arc<CacheSnapshot<T>>),
  /// Nothing to do: cache fresh enough, or fetched data identical to the cache
  NoChange,
  Failure(SyncError),
}

impl<T: Cacheable> SyncResult<T> {
  pub fn is_success(&self) -> bool {
    matches!(self, SyncResult::Success(_))
  }

  pub fn error(&self) -> Option<&SyncError> {
    match self {
      SyncResult::Failure(e) => Some(e),
      _ => None,
    }
  }

  pub fn outcome(&self) -> SyncOutcome {
    match self {
      SyncResult::Success(snapshot) => SyncOutcome::Updated {
        records: snapshot.len(),
      },
      SyncResult::NoChange => SyncOutcome::NoChange,
      SyncResult::Failure(e) => SyncOutcome::Failed(e.clone()),
    }
  }
}

/// Data-free summary of a [`SyncResult`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  Updated { records: usize },
  NoChange,
  Failed(SyncError),
}

/// Published after every finished sync, whoever triggered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub mode: SyncMode,
  /// Flight that produced the report. Flights are numbered from 1; a
  /// scheduled run skipped by the minimum interval carries the number of
  /// the last flight started before it.
  pub generation: u64,
  pub outcome: SyncOutcome,
  pub finished_at: DateTime<Utc>,
}

type SharedResult<T> = Shared<BoxFuture<'static, SyncResult<T>>>;

struct Flight<T> {
  generation: u64,
  mode: SyncMode,
  result: SharedResult<T>,
  cancel: watch::Sender<bool>,
}

struct FlightSlot<T> {
  current: Option<Flight<T>>,
  generation: u64,
}

struct Inner<T: Cacheable> {
  store: Arc<dyn CacheStore<T>>,
  fetcher: Arc<dyn RemoteFetcher<T>>,
  min_interval: Duration,
  flight: Mutex<FlightSlot<T>>,
  /// Serializes every cache write
  write_lock: tokio::sync::Mutex<()>,
  /// Last time a fetch confirmed the cache without writing it
  last_verified_at: Mutex<Option<DateTime<Utc>>>,
  snapshot: Observable<Option<Arc<CacheSnapshot<T>>>>,
  reports: Observable<Option<SyncReport>>,
}

/// Orchestrates fetch -> validate -> merge -> persist.
pub struct SyncEngine<T: Cacheable> {
  inner: Arc<Inner<T>>,
}

impl<T: Cacheable> Clone for SyncEngine<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Cacheable> SyncEngine<T> {
  /// Create an engine over `store`, loading the persisted snapshot.
  pub fn new(
    store: Arc<dyn CacheStore<T>>,
    fetcher: Arc<dyn RemoteFetcher<T>>,
    min_interval: Duration,
  ) -> Result<Self, StorageError> {
    let initial = store.read()?.map(Arc::new);

    Ok(Self {
      inner: Arc::new(Inner {
        store,
        fetcher,
        min_interval,
        flight: Mutex::new(FlightSlot {
          current: None,
          generation: 0,
        }),
        write_lock: tokio::sync::Mutex::new(()),
        last_verified_at: Mutex::new(None),
        snapshot: Observable::new(initial),
        reports: Observable::new(None),
      }),
    })
  }

  /// Run a sync, or join the one already in flight.
  pub async fn run_sync(&self, mode: SyncMode) -> SyncResult<T> {
    // Read before the join check so a flight started later is never claimed
    let started_before = self.last_generation();
    if let Some(in_flight) = self.in_flight() {
      tracing::debug!(?mode, "joining in-flight sync");
      return in_flight.await;
    }

    if mode == SyncMode::Scheduled {
      let previous = match self.read_store().await {
        Ok(previous) => previous,
        Err(e) => {
          let result = SyncResult::Failure(e.into());
          self.publish_report(mode, started_before, &result);
          return result;
        }
      };
      if self.is_fresh(previous.as_ref(), Utc::now()) {
        tracing::debug!("cache younger than minimum interval, skipping fetch");
        let result = SyncResult::NoChange;
        self.publish_report(mode, started_before, &result);
        return result;
      }
    }

    let (_, result) = self.join_or_start(mode);
    result.await
  }

  /// Start a forced sync, or join the one in flight, without waiting for it.
  ///
  /// Returns the generation of the flight the caller is attached to, matching
  /// [`SyncReport::generation`] of its report. Must be called within a runtime.
  pub fn begin_forced(&self) -> (u64, impl Future<Output = SyncResult<T>> + Send + 'static) {
    self.join_or_start(SyncMode::Forced)
  }

  /// Cancel the in-flight sync if a forced request started it.
  ///
  /// Only the fetch is aborted; once records are fetched the write always
  /// completes. Returns whether a cancellation was sent.
  pub fn cancel_forced(&self) -> bool {
    let slot = self.lock_slot();
    match &slot.current {
      Some(flight) if flight.mode == SyncMode::Forced => {
        tracing::info!("cancelling forced sync");
        flight.cancel.send_replace(true);
        true
      }
      _ => false,
    }
  }

  pub fn is_syncing(&self) -> bool {
    self.lock_slot().current.is_some()
  }

  /// Add a record submitted locally at the top of the display order.
  ///
  /// The record stays pending, and survives later syncs, until the remote
  /// returns a record with the same key.
  pub async fn submit_local(&self, record: T) -> Result<Arc<CacheSnapshot<T>>, SubmitError> {
    let _write = self.inner.write_lock.lock().await;

    let current = self.read_store().await?;
    let key = record.cache_key();
    if current.as_ref().is_some_and(|c| c.contains_key(&key)) {
      return Err(SubmitError::Duplicate(key));
    }

    let (mut records, mut pending, last_synced_at) = current
      .map(|c| {
        (
          c.records().to_vec(),
          c.pending_keys().clone(),
          c.last_synced_at(),
        )
      })
      .unwrap_or_default();
    records.insert(0, record);
    pending.insert(key.clone());

    let snapshot =
      CacheSnapshot::new(records, last_synced_at, SnapshotSource::Local).with_pending(pending);
    self.write_store(snapshot.clone()).await?;

    tracing::info!(key = %key, "stored local submission");
    let snapshot = Arc::new(snapshot);
    self.inner.snapshot.publish(Some(Arc::clone(&snapshot)));
    Ok(snapshot)
  }

  /// Latest persisted snapshot.
  pub fn current(&self) -> Option<Arc<CacheSnapshot<T>>> {
    self.inner.snapshot.current()
  }

  pub fn snapshots(&self) -> Subscription<Option<Arc<CacheSnapshot<T>>>> {
    self.inner.snapshot.subscribe()
  }

  pub fn reports(&self) -> Subscription<Option<SyncReport>> {
    self.inner.reports.subscribe()
  }

  pub fn fetcher_label(&self) -> &str {
    self.inner.fetcher.label()
  }

  fn lock_slot(&self) -> MutexGuard<'_, FlightSlot<T>> {
    // The slot holds no invariant a panicking holder could break
    self
      .inner
      .flight
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn in_flight(&self) -> Option<SharedResult<T>> {
    self
      .lock_slot()
      .current
      .as_ref()
      .map(|flight| flight.result.clone())
  }

  fn last_generation(&self) -> u64 {
    self.lock_slot().generation
  }

  fn join_or_start(&self, mode: SyncMode) -> (u64, SharedResult<T>) {
    let mut slot = self.lock_slot();
    if let Some(flight) = &slot.current {
      tracing::debug!(?mode, generation = flight.generation, "joining in-flight sync");
      return (flight.generation, flight.result.clone());
    }

    slot.generation += 1;
    let generation = slot.generation;
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let engine = self.clone();
    let handle = tokio::spawn(async move {
      let result = {
        let _release = FlightRelease {
          engine: engine.clone(),
          generation,
        };
        AssertUnwindSafe(engine.execute(mode, cancel_rx))
          .catch_unwind()
          .await
          .unwrap_or_else(|_| {
            tracing::error!(?mode, generation, "sync panicked");
            SyncResult::Failure(SyncError::Transient("sync panicked".to_string()))
          })
      };
      engine.publish_report(mode, generation, &result);
      result
    });

    // Reached only if the task was aborted before reporting, e.g. at runtime shutdown
    let reporter = self.clone();
    let result = async move {
      handle.await.unwrap_or_else(|e| {
        let result = SyncResult::Failure(SyncError::Transient(format!("sync task failed: {}", e)));
        reporter.publish_report(mode, generation, &result);
        result
      })
    }
    .boxed()
    .shared();

    tracing::debug!(?mode, generation, "starting sync");
    slot.current = Some(Flight {
      generation,
      mode,
      result: result.clone(),
      cancel: cancel_tx,
    });
    (generation, result)
  }

  async fn execute(&self, mode: SyncMode, mut cancel: watch::Receiver<bool>) -> SyncResult<T> {
    let fetched = tokio::select! {
      biased;
      _ = cancelled(&mut cancel) => {
        return SyncResult::Failure(SyncError::Cancelled);
      }
      fetched = self.inner.fetcher.fetch_all() => fetched,
    };

    let fetched = match fetched {
      Ok(records) => records,
      Err(e) => {
        tracing::warn!(source = self.inner.fetcher.label(), error = %e, "fetch failed");
        return SyncResult::Failure(e.into());
      }
    };

    if let Some(key) = first_duplicate_key(&fetched) {
      return SyncResult::Failure(SyncError::Permanent(format!(
        "duplicate record key {} in fetched data",
        key
      )));
    }

    let fetched_at = Utc::now();

    // Everything past this point runs to completion, cancelled or not
    let _write = self.inner.write_lock.lock().await;

    let previous = match self.read_store().await {
      Ok(previous) => previous,
      Err(e) => return SyncResult::Failure(e.into()),
    };

    let merged = merge(previous.as_ref(), fetched, fetched_at);

    if previous
      .as_ref()
      .is_some_and(|previous| previous.same_content(&merged))
    {
      tracing::info!(?mode, records = merged.len(), "remote data unchanged");
      self.mark_verified(fetched_at);
      return SyncResult::NoChange;
    }

    if let Err(e) = self.write_store(merged.clone()).await {
      tracing::error!(error = %e, "failed to persist snapshot");
      return SyncResult::Failure(e.into());
    }

    tracing::info!(?mode, records = merged.len(), "snapshot updated");
    self.mark_verified(fetched_at);
    let snapshot = Arc::new(merged);
    self.inner.snapshot.publish(Some(Arc::clone(&snapshot)));
    SyncResult::Success(snapshot)
  }

  /// Whether the cache was synced or verified within the minimum interval.
  fn is_fresh(&self, previous: Option<&CacheSnapshot<T>>, now: DateTime<Utc>) -> bool {
    let verified = *self
      .inner
      .last_verified_at
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    let last = previous.and_then(|p| p.last_synced_at()).max(verified);

    match (last, chrono::Duration::from_std(self.inner.min_interval)) {
      (Some(last), Ok(min_interval)) => now - last < min_interval,
      _ => false,
    }
  }

  fn mark_verified(&self, at: DateTime<Utc>) {
    let mut verified = self
      .inner
      .last_verified_at
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *verified = Some(at);
  }

  fn release(&self, generation: u64) {
    let mut slot = self.lock_slot();
    if slot
      .current
      .as_ref()
      .is_some_and(|flight| flight.generation == generation)
    {
      slot.current = None;
    }
  }

  fn publish_report(&self, mode: SyncMode, generation: u64, result: &SyncResult<T>) {
    self.inner.reports.publish(Some(SyncReport {
      mode,
      generation,
      outcome: result.outcome(),
      finished_at: Utc::now(),
    }));
  }

  async fn read_store(&self) -> Result<Option<CacheSnapshot<T>>, StorageError> {
    let store = Arc::clone(&self.inner.store);
    tokio::task::spawn_blocking(move || store.read())
      .await
      .map_err(|e| StorageError::new(format!("cache read task failed: {}", e)))?
  }

  async fn write_store(&self, snapshot: CacheSnapshot<T>) -> Result<(), StorageError> {
    let store = Arc::clone(&self.inner.store);
    tokio::task::spawn_blocking(move || store.write(&snapshot))
      .await
      .map_err(|e| StorageError::new(format!("cache write task failed: {}", e)))?
  }
}

/// Clears the flight slot when the sync task ends, even by panic.
struct FlightRelease<T: Cacheable> {
  engine: SyncEngine<T>,
  generation: u64,
}

impl<T: Cacheable> Drop for FlightRelease<T> {
  fn drop(&mut self) {
    self.engine.release(self.generation);
  }
}

/// Resolves once cancellation is requested; never if the sender goes away.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
  loop {
    if *rx.borrow_and_update() {
      return;
    }
    if rx.changed().await.is_err() {
      std::future::pending::<()>().await;
    }
  }
}

fn first_duplicate_key<T: Cacheable>(records: &[T]) -> Option<String> {
  let mut seen = HashSet::new();
  records
    .iter()
    .map(Cacheable::cache_key)
    .find(|key| !seen.insert(key.clone()))
}

/// Fetched records in fetch order, preceded by pending local records the
/// remote does not know yet.
fn merge<T: Cacheable>(
  previous: Option<&CacheSnapshot<T>>,
  fetched: Vec<T>,
  fetched_at: DateTime<Utc>,
) -> CacheSnapshot<T> {
  let fetched_keys: HashSet<String> = fetched.iter().map(Cacheable::cache_key).collect();

  let carried: Vec<T> = previous
    .map(|p| {
      p.pending_records()
        .filter(|r| !fetched_keys.contains(&r.cache_key()))
        .cloned()
        .collect()
    })
    .unwrap_or_default();
  let pending: BTreeSet<String> = carried.iter().map(Cacheable::cache_key).collect();

  let mut records = carried;
  records.extend(fetched);

  CacheSnapshot::new(records, Some(fetched_at), SnapshotSource::Fresh).with_pending(pending)
}
