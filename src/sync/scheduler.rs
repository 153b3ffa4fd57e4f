//! Recurring, constraint-gated execution of scheduled syncs.
//!
//! A [`SchedulerHandle`] owns one background loop per registered task. The
//! loop waits for the durable record to become due, defers while constraints
//! are unmet, runs a scheduled sync and persists the outcome before acting on
//! it. Scheduling decisions are made by [`plan_next`], a pure function of the
//! record, the sync outcome and the policy.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::engine::{SyncEngine, SyncMode};
use super::environment::{check_constraints, ConstraintCheck, Environment};
use super::policy::RefreshPolicy;
use super::work_store::{after, WorkRecord, WorkStore};
use crate::cache::Cacheable;
use crate::error::{StorageError, SyncError};
use crate::observable::{Observable, Subscription};

/// Something observers of the scheduler should know about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerSignal {
  /// Run postponed until the constraints hold again
  Deferred { reason: &'static str },
  RetryScheduled {
    attempt: u32,
    delay: Duration,
    error: SyncError,
  },
  /// Gave up on this cycle; the next one runs at the normal interval
  RetriesExhausted { attempts: u32, error: SyncError },
  /// Non-retryable failure; the next cycle still runs at the normal interval.
  /// Also raised, as a storage error, while the work record cannot be saved.
  Failed(SyncError),
}

/// Decide what follows an attempt that ended with `failure` (`None` on success or no change).
pub fn plan_next(
  record: &WorkRecord,
  failure: Option<&SyncError>,
  policy: &RefreshPolicy,
  now: DateTime<Utc>,
) -> (WorkRecord, Option<SchedulerSignal>) {
  let mut next = record.clone();

  let Some(error) = failure else {
    next.complete_cycle(now);
    return (next, None);
  };

  if !error.is_retryable() {
    next.complete_cycle(now);
    return (next, Some(SchedulerSignal::Failed(error.clone())));
  }

  let attempt = record.attempt.saturating_add(1);
  if attempt > policy.max_retries {
    next.complete_cycle(now);
    return (
      next,
      Some(SchedulerSignal::RetriesExhausted {
        attempts: attempt,
        error: error.clone(),
      }),
    );
  }

  let delay = policy.backoff(attempt);
  next.attempt = attempt;
  next.next_run_at = after(now, delay);
  (
    next,
    Some(SchedulerSignal::RetryScheduled {
      attempt,
      delay,
      error: error.clone(),
    }),
  )
}

/// Explicitly owned registration of a recurring sync.
///
/// Created by [`SchedulerHandle::register`] at startup. [`shutdown`](Self::shutdown)
/// stops the loop and keeps the durable registration for the next start;
/// [`unregister`](Self::unregister) also deletes it. Dropping the handle stops
/// the loop like `shutdown`.
pub struct SchedulerHandle {
  name: String,
  store: Arc<dyn WorkStore>,
  signals: Arc<Observable<Option<SchedulerSignal>>>,
  shutdown: watch::Sender<bool>,
  task: JoinHandle<()>,
}

impl SchedulerHandle {
  /// Register `name` and start its loop.
  ///
  /// An existing registration is resumed: overdue work runs immediately, a
  /// completed cycle is not repeated, and a changed period is applied.
  pub fn register<T: Cacheable>(
    name: &str,
    engine: SyncEngine<T>,
    policy: RefreshPolicy,
    store: Arc<dyn WorkStore>,
    env: Arc<dyn Environment>,
  ) -> Result<Self, StorageError> {
    let now = Utc::now();
    let record = match store.load(name)? {
      Some(mut existing) => {
        if existing.period != policy.period {
          tracing::info!(
            name = %name,
            old_secs = existing.period.as_secs(),
            new_secs = policy.period.as_secs(),
            "refresh period changed"
          );
          existing.period = policy.period;
          let latest = after(now, policy.period);
          if existing.attempt == 0 && existing.next_run_at > latest {
            existing.next_run_at = latest;
          }
        }
        tracing::info!(
          name = %name,
          cycle = existing.cycle,
          next_run_at = %existing.next_run_at,
          "resuming scheduled work"
        );
        existing
      }
      None => {
        tracing::info!(name = %name, period_secs = policy.period.as_secs(), "registering scheduled work");
        WorkRecord::new(name, policy.period, now)
      }
    };
    store.save(&record)?;

    let signals = Arc::new(Observable::new(None));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(
      Worker {
        engine,
        policy,
        store: Arc::clone(&store),
        env,
        signals: Arc::clone(&signals),
        shutdown: shutdown_rx,
      }
      .run(record),
    );

    Ok(Self {
      name: name.to_string(),
      store,
      signals,
      shutdown: shutdown_tx,
      task,
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Latest scheduler signal, then every later one.
  pub fn signals(&self) -> Subscription<Option<SchedulerSignal>> {
    self.signals.subscribe()
  }

  /// Current durable state of the registration.
  pub fn record(&self) -> Result<Option<WorkRecord>, StorageError> {
    self.store.load(&self.name)
  }

  /// Stop the loop, keeping the registration for the next start.
  pub async fn shutdown(self) {
    self.stop().await;
  }

  /// Stop the loop and delete the registration.
  pub async fn unregister(self) -> Result<(), StorageError> {
    let store = Arc::clone(&self.store);
    let name = self.name.clone();
    self.stop().await;
    if store.delete(&name)? {
      tracing::info!(name = %name, "unregistered scheduled work");
    }
    Ok(())
  }

  async fn stop(self) {
    self.shutdown.send_replace(true);
    if let Err(e) = self.task.await {
      tracing::warn!(name = %self.name, error = %e, "scheduler task ended abnormally");
    }
  }
}

/// Floor for the delay between attempts to save the work record
const MIN_SAVE_RETRY: Duration = Duration::from_millis(50);

struct Worker<T: Cacheable> {
  engine: SyncEngine<T>,
  policy: RefreshPolicy,
  store: Arc<dyn WorkStore>,
  env: Arc<dyn Environment>,
  signals: Arc<Observable<Option<SchedulerSignal>>>,
  shutdown: watch::Receiver<bool>,
}

impl<T: Cacheable> Worker<T> {
  async fn run(mut self, mut record: WorkRecord) {
    loop {
      let wait = (record.next_run_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
      if !self.sleep(wait).await {
        break;
      }

      if let ConstraintCheck::Unmet(reason) =
        check_constraints(self.env.as_ref(), &self.policy.constraints).await
      {
        tracing::debug!(name = %record.name, reason, "constraints unmet, deferring");
        self
          .signals
          .publish(Some(SchedulerSignal::Deferred { reason }));
        if !self.sleep(self.policy.constraint_poll).await {
          break;
        }
        continue;
      }

      if record.is_cycle_completed() {
        record.begin_next_cycle();
        if !self.persist(&record).await {
          break;
        }
      }

      tracing::debug!(name = %record.name, cycle = record.cycle, attempt = record.attempt, "running scheduled sync");
      let result = tokio::select! {
        _ = shutdown_requested(&mut self.shutdown) => break,
        result = self.engine.run_sync(SyncMode::Scheduled) => result,
      };

      let (next, signal) = plan_next(&record, result.error(), &self.policy, Utc::now());
      if !self.persist(&next).await {
        break;
      }
      record = next;

      if let Some(signal) = signal {
        match &signal {
          SchedulerSignal::RetryScheduled { attempt, delay, error } => {
            tracing::warn!(attempt, delay_secs = delay.as_secs_f64(), error = %error, "sync failed, retrying");
          }
          SchedulerSignal::RetriesExhausted { attempts, error } => {
            tracing::warn!(attempts, error = %error, "retries exhausted, waiting for next cycle");
          }
          SchedulerSignal::Failed(error) => {
            tracing::error!(error = %error, "sync failed permanently for this cycle");
          }
          SchedulerSignal::Deferred { .. } => {}
        }
        self.signals.publish(Some(signal));
      }
    }

    tracing::debug!("scheduler loop stopped");
  }

  /// Sleep unless shutdown is requested first. Returns whether to keep going.
  async fn sleep(&mut self, duration: Duration) -> bool {
    tokio::select! {
      _ = shutdown_requested(&mut self.shutdown) => false,
      _ = tokio::time::sleep(duration) => true,
    }
  }

  /// Save `record`, retrying under backoff until it sticks.
  ///
  /// Nothing else happens until then, so a restart never sees an older record
  /// than the loop acted on. Returns false if shutdown came first.
  async fn persist(&mut self, record: &WorkRecord) -> bool {
    let mut failures = 0u32;
    loop {
      let Err(e) = self.save(record).await else {
        return true;
      };

      failures = failures.saturating_add(1);
      let delay = self.policy.backoff(failures).max(MIN_SAVE_RETRY);
      tracing::error!(
        name = %record.name,
        failures,
        retry_in_ms = delay.as_millis() as u64,
        error = %e,
        "failed to persist scheduled work"
      );
      self.signals.publish(Some(SchedulerSignal::Failed(e.into())));
      if !self.sleep(delay).await {
        return false;
      }
    }
  }

  async fn save(&self, record: &WorkRecord) -> Result<(), StorageError> {
    let store = Arc::clone(&self.store);
    let record = record.clone();
    tokio::task::spawn_blocking(move || store.save(&record))
      .await
      .map_err(|e| StorageError::new(format!("work store task failed: {}", e)))?
  }
}

/// Resolves once shutdown is requested or the handle is gone.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
  loop {
    if *rx.borrow_and_update() {
      return;
    }
    if rx.changed().await.is_err() {
      return;
    }
  }
}
