//! Presentation state for the reviews screen.
//!
//! [`ReviewsViewModel`] republishes every snapshot and sync report of the
//! engine as an immutable [`ReviewsState`]. The presentation layer only
//! subscribes and renders; it never touches the cache or the network itself.
//!
//! # Example
//!
//! ```ignore
//! let view_model = ReviewsViewModel::new(engine);
//! let mut states = view_model.subscribe();
//!
//! view_model.request_forced_sync();
//!
//! while let Some(state) = states.next().await {
//!     match &state.status {
//!         SyncStatus::Syncing => render_spinner(),
//!         SyncStatus::Failed { error, .. } => render_error(error),
//!         SyncStatus::Idle => {}
//!     }
//!     render_reviews(state.reviews(), &state.stats);
//! }
//! ```

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::cache::CacheSnapshot;
use crate::error::{ReviewError, SyncError};
use crate::observable::{Observable, Subscription};
use crate::reviews::{NewReview, Review, ReviewStats};
use crate::sync::{SyncEngine, SyncOutcome, SyncReport, SyncResult};

/// What the sync machinery is doing, as far as the user cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
  Idle,
  /// A user-requested sync is running
  Syncing,
  /// The last sync failed; the previous snapshot is still shown
  Failed {
    error: SyncError,
    at: DateTime<Utc>,
  },
}

impl SyncStatus {
  pub fn is_syncing(&self) -> bool {
    matches!(self, SyncStatus::Syncing)
  }

  pub fn error(&self) -> Option<&SyncError> {
    match self {
      SyncStatus::Failed { error, .. } => Some(error),
      _ => None,
    }
  }
}

/// Immutable state published to the presentation layer
#[derive(Debug, Clone)]
pub struct ReviewsState {
  pub snapshot: Option<Arc<CacheSnapshot<Review>>>,
  pub stats: ReviewStats,
  pub status: SyncStatus,
  /// Newest flight a forced request is attached to
  awaited_generation: u64,
  /// Newest flight whose report was applied
  reported_generation: u64,
}

impl ReviewsState {
  fn new(snapshot: Option<Arc<CacheSnapshot<Review>>>, status: SyncStatus) -> Self {
    let stats = snapshot
      .as_deref()
      .map(|s| ReviewStats::from_reviews(s.records()))
      .unwrap_or_default();
    Self {
      snapshot,
      stats,
      status,
      awaited_generation: 0,
      reported_generation: 0,
    }
  }

  /// Reviews in display order; empty before the first sync.
  pub fn reviews(&self) -> &[Review] {
    self.snapshot.as_deref().map(|s| s.records()).unwrap_or(&[])
  }

  pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
    self.snapshot.as_deref().and_then(|s| s.last_synced_at())
  }

  fn with_snapshot(&self, snapshot: Option<Arc<CacheSnapshot<Review>>>) -> Self {
    Self {
      awaited_generation: self.awaited_generation,
      reported_generation: self.reported_generation,
      ..Self::new(snapshot, self.status.clone())
    }
  }

  /// A forced request attached to flight `generation`.
  fn with_forced_request(&self, generation: u64) -> Self {
    let mut next = self.clone();
    next.awaited_generation = next.awaited_generation.max(generation);
    // Its report may already have been applied
    if next.reported_generation < generation {
      next.status = SyncStatus::Syncing;
    }
    next
  }

  fn with_report(&self, report: &SyncReport) -> Self {
    let mut next = self.clone();
    next.reported_generation = next.reported_generation.max(report.generation);
    // An older flight says nothing about the forced sync still running
    if report.generation >= next.awaited_generation {
      next.status = status_after(report);
    }
    next
  }
}

/// Reviews screen model: observable state plus the user's actions.
pub struct ReviewsViewModel {
  engine: SyncEngine<Review>,
  state: Arc<Observable<ReviewsState>>,
  republish: JoinHandle<()>,
}

impl ReviewsViewModel {
  /// Must be called inside a tokio runtime.
  pub fn new(engine: SyncEngine<Review>) -> Self {
    let state = Arc::new(Observable::new(ReviewsState::new(
      engine.current(),
      SyncStatus::Idle,
    )));

    let republish = tokio::spawn(republish(
      engine.snapshots(),
      engine.reports(),
      Arc::clone(&state),
    ));

    Self {
      engine,
      state,
      republish,
    }
  }

  /// Current state first, then every later one.
  pub fn subscribe(&self) -> Subscription<ReviewsState> {
    self.state.subscribe()
  }

  pub fn state(&self) -> ReviewsState {
    self.state.current()
  }

  /// Start a user-requested sync, bypassing the minimum interval.
  ///
  /// The returned handle resolves to the shared result; dropping it does not
  /// stop the sync. Use [`cancel_forced_sync`](Self::cancel_forced_sync) for that.
  pub fn request_forced_sync(&self) -> JoinHandle<SyncResult<Review>> {
    let (generation, result) = self.engine.begin_forced();
    self
      .state
      .replace_with(|state| state.with_forced_request(generation));
    tokio::spawn(result)
  }

  /// Abort the fetch of a running forced sync. The cache is left untouched.
  pub fn cancel_forced_sync(&self) -> bool {
    self.engine.cancel_forced()
  }

  /// Add a review written by the user at the top of the list.
  pub async fn add_review(&self, review: NewReview) -> Result<(), ReviewError> {
    let id = review.id();
    if self
      .engine
      .current()
      .is_some_and(|snapshot| snapshot.contains_key(&id))
    {
      return Err(ReviewError::AlreadyExists);
    }

    let review = review.into_review()?;
    let snapshot = self.engine.submit_local(review).await?;
    self
      .state
      .replace_with(|state| state.with_snapshot(Some(snapshot)));
    tracing::info!(id = %id, "review added");
    Ok(())
  }
}

impl Drop for ReviewsViewModel {
  fn drop(&mut self) {
    self.republish.abort();
  }
}

async fn republish(
  mut snapshots: Subscription<Option<Arc<CacheSnapshot<Review>>>>,
  mut reports: Subscription<Option<SyncReport>>,
  state: Arc<Observable<ReviewsState>>,
) {
  // Both already reflected in the initial state
  snapshots.next().await;
  reports.next().await;

  loop {
    tokio::select! {
      snapshot = snapshots.next() => match snapshot {
        Some(snapshot) => state.replace_with(|current| current.with_snapshot(snapshot)),
        None => break,
      },
      report = reports.next() => match report {
        Some(Some(report)) => state.replace_with(|current| current.with_report(&report)),
        Some(None) => {}
        None => break,
      },
    }
  }
}

fn status_after(report: &SyncReport) -> SyncStatus {
  match &report.outcome {
    // Abandoned by the user, nothing to report
    SyncOutcome::Failed(SyncError::Cancelled) => SyncStatus::Idle,
    SyncOutcome::Failed(error) => SyncStatus::Failed {
      error: error.clone(),
      at: report.finished_at,
    },
    SyncOutcome::Updated { .. } | SyncOutcome::NoChange => SyncStatus::Idle,
  }
}
