use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;

use crate::cache::{CacheStore, SqliteStore};
use crate::config::Config;
use crate::db::Database;
use crate::reviews::{fetcher_for, NewReview, Review, ReviewStats};
use crate::sync::{
  HostEnvironment, RefreshPolicy, SchedulerHandle, SchedulerSignal, SqliteWorkStore, SyncEngine,
  SyncMode, SyncResult, WorkStore,
};
use crate::viewmodel::{ReviewsState, ReviewsViewModel, SyncStatus};

/// Durable name of the recurring review refresh
pub const REFRESH_WORK: &str = "reviews-refresh";

/// Composition root: every component built once and wired by constructor
pub struct App {
  policy: RefreshPolicy,
  engine: SyncEngine<Review>,
  view_model: ReviewsViewModel,
  work_store: Arc<dyn WorkStore>,
  environment: Arc<HostEnvironment>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(config.cache.path.as_deref())?;
    let policy = config.refresh.to_policy();

    let store: Arc<dyn CacheStore<Review>> = Arc::new(SqliteStore::new(db.clone()));
    let fetcher = fetcher_for(&config.remote)?;
    let engine = SyncEngine::new(store, fetcher, policy.min_interval)
      .map_err(|e| eyre!("Failed to load review cache: {}", e))?;

    let environment = Arc::new(HostEnvironment::for_endpoint(&config.remote.url));
    let work_store: Arc<dyn WorkStore> = Arc::new(SqliteWorkStore::new(db));
    let view_model = ReviewsViewModel::new(engine.clone());

    tracing::info!(source = engine.fetcher_label(), "app initialized");

    Ok(Self {
      policy,
      engine,
      view_model,
      work_store,
      environment,
    })
  }

  /// Register the recurring refresh and follow state changes until Ctrl-C.
  pub async fn run(&self) -> Result<()> {
    let scheduler = SchedulerHandle::register(
      REFRESH_WORK,
      self.engine.clone(),
      self.policy.clone(),
      Arc::clone(&self.work_store),
      self.environment.clone(),
    )
    .map_err(|e| eyre!("Failed to register scheduled refresh: {}", e))?;

    if let Some(record) = scheduler.record().ok().flatten() {
      println!(
        "Refreshing every {}s, next run at {}",
        record.period.as_secs(),
        record.next_run_at.format("%Y-%m-%d %H:%M:%S UTC")
      );
    }

    let mut states = self.view_model.subscribe();
    let mut signals = scheduler.signals();
    // Skip the current signal, it predates this run
    signals.next().await;

    loop {
      tokio::select! {
        _ = tokio::signal::ctrl_c() => break,
        state = states.next() => match state {
          Some(state) => print_state_line(&state),
          None => break,
        },
        signal = signals.next() => match signal {
          Some(Some(signal)) => print_signal(&signal),
          Some(None) => {}
          None => break,
        },
      }
    }

    println!("Stopping");
    scheduler.shutdown().await;
    Ok(())
  }

  /// One sync now. Forced syncs ignore the minimum interval; Ctrl-C cancels them.
  pub async fn sync(&self, force: bool) -> Result<()> {
    let result = if force {
      let mut sync = self.view_model.request_forced_sync();
      tokio::select! {
        result = &mut sync => result?,
        _ = tokio::signal::ctrl_c() => {
          self.view_model.cancel_forced_sync();
          sync.await?
        }
      }
    } else {
      self.engine.run_sync(SyncMode::Scheduled).await
    };

    match result {
      SyncResult::Success(snapshot) => {
        println!("Updated: {} reviews", snapshot.len());
        Ok(())
      }
      SyncResult::NoChange => {
        println!("Already up to date");
        Ok(())
      }
      SyncResult::Failure(e) => Err(eyre!("Sync failed: {}", e)),
    }
  }

  pub fn show(&self) {
    let state = self.view_model.state();
    if state.reviews().is_empty() {
      println!("No reviews cached yet. Run `tajsync sync` first.");
      return;
    }

    print_header(&state);
    for review in state.reviews() {
      let pending = state
        .snapshot
        .as_deref()
        .is_some_and(|s| s.is_pending(&review.id));
      println!(
        "{}  {}{}",
        stars(review.rating),
        review.author,
        if pending { "  (not yet published)" } else { "" }
      );
      for line in review.content.lines() {
        println!("       {}", line);
      }
    }
  }

  pub fn stats(&self) {
    let state = self.view_model.state();
    print_header(&state);
    print_stats(&state.stats);
  }

  pub async fn add(&self, review: NewReview) -> Result<()> {
    self
      .view_model
      .add_review(review)
      .await
      .map_err(|e| eyre!("Review not added: {}", e))?;
    println!("Review added");
    Ok(())
  }

  /// Delete the durable refresh registration.
  pub fn unregister(&self) -> Result<()> {
    let removed = self
      .work_store
      .delete(REFRESH_WORK)
      .map_err(|e| eyre!("Failed to unregister scheduled refresh: {}", e))?;
    if removed {
      println!("Scheduled refresh removed");
    } else {
      println!("No scheduled refresh registered");
    }
    Ok(())
  }
}

fn stars(rating: u8) -> String {
  let filled = usize::from(rating.min(5));
  format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn print_header(state: &ReviewsState) {
  let synced = state
    .last_synced_at()
    .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
    .unwrap_or_else(|| "never".to_string());
  println!(
    "{} reviews, average {:.1}, last synced {}",
    state.stats.total, state.stats.average, synced
  );
}

fn print_stats(stats: &ReviewStats) {
  const BAR_WIDTH: f32 = 30.0;
  for stars in (1..=5u8).rev() {
    let share = stats.share(stars);
    let count = stats.star_counts[usize::from(stars) - 1];
    println!(
      "{} {:<30} {}",
      stars,
      "█".repeat((share * BAR_WIDTH).round() as usize),
      count
    );
  }
}

fn print_state_line(state: &ReviewsState) {
  let status = match &state.status {
    SyncStatus::Idle => "idle".to_string(),
    SyncStatus::Syncing => "syncing".to_string(),
    SyncStatus::Failed { error, at } => format!("error at {}: {}", at.format("%H:%M:%S"), error),
  };
  println!(
    "[{}] {} reviews (avg {:.1}), {}",
    chrono::Utc::now().format("%H:%M:%S"),
    state.stats.total,
    state.stats.average,
    status
  );
}

fn print_signal(signal: &SchedulerSignal) {
  match signal {
    SchedulerSignal::Deferred { reason } => println!("Scheduled sync deferred: {}", reason),
    SchedulerSignal::RetryScheduled {
      attempt,
      delay,
      error,
    } => println!(
      "Sync failed ({}), retry {} in {}s",
      error,
      attempt,
      delay.as_secs()
    ),
    SchedulerSignal::RetriesExhausted { attempts, error } => println!(
      "Sync failed {} times ({}), waiting for the next cycle",
      attempts, error
    ),
    SchedulerSignal::Failed(error) => println!("Sync failed: {}", error),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_stars() {
    assert_eq!(stars(3), "★★★☆☆");
    assert_eq!(stars(5), "★★★★★");
    assert_eq!(stars(9), "★★★★★");
  }
}
