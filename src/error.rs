//! Error taxonomy shared by the fetcher, the cache store and the sync engine.

use thiserror::Error;

/// Failure reported by a remote fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Retryable: timeouts, connection resets, rate limiting, 5xx.
  #[error("transient fetch failure: {0}")]
  Transient(String),
  /// Not retryable: schema violations, rejected credentials.
  #[error("permanent fetch failure: {0}")]
  Permanent(String),
}

/// The cache store rejected a read or a write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(pub String);

impl StorageError {
  pub fn new(msg: impl Into<String>) -> Self {
    Self(msg.into())
  }
}

impl From<rusqlite::Error> for StorageError {
  fn from(e: rusqlite::Error) -> Self {
    Self(e.to_string())
  }
}

/// Reason a sync attempt failed. Cloned to every caller sharing the attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  #[error("transient failure: {0}")]
  Transient(String),
  #[error("permanent failure: {0}")]
  Permanent(String),
  #[error("storage failure: {0}")]
  Storage(String),
  #[error("sync cancelled")]
  Cancelled,
}

impl SyncError {
  /// Whether the scheduler should retry this failure under backoff.
  pub fn is_retryable(&self) -> bool {
    matches!(self, SyncError::Transient(_) | SyncError::Cancelled)
  }
}

impl From<FetchError> for SyncError {
  fn from(e: FetchError) -> Self {
    match e {
      FetchError::Transient(msg) => SyncError::Transient(msg),
      FetchError::Permanent(msg) => SyncError::Permanent(msg),
    }
  }
}

impl From<StorageError> for SyncError {
  fn from(e: StorageError) -> Self {
    SyncError::Storage(e.0)
  }
}

/// A local submission could not be added to the cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
  #[error("a record with key {0} already exists")]
  Duplicate(String),
  #[error(transparent)]
  Storage(#[from] StorageError),
}

/// A local review submission was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReviewError {
  #[error("this review already exists")]
  AlreadyExists,
  #[error("please add a comment and a rating")]
  MissingContentAndRating,
  #[error("please add a comment")]
  MissingContent,
  #[error("the rating must be between 1 and 5")]
  RatingOutOfRange,
  #[error(transparent)]
  Storage(#[from] StorageError),
}

impl From<SubmitError> for ReviewError {
  fn from(e: SubmitError) -> Self {
    match e {
      SubmitError::Duplicate(_) => ReviewError::AlreadyExists,
      SubmitError::Storage(e) => ReviewError::Storage(e),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_retryable_classification() {
    assert!(SyncError::Transient("timeout".into()).is_retryable());
    assert!(SyncError::Cancelled.is_retryable());
    assert!(!SyncError::Permanent("schema".into()).is_retryable());
    assert!(!SyncError::Storage("disk full".into()).is_retryable());
  }

  #[test]
  fn test_fetch_error_maps_to_sync_error() {
    assert_eq!(
      SyncError::from(FetchError::Permanent("401".into())),
      SyncError::Permanent("401".into())
    );
  }
}
