//! Remote data source boundary.

use async_trait::async_trait;

use crate::error::FetchError;

/// Produces a full snapshot of domain records from a remote source.
///
/// Implementations only return data: they must be idempotent and must not
/// touch the cache. Persistence is the sync engine's job.
#[async_trait]
pub trait RemoteFetcher<T>: Send + Sync {
  /// Human-readable label identifying this source (used in logs).
  fn label(&self) -> &str;

  /// Fetch every record currently published by the source.
  async fn fetch_all(&self) -> Result<Vec<T>, FetchError>;
}
