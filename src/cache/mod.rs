//! Durable snapshot cache for synced domain records.
//!
//! This module is domain-agnostic:
//! - Records implement [`Cacheable`] (stable key + content hash)
//! - A [`CacheSnapshot`] is an immutable, ordered view of every cached record
//! - A [`CacheStore`] replaces the whole snapshot atomically or not at all

mod storage;
mod traits;

pub use storage::{MemoryStore, SqliteStore};
pub use traits::{CacheSnapshot, CacheStore, Cacheable, SnapshotSource};
