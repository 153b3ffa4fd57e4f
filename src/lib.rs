//! Periodic review sync with a durable local cache.
//!
//! A [`sync::SyncEngine`] fetches reviews from a [`remote::RemoteFetcher`],
//! merges them into a [`cache::CacheStore`] and publishes immutable snapshots.
//! A [`sync::SchedulerHandle`] runs it on a constraint-gated cadence, and a
//! [`viewmodel::ReviewsViewModel`] exposes the result to a presentation layer.

pub mod app;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod observable;
pub mod remote;
pub mod reviews;
pub mod sync;
pub mod viewmodel;
