//! Restaurant reviews: the records kept in sync with the remote endpoint.

pub mod api_types;
pub mod client;
pub mod stats;
pub mod types;

pub use client::{fetcher_for, FileFetcher, HttpFetcher};
pub use stats::ReviewStats;
pub use types::{local_review_id, NewReview, Review};
