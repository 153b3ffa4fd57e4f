//! Wire schema of the reviews endpoint.
//!
//! Anything that does not match the schema is a permanent failure: retrying
//! the same payload cannot succeed.

use serde::Deserialize;
use std::collections::HashSet;

use super::types::Review;
use crate::error::FetchError;

/// The endpoint may return a bare array or an object wrapping it
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiReviewsResponse {
  List(Vec<ApiReview>),
  Wrapped { reviews: Vec<ApiReview> },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiId {
  Text(String),
  Number(u64),
}

impl ApiId {
  fn into_string(self) -> String {
    match self {
      ApiId::Text(s) => s,
      ApiId::Number(n) => n.to_string(),
    }
  }
}

#[derive(Debug, Deserialize)]
pub struct ApiReview {
  pub id: ApiId,
  pub author: String,
  #[serde(default, alias = "avatarUrl")]
  pub avatar_url: Option<String>,
  #[serde(default)]
  pub content: String,
  pub rating: i64,
}

impl ApiReview {
  fn into_review(self) -> Result<Review, String> {
    let id = self.id.into_string();
    if id.trim().is_empty() {
      return Err("review with empty id".to_string());
    }
    if self.author.trim().is_empty() {
      return Err(format!("review {} has no author", id));
    }
    let rating = u8::try_from(self.rating)
      .ok()
      .filter(|r| (1..=5).contains(r))
      .ok_or_else(|| format!("review {} has rating {} outside 1..=5", id, self.rating))?;

    Ok(Review {
      id,
      author: self.author,
      avatar_url: self.avatar_url.filter(|u| !u.is_empty()),
      content: self.content,
      rating,
    })
  }
}

impl ApiReviewsResponse {
  fn into_items(self) -> Vec<ApiReview> {
    match self {
      ApiReviewsResponse::List(items) => items,
      ApiReviewsResponse::Wrapped { reviews } => reviews,
    }
  }
}

/// Decode and validate a reviews payload.
pub fn parse_reviews(body: &[u8]) -> Result<Vec<Review>, FetchError> {
  let response: ApiReviewsResponse = serde_json::from_slice(body)
    .map_err(|e| FetchError::Permanent(format!("Failed to parse reviews: {}", e)))?;

  let mut seen = HashSet::new();
  let mut reviews = Vec::new();
  for item in response.into_items() {
    let review = item.into_review().map_err(FetchError::Permanent)?;
    if !seen.insert(review.id.clone()) {
      return Err(FetchError::Permanent(format!(
        "duplicate review id {}",
        review.id
      )));
    }
    reviews.push(review);
  }

  Ok(reviews)
}
