use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cache::Cacheable;
use crate::error::ReviewError;

/// A published review of the restaurant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
  pub id: String,
  pub author: String,
  pub avatar_url: Option<String>,
  pub content: String,
  pub rating: u8, // 1..=5
}

impl Cacheable for Review {
  fn cache_key(&self) -> String {
    self.id.clone()
  }

  fn entity_type() -> &'static str {
    "review"
  }
}

/// A review typed in by the user, not validated yet
#[derive(Debug, Clone)]
pub struct NewReview {
  pub author: String,
  pub avatar_url: Option<String>,
  pub content: String,
  pub rating: i64,
}

impl NewReview {
  /// Identifier the review will be stored under.
  pub fn id(&self) -> String {
    local_review_id(&self.author, &self.content)
  }

  /// Check content and rating. Duplicates are checked against the cache.
  pub fn validate(&self) -> Result<(), ReviewError> {
    let has_content = !self.content.trim().is_empty();
    let rating_ok = (1..=5).contains(&self.rating);

    match (has_content, rating_ok) {
      (true, true) => Ok(()),
      (false, false) => Err(ReviewError::MissingContentAndRating),
      (false, true) => Err(ReviewError::MissingContent),
      (true, false) => Err(ReviewError::RatingOutOfRange),
    }
  }

  pub fn into_review(self) -> Result<Review, ReviewError> {
    self.validate()?;
    Ok(Review {
      id: self.id(),
      author: self.author,
      avatar_url: self.avatar_url,
      content: self.content,
      rating: self.rating as u8,
    })
  }
}

/// Deterministic id for a locally written review: same author and text, same id.
pub fn local_review_id(author: &str, content: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(author.trim().as_bytes());
  hasher.update(b"\n");
  hasher.update(content.trim().as_bytes());
  let digest = hex::encode(hasher.finalize());
  format!("local-{}", &digest[..16])
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_review(content: &str, rating: i64) -> NewReview {
    NewReview {
      author: "John Tester".to_string(),
      avatar_url: None,
      content: content.to_string(),
      rating,
    }
  }

  #[test]
  fn test_validation_rules() {
    assert!(new_review("Great naan", 5).validate().is_ok());
    assert_eq!(
      new_review("   ", 3).validate(),
      Err(ReviewError::MissingContent)
    );
    assert_eq!(
      new_review("Too spicy", 0).validate(),
      Err(ReviewError::RatingOutOfRange)
    );
    assert_eq!(
      new_review("Too spicy", 6).validate(),
      Err(ReviewError::RatingOutOfRange)
    );
    assert_eq!(
      new_review("", 9).validate(),
      Err(ReviewError::MissingContentAndRating)
    );
  }

  #[test]
  fn test_local_id_is_deterministic() {
    let a = new_review("Lovely curry", 4);
    let b = new_review("Lovely curry", 2);
    assert_eq!(a.id(), b.id());
    assert_ne!(a.id(), new_review("Bland curry", 4).id());
    assert!(a.id().starts_with("local-"));
  }

  #[test]
  fn test_into_review_keeps_fields() {
    let review = new_review("Lovely curry", 4).into_review().unwrap();
    assert_eq!(review.rating, 4);
    assert_eq!(review.author, "John Tester");
    assert_eq!(review.cache_key(), review.id);
  }
}
