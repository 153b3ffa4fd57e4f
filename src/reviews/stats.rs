use super::types::Review;

/// Star distribution and average rating of a set of reviews
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewStats {
  /// Index 0 holds one-star reviews, index 4 five-star reviews
  pub star_counts: [usize; 5],
  /// Number of reviews with a valid rating
  pub total: usize,
  /// Average rating rounded to one decimal, 0.0 without reviews
  pub average: f32,
}

impl ReviewStats {
  pub fn from_reviews(reviews: &[Review]) -> Self {
    let mut star_counts = [0usize; 5];
    for review in reviews {
      if (1..=5).contains(&review.rating) {
        star_counts[usize::from(review.rating) - 1] += 1;
      }
    }

    let total: usize = star_counts.iter().sum();
    let weighted: usize = star_counts
      .iter()
      .enumerate()
      .map(|(i, count)| (i + 1) * count)
      .sum();

    let average = if total == 0 {
      0.0
    } else {
      ((weighted as f32 / total as f32) * 10.0).round() / 10.0
    };

    Self {
      star_counts,
      total,
      average,
    }
  }

  /// Share of reviews with the given star rating, in 0.0..=1.0
  pub fn share(&self, stars: u8) -> f32 {
    match usize::from(stars).checked_sub(1).and_then(|i| self.star_counts.get(i)) {
      Some(count) if self.total > 0 => *count as f32 / self.total as f32,
      _ => 0.0,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn review(id: &str, rating: u8) -> Review {
    Review {
      id: id.to_string(),
      author: "Emilie Hood".to_string(),
      avatar_url: None,
      content: "Très bon restaurant Indien !".to_string(),
      rating,
    }
  }

  #[test]
  fn test_empty_stats() {
    let stats = ReviewStats::from_reviews(&[]);
    assert_eq!(stats.total, 0);
    assert_eq!(stats.average, 0.0);
    assert_eq!(stats.share(5), 0.0);
  }

  #[test]
  fn test_counts_and_rounded_average() {
    // 5, 4, 5, 2, 4 -> 20 / 5 = 4.0
    let reviews = vec![
      review("a", 5),
      review("b", 4),
      review("c", 5),
      review("d", 2),
      review("e", 4),
    ];
    let stats = ReviewStats::from_reviews(&reviews);
    assert_eq!(stats.star_counts, [0, 1, 0, 2, 2]);
    assert_eq!(stats.total, 5);
    assert_eq!(stats.average, 4.0);
    assert!((stats.share(5) - 0.4).abs() < f32::EPSILON);
  }

  #[test]
  fn test_average_rounds_to_one_decimal() {
    // 5, 4, 4 -> 4.333 -> 4.3
    let reviews = vec![review("a", 5), review("b", 4), review("c", 4)];
    assert_eq!(ReviewStats::from_reviews(&reviews).average, 4.3);
  }

  #[test]
  fn test_invalid_ratings_ignored() {
    let reviews = vec![review("a", 0), review("b", 3), review("c", 9)];
    let stats = ReviewStats::from_reviews(&reviews);
    assert_eq!(stats.total, 1);
    assert_eq!(stats.average, 3.0);
    assert_eq!(stats.share(0), 0.0);
  }
}
