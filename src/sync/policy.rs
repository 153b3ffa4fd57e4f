//! Refresh policy: cadence, backoff bounds and run constraints.

use std::time::Duration;

use super::environment::Constraints;

/// Built once at startup from the `refresh` config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
  /// Non-forced syncs closer than this to the last one do not fetch
  pub min_interval: Duration,
  /// Interval between scheduled cycles
  pub period: Duration,
  pub initial_backoff: Duration,
  pub max_backoff: Duration,
  /// Retries of one cycle after its first failed attempt
  pub max_retries: u32,
  pub constraints: Constraints,
  /// How often unmet constraints are re-checked
  pub constraint_poll: Duration,
}

impl Default for RefreshPolicy {
  fn default() -> Self {
    Self {
      min_interval: Duration::from_secs(15 * 60),
      period: Duration::from_secs(6 * 60 * 60),
      initial_backoff: Duration::from_secs(30),
      max_backoff: Duration::from_secs(30 * 60),
      max_retries: 5,
      constraints: Constraints::default(),
      constraint_poll: Duration::from_secs(60),
    }
  }
}

impl RefreshPolicy {
  /// Delay before retry number `attempt` (1-based): doubles each time, capped at `max_backoff`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    self
      .initial_backoff
      .checked_mul(1u32 << exponent)
      .unwrap_or(self.max_backoff)
      .min(self.max_backoff)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> RefreshPolicy {
    RefreshPolicy {
      initial_backoff: Duration::from_secs(10),
      max_backoff: Duration::from_secs(100),
      ..RefreshPolicy::default()
    }
  }

  #[test]
  fn test_backoff_doubles() {
    let policy = policy();
    assert_eq!(policy.backoff(1), Duration::from_secs(10));
    assert_eq!(policy.backoff(2), Duration::from_secs(20));
    assert_eq!(policy.backoff(3), Duration::from_secs(40));
    assert_eq!(policy.backoff(4), Duration::from_secs(80));
  }

  #[test]
  fn test_backoff_is_capped() {
    let policy = policy();
    assert_eq!(policy.backoff(5), Duration::from_secs(100));
    assert_eq!(policy.backoff(60), Duration::from_secs(100));
    assert_eq!(policy.backoff(u32::MAX), Duration::from_secs(100));
  }
}
