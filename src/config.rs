use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::sync::{Constraints, RefreshPolicy};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub refresh: RefreshConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Reviews endpoint: http(s):// or file://
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

/// Refresh cadence, backoff bounds and run constraints
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
  /// Syncs closer together than this are skipped unless forced
  pub min_interval_secs: u64,
  /// Interval between scheduled syncs
  pub period_secs: u64,
  pub initial_backoff_secs: u64,
  pub max_backoff_secs: u64,
  /// Retries of one cycle before giving up until the next one
  pub max_retries: u32,
  pub requires_network: bool,
  pub requires_battery_not_low: bool,
  /// How often unmet constraints are re-checked
  pub constraint_poll_secs: u64,
}

impl Default for RefreshConfig {
  fn default() -> Self {
    Self {
      min_interval_secs: 15 * 60,
      period_secs: 6 * 60 * 60,
      initial_backoff_secs: 30,
      max_backoff_secs: 30 * 60,
      max_retries: 5,
      requires_network: true,
      requires_battery_not_low: true,
      constraint_poll_secs: 60,
    }
  }
}

impl RefreshConfig {
  pub fn to_policy(&self) -> RefreshPolicy {
    RefreshPolicy {
      min_interval: Duration::from_secs(self.min_interval_secs),
      period: Duration::from_secs(self.period_secs.max(1)),
      initial_backoff: Duration::from_secs(self.initial_backoff_secs),
      max_backoff: Duration::from_secs(self.max_backoff_secs.max(self.initial_backoff_secs)),
      max_retries: self.max_retries,
      constraints: Constraints {
        requires_network: self.requires_network,
        requires_battery_not_low: self.requires_battery_not_low,
      },
      constraint_poll: Duration::from_secs(self.constraint_poll_secs.max(1)),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// SQLite file (defaults to $XDG_DATA_HOME/tajsync/cache.db)
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
  /// Log directory (defaults to $XDG_DATA_HOME/tajsync/logs)
  pub dir: Option<PathBuf>,
  /// Filter directive used when TAJSYNC_LOG is unset (e.g., "info")
  pub level: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tajsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tajsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tajsync/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tajsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tajsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  /// Get the API token from the environment, if any.
  ///
  /// Checks TAJSYNC_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TAJSYNC_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("remote:\n  url: https://api.example.com/reviews\n").unwrap();
    assert_eq!(config.remote.timeout_secs, 15);
    assert_eq!(config.refresh.max_retries, 5);
    assert!(config.cache.path.is_none());

    let policy = config.refresh.to_policy();
    assert_eq!(policy.period, Duration::from_secs(6 * 60 * 60));
    assert!(policy.constraints.requires_network);
  }

  #[test]
  fn test_refresh_overrides() {
    let yaml = r#"
remote:
  url: file:///tmp/reviews.json
refresh:
  period_secs: 120
  max_retries: 2
  requires_battery_not_low: false
cache:
  path: /tmp/tajsync.db
log:
  level: debug
"#;
    let config = Config::from_yaml(yaml).unwrap();
    let policy = config.refresh.to_policy();
    assert_eq!(policy.period, Duration::from_secs(120));
    assert_eq!(policy.max_retries, 2);
    assert!(!policy.constraints.requires_battery_not_low);
    assert_eq!(config.log.level.as_deref(), Some("debug"));
  }

  #[test]
  fn test_missing_remote_is_an_error() {
    assert!(Config::from_yaml("refresh:\n  period_secs: 10\n").is_err());
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/tajsync.yaml"))).is_err());
  }
}
