//! Environmental run constraints (network reachable, battery not low).

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use url::Url;

/// Battery percentage under which a discharging battery counts as low
const LOW_BATTERY_PERCENT: u8 = 15;

/// Conditions that must hold before a scheduled sync runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Constraints {
  pub requires_network: bool,
  pub requires_battery_not_low: bool,
}

impl Default for Constraints {
  fn default() -> Self {
    Self {
      requires_network: true,
      requires_battery_not_low: true,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstraintCheck {
  Satisfied,
  Unmet(&'static str),
}

/// Probes the host for the state the constraints refer to.
#[async_trait]
pub trait Environment: Send + Sync {
  async fn network_available(&self) -> bool;
  async fn battery_not_low(&self) -> bool;
}

/// Evaluate the required constraints, network first.
pub async fn check_constraints(env: &dyn Environment, constraints: &Constraints) -> ConstraintCheck {
  if constraints.requires_network && !env.network_available().await {
    return ConstraintCheck::Unmet("network unavailable");
  }
  if constraints.requires_battery_not_low && !env.battery_not_low().await {
    return ConstraintCheck::Unmet("battery low");
  }
  ConstraintCheck::Satisfied
}

/// Probes the real machine: TCP reachability of the endpoint and sysfs battery state.
pub struct HostEnvironment {
  /// host:port to connect to; `None` means no network is needed (file endpoints)
  reachability_addr: Option<String>,
  timeout: Duration,
  power_supply_dir: PathBuf,
}

impl HostEnvironment {
  pub fn new(reachability_addr: Option<String>) -> Self {
    Self {
      reachability_addr,
      timeout: Duration::from_secs(3),
      power_supply_dir: PathBuf::from("/sys/class/power_supply"),
    }
  }

  /// Probe the host serving `endpoint`.
  pub fn for_endpoint(endpoint: &str) -> Self {
    let reachability_addr = Url::parse(endpoint).ok().and_then(|url| {
      let host = url.host_str()?.to_string();
      let port = url.port_or_known_default()?;
      Some(format!("{}:{}", host, port))
    });
    Self::new(reachability_addr)
  }

  pub fn with_power_supply_dir(mut self, dir: PathBuf) -> Self {
    self.power_supply_dir = dir;
    self
  }

  pub fn reachability_addr(&self) -> Option<&str> {
    self.reachability_addr.as_deref()
  }

  /// (capacity percent, charging) of the first battery found.
  async fn read_battery(&self) -> Option<(u8, bool)> {
    let mut entries = tokio::fs::read_dir(&self.power_supply_dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
      let dir = entry.path();
      let kind = read_trimmed(dir.join("type")).await;
      if kind.as_deref() != Some("Battery") {
        continue;
      }
      let capacity = read_trimmed(dir.join("capacity"))
        .await
        .and_then(|c| c.parse::<u8>().ok())?;
      let status = read_trimmed(dir.join("status")).await.unwrap_or_default();
      let charging = matches!(status.as_str(), "Charging" | "Full");
      return Some((capacity, charging));
    }
    None
  }
}

async fn read_trimmed(path: PathBuf) -> Option<String> {
  tokio::fs::read_to_string(path)
    .await
    .ok()
    .map(|s| s.trim().to_string())
}

#[async_trait]
impl Environment for HostEnvironment {
  async fn network_available(&self) -> bool {
    let Some(addr) = &self.reachability_addr else {
      return true;
    };
    matches!(
      tokio::time::timeout(self.timeout, TcpStream::connect(addr.as_str())).await,
      Ok(Ok(_))
    )
  }

  async fn battery_not_low(&self) -> bool {
    match self.read_battery().await {
      Some((capacity, charging)) => charging || capacity >= LOW_BATTERY_PERCENT,
      // Desktops and servers have no battery
      None => true,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixed {
    network: bool,
    battery: bool,
  }

  #[async_trait]
  impl Environment for Fixed {
    async fn network_available(&self) -> bool {
      self.network
    }

    async fn battery_not_low(&self) -> bool {
      self.battery
    }
  }

  #[tokio::test]
  async fn test_check_constraints() {
    let all = Constraints::default();
    let offline = Fixed {
      network: false,
      battery: true,
    };
    assert_eq!(
      check_constraints(&offline, &all).await,
      ConstraintCheck::Unmet("network unavailable")
    );

    let low = Fixed {
      network: true,
      battery: false,
    };
    assert_eq!(
      check_constraints(&low, &all).await,
      ConstraintCheck::Unmet("battery low")
    );

    let relaxed = Constraints {
      requires_network: false,
      requires_battery_not_low: false,
    };
    assert_eq!(
      check_constraints(&offline, &relaxed).await,
      ConstraintCheck::Satisfied
    );
  }

  #[test]
  fn test_reachability_addr_from_endpoint() {
    let env = HostEnvironment::for_endpoint("https://api.example.com/reviews");
    assert_eq!(env.reachability_addr(), Some("api.example.com:443"));

    let env = HostEnvironment::for_endpoint("http://localhost:8080/reviews");
    assert_eq!(env.reachability_addr(), Some("localhost:8080"));

    let env = HostEnvironment::for_endpoint("file:///tmp/reviews.json");
    assert_eq!(env.reachability_addr(), None);
  }

  fn fake_battery(capacity: &str, status: &str) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let bat = dir.path().join("BAT0");
    std::fs::create_dir(&bat).unwrap();
    std::fs::write(bat.join("type"), "Battery\n").unwrap();
    std::fs::write(bat.join("capacity"), capacity).unwrap();
    std::fs::write(bat.join("status"), status).unwrap();
    let ac = dir.path().join("AC");
    std::fs::create_dir(&ac).unwrap();
    std::fs::write(ac.join("type"), "Mains\n").unwrap();
    dir
  }

  #[tokio::test]
  async fn test_battery_state_from_sysfs() {
    let low = fake_battery("9\n", "Discharging\n");
    let env = HostEnvironment::new(None).with_power_supply_dir(low.path().to_path_buf());
    assert!(!env.battery_not_low().await);

    let charging = fake_battery("9\n", "Charging\n");
    let env = HostEnvironment::new(None).with_power_supply_dir(charging.path().to_path_buf());
    assert!(env.battery_not_low().await);

    let healthy = fake_battery("80\n", "Discharging\n");
    let env = HostEnvironment::new(None).with_power_supply_dir(healthy.path().to_path_buf());
    assert!(env.battery_not_low().await);
  }

  #[tokio::test]
  async fn test_no_battery_and_no_endpoint_are_ok() {
    let empty = tempfile::tempdir().unwrap();
    let env = HostEnvironment::new(None).with_power_supply_dir(empty.path().to_path_buf());
    assert!(env.battery_not_low().await);
    assert!(env.network_available().await);
  }
}
