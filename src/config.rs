//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::admission::LimitsConfig;
use crate::error::{GatekeeperError, Result};

/// Main configuration for the admission subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Limit profiles and thresholds
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Progressive delay and violation tracking
    #[serde(default)]
    pub penalties: PenaltyConfig,

    /// Retry scheduling for denied requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background sweep configuration
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// Where ban records are persisted
    #[serde(default)]
    pub store: StoreConfig,
}

/// Progressive penalty configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    /// Delay added per violation before the severity multiplier
    #[serde(default = "default_base_increment")]
    pub base_increment_ms: u64,

    /// Upper bound for the progressive delay
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Amount removed from a delay on each decay tick
    #[serde(default = "default_decay_step")]
    pub decay_step_ms: u64,

    /// Minimum spacing between two decays of the same identifier
    #[serde(default = "default_decay_interval")]
    pub decay_interval_ms: u64,

    /// Violations older than this are dropped from the log
    #[serde(default = "default_violation_window")]
    pub violation_window_ms: u64,

    /// Maximum violation log length per identifier
    #[serde(default = "default_max_violations")]
    pub max_violations: usize,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base_increment_ms: default_base_increment(),
            max_delay_ms: default_max_delay(),
            decay_step_ms: default_decay_step(),
            decay_interval_ms: default_decay_interval(),
            violation_window_ms: default_violation_window(),
            max_violations: default_max_violations(),
        }
    }
}

fn default_base_increment() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_decay_step() -> u64 {
    1_000
}

fn default_decay_interval() -> u64 {
    60_000
}

fn default_violation_window() -> u64 {
    3_600_000
}

fn default_max_violations() -> usize {
    100
}

impl PenaltyConfig {
    pub fn decay_interval(&self) -> Duration {
        Duration::from_millis(self.decay_interval_ms)
    }
}

/// Retry scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of re-submissions before a request fails for good
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff table indexed by attempt number
    #[serde(default = "default_base_delays")]
    pub base_delays_ms: Vec<u64>,

    /// Cap applied to every single wait
    #[serde(default = "default_max_retry_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delays_ms: default_base_delays(),
            max_delay_ms: default_max_retry_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delays() -> Vec<u64> {
    vec![1_000, 2_000, 4_000, 8_000]
}

fn default_max_retry_delay() -> u64 {
    60_000
}

/// Background maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// How often idle windows and expired bans are swept
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    300_000
}

impl MaintenanceConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

/// Ban persistence backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Bans live only as long as the process
    #[default]
    Memory,
    /// Bans are mirrored to a JSON file
    File { path: PathBuf },
}

impl GatekeeperConfig {
    /// Load configuration from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading gatekeeper configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatekeeperConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.limits.validate()?;

        if self.penalties.decay_interval_ms == 0 {
            return Err(GatekeeperError::Config(
                "penalties.decay_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.penalties.base_increment_ms > self.penalties.max_delay_ms {
            return Err(GatekeeperError::Config(
                "penalties.base_increment_ms cannot exceed penalties.max_delay_ms".to_string(),
            ));
        }
        if self.retry.base_delays_ms.is_empty() {
            return Err(GatekeeperError::Config(
                "retry.base_delays_ms needs at least one entry".to_string(),
            ));
        }
        if self.retry.max_delay_ms == 0 {
            return Err(GatekeeperError::Config(
                "retry.max_delay_ms must be greater than zero".to_string(),
            ));
        }
        if self.maintenance.cleanup_interval_ms == 0 {
            return Err(GatekeeperError::Config(
                "maintenance.cleanup_interval_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatekeeperConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delays_ms, vec![1_000, 2_000, 4_000, 8_000]);
        assert_eq!(config.maintenance.cleanup_interval(), Duration::from_secs(300));
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
retry:
  max_attempts: 2
store:
  type: file
  path: /var/lib/gatekeeper/bans.json
"#;
        let config = GatekeeperConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.max_delay_ms, 60_000);
        assert_eq!(
            config.store,
            StoreConfig::File {
                path: PathBuf::from("/var/lib/gatekeeper/bans.json")
            }
        );
        assert_eq!(config.penalties.max_delay_ms, 30_000);
    }

    #[test]
    fn test_rejects_empty_backoff_table() {
        let yaml = r#"
retry:
  base_delays_ms: []
"#;
        let err = GatekeeperConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GatekeeperError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = GatekeeperConfig::from_yaml("retry: [1, 2").unwrap_err();
        assert!(err.to_string().contains("Failed to parse configuration"));
    }
}
