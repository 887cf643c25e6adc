//! Bridge configuration.
//!
//! Every field has a default, so an empty YAML document is a valid
//! configuration. Durations are expressed in milliseconds.
//!
//! ```yaml
//! name: radio1
//! wake_lock_timeout_ms: 60000
//! ack_wake_lock_timeout_ms: 200
//! request_max_age_ms: 90000
//! hal_version_cap: "1.5"
//! bug_detector:
//!   lock_timeout_threshold: 10
//!   system_error_threshold: 10
//!   system_error_codes: [39]
//! ```

use std::path::Path;
use std::time::Duration;

use radiobridge_protocol::{HalVersion, RadioError};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Configuration for one bridge instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Instance name, used as the thread name and the `instance` metric label.
    pub name: String,

    /// First serial to hand out. A random seed is chosen when unset.
    pub serial_seed: Option<u32>,

    /// Ceiling on how long the primary wake lock may stay held without a
    /// new request arriving (milliseconds).
    pub wake_lock_timeout_ms: u64,

    /// How long the ack wake lock is held after the most recent
    /// acknowledgement frame (milliseconds).
    pub ack_wake_lock_timeout_ms: u64,

    /// Age after which an unanswered request is failed with a timeout
    /// (milliseconds).
    pub request_max_age_ms: u64,

    /// Highest HAL version the attached modem service exposes.
    /// No request is ever issued above it.
    pub hal_version_cap: Option<HalVersion>,

    /// Radio bug detector thresholds.
    pub bug_detector: BugDetectorConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            name: "radio0".to_string(),
            serial_seed: None,
            wake_lock_timeout_ms: 60_000,
            ack_wake_lock_timeout_ms: 200,
            request_max_age_ms: 90_000,
            hal_version_cap: None,
            bug_detector: BugDetectorConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Parse a configuration from YAML and validate it.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: BridgeConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the instance name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fix the first serial.
    pub fn with_serial_seed(mut self, seed: u32) -> Self {
        self.serial_seed = Some(seed);
        self
    }

    /// Set the primary wake lock ceiling.
    pub fn with_wake_lock_timeout(mut self, timeout: Duration) -> Self {
        self.wake_lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the ack wake lock hold time.
    pub fn with_ack_wake_lock_timeout(mut self, timeout: Duration) -> Self {
        self.ack_wake_lock_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the request age-out window.
    pub fn with_request_max_age(mut self, max_age: Duration) -> Self {
        self.request_max_age_ms = max_age.as_millis() as u64;
        self
    }

    /// Cap the HAL version for every kind.
    pub fn with_hal_version_cap(mut self, cap: HalVersion) -> Self {
        self.hal_version_cap = Some(cap);
        self
    }

    /// Replace the bug detector thresholds.
    pub fn with_bug_detector(mut self, bug_detector: BugDetectorConfig) -> Self {
        self.bug_detector = bug_detector;
        self
    }

    /// Primary wake lock ceiling.
    pub fn wake_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.wake_lock_timeout_ms)
    }

    /// Ack wake lock hold time.
    pub fn ack_wake_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_wake_lock_timeout_ms)
    }

    /// Request age-out window.
    pub fn request_max_age(&self) -> Duration {
        Duration::from_millis(self.request_max_age_ms)
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("name must not be empty".to_string()));
        }
        if self.wake_lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid("wake_lock_timeout_ms must be positive".to_string()));
        }
        if self.ack_wake_lock_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "ack_wake_lock_timeout_ms must be positive".to_string(),
            ));
        }
        if self.request_max_age_ms == 0 {
            return Err(ConfigError::Invalid("request_max_age_ms must be positive".to_string()));
        }
        if self.serial_seed == Some(0) {
            return Err(ConfigError::Invalid("serial_seed 0 is reserved".to_string()));
        }
        self.bug_detector.validate()
    }
}

/// Thresholds for the radio bug detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BugDetectorConfig {
    /// Consecutive wake lock timeouts before the modem is suspected stuck.
    pub lock_timeout_threshold: u32,
    /// Consecutive wake lock timeouts before the bug is confirmed.
    pub lock_timeout_confirm_threshold: u32,
    /// Only timeouts within this window count toward the streak (milliseconds).
    pub lock_timeout_window_ms: Option<u64>,
    /// Consecutive designated errors for one kind before the modem is suspected.
    pub system_error_threshold: u32,
    /// Consecutive designated errors for one kind before the bug is confirmed.
    pub system_error_confirm_threshold: u32,
    /// Error codes that count as internal/system errors.
    pub system_error_codes: Vec<RadioError>,
}

impl Default for BugDetectorConfig {
    fn default() -> Self {
        BugDetectorConfig {
            lock_timeout_threshold: 10,
            lock_timeout_confirm_threshold: 20,
            lock_timeout_window_ms: None,
            system_error_threshold: 10,
            system_error_confirm_threshold: 20,
            system_error_codes: vec![RadioError::SystemErr],
        }
    }
}

impl BugDetectorConfig {
    /// Lock timeout counting window, if any.
    pub fn lock_timeout_window(&self) -> Option<Duration> {
        self.lock_timeout_window_ms.map(Duration::from_millis)
    }

    /// Check thresholds are positive and ordered.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.lock_timeout_threshold == 0 || self.system_error_threshold == 0 {
            return Err(ConfigError::Invalid(
                "bug detector thresholds must be positive".to_string(),
            ));
        }
        if self.lock_timeout_confirm_threshold < self.lock_timeout_threshold {
            return Err(ConfigError::Invalid(format!(
                "lock_timeout_confirm_threshold ({}) is below lock_timeout_threshold ({})",
                self.lock_timeout_confirm_threshold, self.lock_timeout_threshold
            )));
        }
        if self.system_error_confirm_threshold < self.system_error_threshold {
            return Err(ConfigError::Invalid(format!(
                "system_error_confirm_threshold ({}) is below system_error_threshold ({})",
                self.system_error_confirm_threshold, self.system_error_threshold
            )));
        }
        if self.lock_timeout_window_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "lock_timeout_window_ms must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<BridgeConfig> {
    let path = path.as_ref();
    let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    BridgeConfig::from_yaml_str(&yaml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.wake_lock_timeout(), Duration::from_secs(60));
        assert_eq!(config.ack_wake_lock_timeout(), Duration::from_millis(200));
        assert_eq!(config.bug_detector.system_error_codes, vec![RadioError::SystemErr]);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config = BridgeConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_yaml_overrides() {
        let yaml = r#"
name: radio1
serial_seed: 100
wake_lock_timeout_ms: 500
hal_version_cap: "1.4"
bug_detector:
  system_error_threshold: 3
  system_error_confirm_threshold: 5
  system_error_codes: [38, 39]
"#;
        let config = BridgeConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.name, "radio1");
        assert_eq!(config.serial_seed, Some(100));
        assert_eq!(config.wake_lock_timeout(), Duration::from_millis(500));
        assert_eq!(config.hal_version_cap, Some(HalVersion::V1_4));
        assert_eq!(config.bug_detector.system_error_threshold, 3);
        assert_eq!(
            config.bug_detector.system_error_codes,
            vec![RadioError::InternalErr, RadioError::SystemErr]
        );
        // Untouched fields keep their defaults
        assert_eq!(config.bug_detector.lock_timeout_threshold, 10);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = BridgeConfig::from_yaml_str("wakelock_timeout: 5").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_validation_failures() {
        let zero_ceiling = BridgeConfig::default().with_wake_lock_timeout(Duration::ZERO);
        assert!(matches!(zero_ceiling.validate(), Err(ConfigError::Invalid(_))));

        let reserved_seed = BridgeConfig {
            serial_seed: Some(0),
            ..Default::default()
        };
        assert!(reserved_seed.validate().is_err());

        let inverted = BridgeConfig::default().with_bug_detector(BugDetectorConfig {
            lock_timeout_threshold: 5,
            lock_timeout_confirm_threshold: 4,
            ..Default::default()
        });
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/radiobridge.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
