//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/default.toml` unless another path is given)
//! 2. environment variables prefixed with `DI2008_`, nested keys separated by `__`
//!    (for example `DI2008_DEVICE__PORT=/dev/ttyACM1`)
//!
//! # Example
//! ```no_run
//! use di2008_daq::config::DaqConfig;
//!
//! let config = DaqConfig::load()?;
//! config.validate()?;
//! println!("Device port: {:?}", config.device.port);
//! # Ok::<(), di2008_daq::error::DaqError>(())
//! ```

use crate::channel::{Channel, ChannelConfig};
use crate::error::{AppResult, DaqError};
use crate::protocol::{LedColor, SAMPLE_RATE_RANGE};
use crate::scan_list::ScanList;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "DI2008_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial link and timing
    #[serde(default)]
    pub device: DeviceConfig,
    /// Scan list, in scan order
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Device link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port name (e.g., "/dev/ttyACM0", "COM3")
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Wait for a command echo in milliseconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,
    /// Silence that ends the drain after `stop`, in milliseconds
    #[serde(default = "default_quiet")]
    pub quiet_ms: u64,
    /// Upper bound of the drain after `stop`, in milliseconds
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_ms: u64,
    /// Bounded wait of each acquisition read in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// Maximum bytes per acquisition read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Silence after which a partial scan cycle is reported as a desync, in milliseconds
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u64,
    /// Sample rate divisor sent on connect (`srate`)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u16,
    /// LED color set on connect
    #[serde(default)]
    pub indicator: Option<LedColor>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_command_timeout() -> u64 {
    1000
}

fn default_quiet() -> u64 {
    100
}

fn default_drain_timeout() -> u64 {
    2000
}

fn default_read_timeout() -> u64 {
    50
}

fn default_read_chunk() -> usize {
    1024
}

fn default_stall_timeout() -> u64 {
    500
}

fn default_sample_rate() -> u16 {
    10
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            command_timeout_ms: default_command_timeout(),
            quiet_ms: default_quiet(),
            drain_timeout_ms: default_drain_timeout(),
            read_timeout_ms: default_read_timeout(),
            read_chunk: default_read_chunk(),
            stall_timeout_ms: default_stall_timeout(),
            sample_rate: default_sample_rate(),
            indicator: None,
        }
    }
}

impl DeviceConfig {
    /// Check link and timing values.
    ///
    /// # Errors
    /// `InvalidConfiguration` naming the offending field.
    pub fn validate(&self) -> AppResult<()> {
        if self.baud_rate == 0 {
            return Err(invalid("baud_rate must be positive".to_string()));
        }
        if self.command_timeout_ms == 0 || self.read_timeout_ms == 0 || self.quiet_ms == 0 {
            return Err(invalid(
                "command_timeout_ms, read_timeout_ms and quiet_ms must be positive".to_string(),
            ));
        }
        if self.drain_timeout_ms < self.quiet_ms {
            return Err(invalid(format!(
                "drain_timeout_ms ({}) must not be shorter than quiet_ms ({})",
                self.drain_timeout_ms, self.quiet_ms
            )));
        }
        if self.stall_timeout_ms <= self.read_timeout_ms {
            return Err(invalid(format!(
                "stall_timeout_ms ({}) must exceed read_timeout_ms ({})",
                self.stall_timeout_ms, self.read_timeout_ms
            )));
        }
        if self.read_chunk == 0 {
            return Err(invalid("read_chunk must be positive".to_string()));
        }
        if !SAMPLE_RATE_RANGE.contains(&self.sample_rate) {
            return Err(invalid(format!(
                "Invalid sample_rate {}. Must be {}-{}",
                self.sample_rate,
                SAMPLE_RATE_RANGE.start(),
                SAMPLE_RATE_RANGE.end()
            )));
        }
        Ok(())
    }
}

impl DaqConfig {
    /// Load configuration from `config/default.toml` and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment variables still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        Self::figment(path).extract().map_err(DaqError::from)
    }

    /// The provider stack used by [`DaqConfig::load_from`].
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        self.device.validate()?;

        if !self.channels.is_empty() {
            self.scan_list()?;
        }
        Ok(())
    }

    /// Build the configured scan list.
    ///
    /// # Errors
    /// Channel construction and scan-list assembly errors, e.g. `DuplicateSlot`.
    pub fn scan_list(&self) -> AppResult<ScanList> {
        let channels = self
            .channels
            .iter()
            .cloned()
            .map(Channel::try_from)
            .collect::<AppResult<Vec<_>>>()?;
        ScanList::from_channels(channels)
    }
}

fn invalid(message: String) -> DaqError {
    DaqError::InvalidConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelId;

    #[test]
    fn test_defaults_are_valid() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device.baud_rate, 115_200);
        assert_eq!(config.device.sample_rate, 10);
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = DaqConfig::default();
        config.application.log_level = "verbose".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stall_must_exceed_read_timeout() {
        let mut config = DaqConfig::default();
        config.device.stall_timeout_ms = config.device.read_timeout_ms;
        assert!(matches!(
            config.validate(),
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_device_config_validates_alone() {
        assert!(DeviceConfig::default().validate().is_ok());

        let config = DeviceConfig {
            read_chunk: 0,
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DaqError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_sample_rate_range() {
        let mut config = DaqConfig::default();
        config.device.sample_rate = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_scan_list_from_channels() {
        let config = DaqConfig {
            channels: vec![
                ChannelConfig::Count,
                ChannelConfig::Rate {
                    range_hz: 500,
                    filter_samples: 4,
                },
            ],
            ..DaqConfig::default()
        };
        let list = config.scan_list().unwrap();
        assert_eq!(list.ids(), vec![ChannelId::Count, ChannelId::Rate]);
    }

    #[test]
    fn test_duplicate_channels_fail_validation() {
        let config = DaqConfig {
            channels: vec![ChannelConfig::Count, ChannelConfig::Count],
            ..DaqConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(DaqError::DuplicateSlot(ChannelId::Count))
        ));
    }
}
