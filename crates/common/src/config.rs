//! Driver configuration management
//!
//! Every section is optional; a missing file yields the defaults.
//!
//! ```toml
//! [locking]
//! timeout_ms = 1000
//!
//! [streaming]
//! transfer_count = 5
//! packets_per_transfer = 32
//! drop_corrupted = true
//!
//! [queues]
//! pool_size = 4
//! buffers_per_queue = 4
//!
//! [[quirks]]
//! device = "046d:0825"
//! flags = ["probe_minmax"]
//! ```

use crate::quirks::{Quirks, UsbId};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub locking: LockingSettings,
    #[serde(default)]
    pub streaming: StreamingSettings,
    #[serde(default)]
    pub queues: QueueSettings,
    /// Extra quirk entries merged with the built-in table
    #[serde(default)]
    pub quirks: Vec<QuirkEntry>,
}

/// Bounded lock waits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingSettings {
    /// Maximum wait for the stream and queue locks
    #[serde(default = "LockingSettings::default_timeout")]
    pub timeout_ms: u64,
}

impl Default for LockingSettings {
    fn default() -> Self {
        Self {
            timeout_ms: Self::default_timeout(),
        }
    }
}

impl LockingSettings {
    fn default_timeout() -> u64 {
        1000
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingSettings {
    /// Transfer requests kept in flight per stream
    #[serde(default = "StreamingSettings::default_transfer_count")]
    pub transfer_count: usize,
    /// Isochronous packets per transfer request
    #[serde(default = "StreamingSettings::default_packets_per_transfer")]
    pub packets_per_transfer: usize,
    /// Resubmission attempts before a transfer slot is deactivated
    #[serde(default = "StreamingSettings::default_resubmit_retries")]
    pub resubmit_retries: u32,
    #[serde(default = "StreamingSettings::default_cancel_poll_interval")]
    pub cancel_poll_interval_ms: u64,
    /// Upper bound on waiting for cancelled transfers before forced reclaim
    #[serde(default = "StreamingSettings::default_cancel_timeout")]
    pub cancel_timeout_ms: u64,
    /// Recycle errored frames instead of delivering them
    #[serde(default)]
    pub drop_corrupted: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            transfer_count: Self::default_transfer_count(),
            packets_per_transfer: Self::default_packets_per_transfer(),
            resubmit_retries: Self::default_resubmit_retries(),
            cancel_poll_interval_ms: Self::default_cancel_poll_interval(),
            cancel_timeout_ms: Self::default_cancel_timeout(),
            drop_corrupted: false,
        }
    }
}

impl StreamingSettings {
    fn default_transfer_count() -> usize {
        5
    }

    fn default_packets_per_transfer() -> usize {
        32
    }

    fn default_resubmit_retries() -> u32 {
        3
    }

    fn default_cancel_poll_interval() -> u64 {
        5
    }

    fn default_cancel_timeout() -> u64 {
        2000
    }

    pub fn cancel_poll_interval(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_interval_ms)
    }

    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

/// Global queue pool shared by every open stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "QueueSettings::default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "QueueSettings::default_buffers")]
    pub buffers_per_queue: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            pool_size: Self::default_pool_size(),
            buffers_per_queue: Self::default_buffers(),
        }
    }
}

impl QueueSettings {
    fn default_pool_size() -> usize {
        4
    }

    fn default_buffers() -> usize {
        4
    }
}

/// Quirks applied to one device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuirkEntry {
    /// Device in `vvvv:pppp` form
    pub device: String,
    /// Flag names such as `"probe_minmax"`
    #[serde(default)]
    pub flags: Vec<String>,
}

impl QuirkEntry {
    /// Resolve the entry into an id and flag set
    pub fn resolve(&self) -> Result<(UsbId, Quirks)> {
        let id: UsbId = self.device.parse()?;
        let mut quirks = Quirks::empty();
        for name in &self.flags {
            quirks |= Quirks::parse_name(name).ok_or_else(|| {
                Error::Config(format!("Unknown quirk '{}' for device {}", name, id))
            })?;
        }
        Ok((id, quirks))
    }
}

impl DriverConfig {
    /// Load from `path`, or from the default location when it exists
    ///
    /// Returns the defaults when no path is given and no default file exists.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => {
                let default = Self::default_path();
                if !default.exists() {
                    tracing::debug!("No configuration file found, using defaults");
                    return Ok(Self::default());
                }
                default
            }
        };

        let content = fs::read_to_string(&config_path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let config: DriverConfig = toml::from_str(&content).map_err(|e| {
            Error::Config(format!(
                "Failed to parse config file {}: {}",
                config_path.display(),
                e
            ))
        })?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load, falling back to defaults on any error
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Get default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("uvc-host").join("driver.toml")
        } else {
            PathBuf::from(".config/uvc-host/driver.toml")
        }
    }

    /// Serialize as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.locking.timeout_ms == 0 {
            return Err(Error::Config("locking.timeout_ms must be non-zero".into()));
        }

        let streaming = &self.streaming;
        if streaming.transfer_count == 0 || streaming.packets_per_transfer == 0 {
            return Err(Error::Config(
                "streaming.transfer_count and packets_per_transfer must be non-zero".into(),
            ));
        }
        if streaming.cancel_poll_interval_ms == 0
            || streaming.cancel_timeout_ms < streaming.cancel_poll_interval_ms
        {
            return Err(Error::Config(format!(
                "streaming.cancel_timeout_ms ({}) must cover at least one poll interval ({})",
                streaming.cancel_timeout_ms, streaming.cancel_poll_interval_ms
            )));
        }

        if self.queues.pool_size == 0 || self.queues.buffers_per_queue == 0 {
            return Err(Error::Config(
                "queues.pool_size and buffers_per_queue must be non-zero".into(),
            ));
        }

        for entry in &self.quirks {
            entry.resolve()?;
        }

        Ok(())
    }

    /// Resolved extra quirk entries
    pub fn quirk_overrides(&self) -> Result<Vec<(UsbId, Quirks)>> {
        self.quirks.iter().map(QuirkEntry::resolve).collect()
    }
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<DriverConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    DriverConfig::load(Some(path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DriverConfig::default();
        assert_eq!(config.locking.timeout_ms, 1000);
        assert_eq!(config.streaming.transfer_count, 5);
        assert_eq!(config.streaming.packets_per_transfer, 32);
        assert_eq!(config.streaming.resubmit_retries, 3);
        assert_eq!(config.streaming.cancel_poll_interval_ms, 5);
        assert!(!config.streaming.drop_corrupted);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_use_defaults() {
        let config: DriverConfig = toml::from_str("[streaming]\ndrop_corrupted = true\n").unwrap();
        assert!(config.streaming.drop_corrupted);
        assert_eq!(config.streaming.transfer_count, 5);
        assert_eq!(config.queues.pool_size, 4);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = DriverConfig::default();
        config.queues.pool_size = 0;
        assert!(config.validate().is_err());

        let mut config = DriverConfig::default();
        config.streaming.cancel_timeout_ms = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_quirk_entry_resolution() {
        let entry = QuirkEntry {
            device: "046d:0825".into(),
            flags: vec!["probe_minmax".into(), "stream_no_fid".into()],
        };
        let (id, quirks) = entry.resolve().unwrap();
        assert_eq!(id, UsbId::new(0x046d, 0x0825));
        assert_eq!(quirks, Quirks::PROBE_MINMAX | Quirks::STREAM_NO_FID);

        let bad = QuirkEntry {
            device: "046d:0825".into(),
            flags: vec!["turbo".into()],
        };
        assert!(bad.resolve().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = DriverConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: DriverConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.streaming.cancel_timeout_ms, 2000);
    }
}
