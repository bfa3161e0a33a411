// src/config.rs
//! Configuration management

use crate::error::{GeofenceError, Result};
use crate::gps::source::{BackpressurePolicy, SubscriptionRequest};
use crate::geofence::registry::DEFAULT_MAX_REGIONS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Monitor policy knobs. Durations are stored in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub foreground_min_time_ms: u64,
    pub foreground_min_distance_m: f64,
    pub background_min_time_ms: u64,
    pub background_min_distance_m: f64,
    /// Maximum queued fixes before backpressure applies
    pub queue_depth: usize,
    pub backpressure: BackpressurePolicy,
    pub subscription_timeout_ms: u64,
    pub max_regions: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            foreground_min_time_ms: 5_000,
            foreground_min_distance_m: 10.0,
            background_min_time_ms: 60_000,
            background_min_distance_m: 50.0,
            queue_depth: 64,
            backpressure: BackpressurePolicy::Lossless,
            subscription_timeout_ms: 5_000,
            max_regions: DEFAULT_MAX_REGIONS,
        }
    }
}

impl MonitorConfig {
    /// No throttling at all; every fix is evaluated.
    pub fn unthrottled() -> Self {
        Self {
            foreground_min_time_ms: 0,
            foreground_min_distance_m: 0.0,
            background_min_time_ms: 0,
            background_min_distance_m: 0.0,
            ..Self::default()
        }
    }

    /// Cadence for the given foreground state
    pub fn cadence(&self, foreground: bool) -> SubscriptionRequest {
        if foreground {
            SubscriptionRequest {
                min_time: Duration::from_millis(self.foreground_min_time_ms),
                min_distance_m: self.foreground_min_distance_m,
            }
        } else {
            SubscriptionRequest {
                min_time: Duration::from_millis(self.background_min_time_ms),
                min_distance_m: self.background_min_distance_m,
            }
        }
    }

    pub fn subscription_timeout(&self) -> Duration {
        Duration::from_millis(self.subscription_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_depth == 0 {
            return Err(GeofenceError::Other("queue_depth must be at least 1".to_string()));
        }
        if self.max_regions == 0 {
            return Err(GeofenceError::Other("max_regions must be at least 1".to_string()));
        }
        if self.subscription_timeout_ms == 0 {
            return Err(GeofenceError::Other(
                "subscription_timeout_ms must be positive".to_string(),
            ));
        }
        for distance in [self.foreground_min_distance_m, self.background_min_distance_m] {
            if !distance.is_finite() || distance < 0.0 {
                return Err(GeofenceError::Other(format!(
                    "minimum distance must be a non-negative number, got {}",
                    distance
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub source_type: String, // "gpsd", "serial", "replay"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub replay_file: Option<PathBuf>,
    pub replay_interval_ms: Option<u64>,
    pub monitor: MonitorConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl AppConfig {
    /// Get platform-specific default configuration
    pub fn platform_default() -> Self {
        #[cfg(windows)]
        let (source_type, serial_port) = ("serial", Some("COM3".to_string()));

        #[cfg(not(windows))]
        let (source_type, serial_port) = ("gpsd", None);

        Self {
            source_type: source_type.to_string(),
            serial_port,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            replay_file: None,
            replay_interval_ms: Some(1_000),
            monitor: MonitorConfig::default(),
        }
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::platform_default());
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| GeofenceError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| GeofenceError::Other(format!("Failed to parse config file: {}", e)))?;

        config.monitor.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GeofenceError::Other(format!("Failed to create config directory: {}", e)))?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| GeofenceError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(config_path, contents)
            .map_err(|e| GeofenceError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Config file path: `$HOME/.config` on Unix, `%APPDATA%` on Windows
    pub fn get_config_path() -> Result<PathBuf> {
        #[cfg(windows)]
        let base = std::env::var("APPDATA")
            .map(PathBuf::from)
            .map_err(|_| GeofenceError::Other("APPDATA environment variable not set".to_string()))?;

        #[cfg(not(windows))]
        let base = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".config"))
            .map_err(|_| GeofenceError::Other("HOME environment variable not set".to_string()))?;

        Ok(base.join("geofence-monitor").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();

        #[cfg(windows)]
        assert_eq!(config.source_type, "serial");

        #[cfg(not(windows))]
        assert_eq!(config.source_type, "gpsd");

        assert!(config.monitor.validate().is_ok());
    }

    #[test]
    fn test_cadence() {
        let monitor = MonitorConfig::default();
        let foreground = monitor.cadence(true);
        assert_eq!(foreground.min_time, Duration::from_secs(5));
        assert_eq!(foreground.min_distance_m, 10.0);

        let background = monitor.cadence(false);
        assert_eq!(background.min_time, Duration::from_secs(60));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = AppConfig::default();
        config.source_type = "serial".to_string();
        config.serial_port = Some("/dev/ttyUSB0".to_string());
        config.serial_baudrate = Some(115200);
        config.monitor.queue_depth = 8;
        config.monitor.backpressure = BackpressurePolicy::LatestOnly;
        config.save_to(&path).unwrap();

        assert_eq!(AppConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::platform_default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"source_type":"replay","monitor":{"queue_depth":4}}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.source_type, "replay");
        assert_eq!(config.monitor.queue_depth, 4);
        assert_eq!(config.monitor.foreground_min_time_ms, 5_000);
    }

    #[test]
    fn test_invalid_monitor_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"monitor":{"queue_depth":0}}"#).unwrap();

        assert!(AppConfig::load_from(&path).is_err());
    }
}
