// src/config.rs
//! Configuration management

use crate::error::{Result, TripError};
use crate::permission::{ConfiguredPermissions, PermissionState};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub source_type: String, // "serial", "gpsd"
    pub serial_port: Option<String>,
    pub serial_baudrate: Option<u32>,
    pub gpsd_host: Option<String>,
    pub gpsd_port: Option<u16>,
    pub data_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub reconcile_interval_ms: u64,
    pub background_enabled: bool,
    pub foreground_permission: PermissionState,
    pub background_permission: PermissionState,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            source_type: "gpsd".to_string(),
            serial_port: None,
            serial_baudrate: Some(9600),
            gpsd_host: Some("localhost".to_string()),
            gpsd_port: Some(2947),
            data_dir: None,
            export_dir: None,
            reconcile_interval_ms: 1000,
            background_enabled: true,
            foreground_permission: PermissionState::Granted,
            background_permission: PermissionState::Granted,
        }
    }
}

impl RecorderConfig {
    /// Load from a config file, falling back to defaults when it does not exist
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(config_path)
            .map_err(|e| TripError::Other(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TripError::Other(format!("Failed to parse config file: {}", e)))?;

        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| {
                    TripError::Other(format!("Failed to create config directory: {}", e))
                })?;
        }

        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| TripError::Other(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(config_path, contents)
            .map_err(|e| TripError::Other(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn home_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| TripError::Other("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home))
    }

    /// Get config file path
    pub fn get_config_path() -> Result<PathBuf> {
        Ok(Self::home_dir()?.join(".config").join("trip-recorder").join("config.json"))
    }

    /// Directory holding the trip buffer and the completed trip database
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join(".local").join("share").join("trip-recorder")),
        }
    }

    /// User-visible directory for exported trips
    pub fn export_dir(&self) -> Result<PathBuf> {
        match &self.export_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::home_dir()?.join("Downloads")),
        }
    }

    pub fn trips_db_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join("trips.db"))
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_millis(self.reconcile_interval_ms.max(50))
    }

    pub fn permissions(&self) -> ConfiguredPermissions {
        let background = if self.background_enabled {
            self.background_permission
        } else {
            PermissionState::Blocked
        };
        ConfiguredPermissions::new(self.foreground_permission, background)
    }

    /// Update serial port settings
    pub fn update_serial(&mut self, port: String, baudrate: u32) {
        self.source_type = "serial".to_string();
        self.serial_port = Some(port);
        self.serial_baudrate = Some(baudrate);
    }

    /// Update gpsd settings
    pub fn update_gpsd(&mut self, host: String, port: u16) {
        self.source_type = "gpsd".to_string();
        self.gpsd_host = Some(host);
        self.gpsd_port = Some(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::PermissionProvider;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();
        assert_eq!(config.source_type, "gpsd");
        assert_eq!(config.reconcile_interval(), Duration::from_secs(1));
    }

    #[test]
    fn test_update_serial() {
        let mut config = RecorderConfig::default();
        config.update_serial("/dev/ttyUSB0".to_string(), 115200);
        assert_eq!(config.source_type, "serial");
        assert_eq!(config.serial_port, Some("/dev/ttyUSB0".to_string()));
        assert_eq!(config.serial_baudrate, Some(115200));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = r#"{"source_type":"serial","background_permission":"denied"}"#;
        std::fs::write(&path, json).unwrap();

        let config = RecorderConfig::load_from(&path).unwrap();
        assert_eq!(config.source_type, "serial");
        assert_eq!(config.gpsd_port, Some(2947));
        assert_eq!(config.background_permission, PermissionState::Denied);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut config = RecorderConfig::default();
        config.data_dir = Some(dir.path().join("data"));
        config.update_gpsd("gps.local".to_string(), 2950);
        config.save_to(&path).unwrap();

        let loaded = RecorderConfig::load_from(&path).unwrap();
        assert_eq!(loaded.gpsd_host.as_deref(), Some("gps.local"));
        assert_eq!(loaded.gpsd_port, Some(2950));
        assert_eq!(loaded.data_dir().unwrap(), dir.path().join("data"));
        assert_eq!(loaded.trips_db_path().unwrap(), dir.path().join("data").join("trips.db"));
    }

    #[test]
    fn test_background_disabled_blocks_permission() {
        let mut config = RecorderConfig::default();
        config.background_enabled = false;
        assert_eq!(config.permissions().check().background, PermissionState::Blocked);
    }
}
