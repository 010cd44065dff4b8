use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::{
    normalize_address, CharacteristicKind, ScanTimings, SessionTimings, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_LIVENESS_POLL_MS, DEFAULT_POST_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_SECS,
    DEFAULT_SCAN_DURATION_SECS, DEFAULT_SCAN_PAUSE_MS, DEFAULT_SERVER_URL, DEFAULT_STATUS_INTERVAL_SECS,
    DEFAULT_TRAINER_ADDRESS, DEFAULT_TRAINER_NAME, DEFAULT_WATCH_ADDRESS, DEFAULT_WATCH_NAME,
};
use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "sensor_bridge.json";

/// A sensor to keep connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Name used in logs and status lines
    pub name: String,
    /// MAC address; `:`, `-` or `_` separated, any case
    pub address: String,
    /// Characteristics to subscribe to, in order
    pub characteristics: Vec<CharacteristicKind>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Endpoint the metrics are POSTed to.
    pub server_url: String,
    pub post_interval_ms: u64,
    pub status_interval_secs: u64,

    /// Backoff after a failed connect; also how long the scanner waits
    /// before looking for already found devices again.
    pub reconnect_delay_secs: u64,
    pub scan_timeout_secs: u64,
    pub scan_pause_ms: u64,
    pub liveness_poll_ms: u64,
    pub connect_timeout_secs: u64,

    /// Default log filter; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub devices: Vec<DeviceConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            server_url: DEFAULT_SERVER_URL.to_string(),
            post_interval_ms: DEFAULT_POST_INTERVAL_MS,
            status_interval_secs: DEFAULT_STATUS_INTERVAL_SECS,
            reconnect_delay_secs: DEFAULT_RECONNECT_DELAY_SECS,
            scan_timeout_secs: DEFAULT_SCAN_DURATION_SECS,
            scan_pause_ms: DEFAULT_SCAN_PAUSE_MS,
            liveness_poll_ms: DEFAULT_LIVENESS_POLL_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            log_level: "info".to_string(),
            devices: vec![
                DeviceConfig {
                    name: DEFAULT_TRAINER_NAME.to_string(),
                    address: DEFAULT_TRAINER_ADDRESS.to_string(),
                    characteristics: vec![
                        CharacteristicKind::CyclingPower,
                        CharacteristicKind::CscMeasurement,
                    ],
                },
                DeviceConfig {
                    name: DEFAULT_WATCH_NAME.to_string(),
                    address: DEFAULT_WATCH_ADDRESS.to_string(),
                    characteristics: vec![CharacteristicKind::HeartRate],
                },
            ],
        }
    }
}

impl BridgeConfig {
    /// Loads and validates the config file at `path`. A missing file yields
    /// the defaults.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path);
            return Self::default().validated();
        }

        let config_json = fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&config_json).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        info!("Config loaded from {:?}", path);
        config.validated()
    }

    /// Checks the device list and normalises every address.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }

        let mut addresses = HashSet::new();
        let mut owners = HashMap::new();

        for device in &mut self.devices {
            device.address = normalize_address(&device.address).ok_or_else(|| ConfigError::InvalidAddress {
                name: device.name.clone(),
                address: device.address.clone(),
            })?;
            if !addresses.insert(device.address.clone()) {
                return Err(ConfigError::DuplicateAddress(device.address.clone()));
            }
            if device.characteristics.is_empty() {
                return Err(ConfigError::NoCharacteristics(device.name.clone()));
            }

            for kind in &device.characteristics {
                let metric = kind.metric();
                if let Some(first) = owners.get(&metric).filter(|first| **first != device.name) {
                    return Err(ConfigError::DuplicateOwner {
                        metric,
                        first: String::from(first),
                        second: device.name.clone(),
                    });
                }
                owners.insert(metric, device.name.clone());
            }
        }

        Ok(self)
    }

    pub fn scan_timings(&self) -> ScanTimings {
        ScanTimings {
            scan_timeout: Duration::from_secs(self.scan_timeout_secs),
            scan_pause: Duration::from_millis(self.scan_pause_ms),
            recheck_delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }

    pub fn session_timings(&self) -> SessionTimings {
        SessionTimings {
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            liveness_poll: Duration::from_millis(self.liveness_poll_ms),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn post_interval(&self) -> Duration {
        Duration::from_millis(self.post_interval_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }
}
