// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Configuration module.
//!
//! Handles loading settings from TOML and applying command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::bluetooth::SPP_UUID;
use crate::error::BridgeError;

const APP_DIR: &str = "rfcomm-bridge";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Bluetooth settings.
    pub bluetooth: BluetoothConfig,

    /// TCP server settings.
    pub tcp: TcpConfig,

    /// Relay settings.
    pub relay: RelayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Accepted device-name substrings, in priority order.
    pub device_names: Vec<String>,

    /// Connect to this address and skip name matching.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Adapter to use, e.g. "hci0". The default adapter otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Connect to a fixed RFCOMM channel instead of looking up the SPP service.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rfcomm_channel: Option<u8>,

    /// Upper bound for the single connection attempt.
    pub connect_timeout_secs: u64,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            device_names: vec![
                "UV-PRO".to_string(),
                "VR-N76".to_string(),
                "GA-5WB".to_string(),
            ],
            address: None,
            adapter: None,
            rfcomm_channel: None,
            connect_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// Bind host. "0.0.0.0" listens on all interfaces.
    pub host: String,

    pub port: u16,

    /// Maximum concurrent clients. Unlimited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_clients: Option<usize>,

    /// Pause after a failed accept before trying again.
    pub accept_retry_ms: u64,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_clients: None,
            accept_retry_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bytes read per relay iteration.
    pub buffer_size: usize,

    /// Hex-dump every relayed chunk at info level.
    pub log_payloads: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1024,
            log_payloads: false,
        }
    }
}

/// Values given on the command line; `None` keeps the file setting.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub device_names: Vec<String>,
    pub address: Option<String>,
    pub max_clients: Option<usize>,
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

impl Config {
    /// Load configuration from the default location, writing defaults there
    /// on first run.
    pub fn load() -> Result<Self> {
        let config_path = default_config_path();

        if config_path.exists() {
            return Self::load_from(&config_path);
        }

        let config = Self::default();
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        config.save_to(&config_path)?;
        Ok(config)
    }

    /// Load configuration from an explicit file, which must exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(host) = overrides.host {
            self.tcp.host = host;
        }
        if let Some(port) = overrides.port {
            self.tcp.port = port;
        }
        if !overrides.device_names.is_empty() {
            self.bluetooth.device_names = overrides.device_names;
        }
        if overrides.address.is_some() {
            self.bluetooth.address = overrides.address;
        }
        if overrides.max_clients.is_some() {
            self.tcp.max_clients = overrides.max_clients;
        }
    }

    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> std::result::Result<(), BridgeError> {
        if self.relay.buffer_size == 0 {
            return Err(BridgeError::Config(
                "relay.buffer_size must be greater than zero".to_string(),
            ));
        }

        if self.tcp.max_clients == Some(0) {
            return Err(BridgeError::Config(
                "tcp.max_clients must be at least 1 when set".to_string(),
            ));
        }

        match &self.bluetooth.address {
            Some(address) => {
                if !is_bluetooth_address(address) {
                    return Err(BridgeError::InvalidAddress(address.clone()));
                }
            }
            None => {
                if self.bluetooth.device_names.iter().all(|n| n.trim().is_empty()) {
                    return Err(BridgeError::Config(
                        "bluetooth.device_names needs at least one name when no address is set"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Human-readable summary for the startup log.
    pub fn describe(&self) -> String {
        let target = match &self.bluetooth.address {
            Some(address) => address.clone(),
            None => format!("first paired device matching {:?}", self.bluetooth.device_names),
        };
        format!(
            "{} (SPP {}) <-> tcp://{}:{}",
            target, SPP_UUID, self.tcp.host, self.tcp.port
        )
    }
}

#[cfg(feature = "bluez")]
fn is_bluetooth_address(address: &str) -> bool {
    address.parse::<bluer::Address>().is_ok()
}

/// Six colon-separated hex octets, e.g. "AA:BB:CC:DD:EE:FF".
#[cfg(not(feature = "bluez"))]
fn is_bluetooth_address(address: &str) -> bool {
    let octets: Vec<&str> = address.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tcp.host, "0.0.0.0");
        assert_eq!(config.tcp.port, 8001);
        assert_eq!(config.relay.buffer_size, 1024);
        assert_eq!(config.bluetooth.device_names, vec!["UV-PRO", "VR-N76", "GA-5WB"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[tcp]\nport = 9000\nmax_clients = 2\n\n[bluetooth]\ndevice_names = [\"UV-PRO\"]\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.tcp.port, 9000);
        assert_eq!(config.tcp.max_clients, Some(2));
        assert_eq!(config.tcp.host, "0.0.0.0");
        assert_eq!(config.bluetooth.device_names, vec!["UV-PRO"]);
        assert_eq!(config.relay, RelayConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.bluetooth.rfcomm_channel = Some(3);
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Config::load_from(&dir.path().join("absent.toml")).is_err());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            port: Some(9100),
            device_names: vec!["GA-5WB".to_string()],
            ..Default::default()
        });

        assert_eq!(config.tcp.port, 9100);
        assert_eq!(config.tcp.host, "0.0.0.0");
        assert_eq!(config.bluetooth.device_names, vec!["GA-5WB"]);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.relay.buffer_size = 0;
        assert!(matches!(config.validate(), Err(BridgeError::Config(_))));

        let mut config = Config::default();
        config.bluetooth.device_names = vec![" ".to_string()];
        assert!(config.validate().is_err());

        config.bluetooth.address = Some("AA:BB:CC:DD:EE:FF".to_string());
        assert!(config.validate().is_ok());

        config.bluetooth.address = Some("AA:BB".to_string());
        assert!(matches!(config.validate(), Err(BridgeError::InvalidAddress(_))));

        let mut config = Config::default();
        config.tcp.max_clients = Some(0);
        assert!(config.validate().is_err());
    }
}
