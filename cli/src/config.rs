// Configuration management for the edgelink CLI
//
// Stored as JSON in:
// - Linux: ~/.config/edgelink/config.json
// - or the path given with `--config`

use anyhow::{Context, Result};
use edgelink_core::config::{DEFAULT_DEVICE_LABEL, DEFAULT_RFCOMM_CHANNEL};
use edgelink_core::platform::{DEFAULT_HCI, DEFAULT_INTERFACE};
use edgelink_core::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stable device id (DID)
    pub device_id: Option<String>,

    /// Human label appended to the adapter name
    pub device_label: String,

    /// Directory holding `<did>_private_key.pem`
    pub key_dir: Option<String>,

    /// JSON settings document holding the control-plane address
    pub settings_path: Option<String>,

    /// Wireless interface handed to NetworkManager
    pub wifi_interface: String,

    /// Bluetooth HCI device
    pub hci: String,

    /// RFCOMM channel
    pub channel: u8,

    /// Directory for daily rolling log files; stderr only when unset
    pub log_dir: Option<String>,

    /// Run system tools through `sudo -n`
    pub use_sudo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_id: None,
            device_label: DEFAULT_DEVICE_LABEL.to_string(),
            key_dir: None,
            settings_path: None,
            wifi_interface: DEFAULT_INTERFACE.to_string(),
            hci: DEFAULT_HCI.to_string(),
            channel: DEFAULT_RFCOMM_CHANNEL,
            log_dir: None,
            use_sudo: false,
        }
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("edgelink");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("edgelink");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    /// Config file location: `explicit` if given, else the default path
    pub fn config_file(explicit: Option<&Path>) -> Result<PathBuf> {
        match explicit {
            Some(path) => Ok(path.to_path_buf()),
            None => Ok(Self::config_dir()?.join("config.json")),
        }
    }

    /// Load config from `path`, creating it with defaults if missing
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    /// Save config to `path`
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value (not persisted until `save`)
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = |value: &str| (!value.trim().is_empty()).then(|| value.trim().to_string());
        match key {
            "device_id" => self.device_id = optional(value),
            "device_label" => {
                anyhow::ensure!(!value.trim().is_empty(), "device_label cannot be empty");
                self.device_label = value.trim().to_string();
            }
            "key_dir" => self.key_dir = optional(value),
            "settings_path" => self.settings_path = optional(value),
            "wifi_interface" => self.wifi_interface = value.trim().to_string(),
            "hci" => self.hci = value.trim().to_string(),
            "channel" => {
                self.channel = value.parse().context("Invalid channel number")?;
            }
            "log_dir" => self.log_dir = optional(value),
            "use_sudo" => {
                self.use_sudo = value.parse().context("Invalid boolean value")?;
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        Ok(())
    }

    /// Get a config value
    pub fn get(&self, key: &str) -> Option<String> {
        self.list()
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let auto = |value: &Option<String>| value.clone().unwrap_or_else(|| "(auto)".to_string());
        vec![
            ("device_id".to_string(), self.device_id.clone().unwrap_or_else(|| "(none)".to_string())),
            ("device_label".to_string(), self.device_label.clone()),
            ("key_dir".to_string(), auto(&self.key_dir)),
            ("settings_path".to_string(), auto(&self.settings_path)),
            ("wifi_interface".to_string(), self.wifi_interface.clone()),
            ("hci".to_string(), self.hci.clone()),
            ("channel".to_string(), self.channel.to_string()),
            ("log_dir".to_string(), self.log_dir.clone().unwrap_or_else(|| "(stderr)".to_string())),
            ("use_sudo".to_string(), self.use_sudo.to_string()),
        ]
    }

    /// Key directory, defaulting to `<data_dir>/keys`
    pub fn key_dir(&self) -> Result<PathBuf> {
        match &self.key_dir {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Ok(Self::data_dir()?.join("keys")),
        }
    }

    /// Settings document, defaulting to `<data_dir>/appsettings.json`
    pub fn settings_file(&self) -> Result<PathBuf> {
        match &self.settings_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(Self::data_dir()?.join("appsettings.json")),
        }
    }

    /// Server configuration with production timings
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            device_id: self.device_id.clone(),
            ..ServerConfig::default()
        }
        .with_device_label(self.device_label.clone())
        .with_channel(self.channel)
    }
}
