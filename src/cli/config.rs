use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::protocol::settings::{PortSettings, PortSettingsRecord};

/// File format, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => ConfigFormat::Toml,
            _ => ConfigFormat::Json,
        }
    }
}

/// Multi-port configuration file.
///
/// ```toml
/// [[ports]]
/// port_id = "/dev/ttyUSB0"
/// baud_rate = 9600
/// data_bits = 8
/// stop_bits = 1
/// parity = "None"
/// flow_control = "None"
/// weight_start_pos = 1
/// weight_end_pos = 8
/// broadcast_port = 5050
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub ports: Vec<PortSettingsRecord>,
}

impl BridgeConfig {
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self> {
        Ok(match format {
            ConfigFormat::Json => Self::from_json(content)?,
            ConfigFormat::Toml => Self::from_toml(content)?,
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::parse(&content, ConfigFormat::from_path(path))
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = match ConfigFormat::from_path(path) {
            ConfigFormat::Json => self.to_json()?,
            ConfigFormat::Toml => self.to_toml()?,
        };
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write configuration file {}", path.display()))?;
        log::info!("saved {} port(s) to {}", self.ports.len(), path.display());
        Ok(())
    }

    /// Settings for every configured port, with clamping rules applied.
    pub fn port_settings(&self) -> Vec<PortSettings> {
        self.ports.iter().cloned().map(PortSettings::from).collect()
    }
}
