//! Orchestrator Configuration
//!
//! ```toml
//! app_group = "group.fos.connect"
//! toggle_rate_limit_ms = 500
//!
//! [tunnel_ids]
//! openvpn = "com.fos.connect.openvpn"
//! wireguard = "com.fos.connect.wireguard"
//!
//! [simulation]
//! transition_ms = 1000
//! ```

use crate::profile::VpnProtocol;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunnel identifiers per protocol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelIds {
    pub openvpn: String,
    pub wireguard: String,
}

impl Default for TunnelIds {
    fn default() -> Self {
        Self {
            openvpn: "com.fos.connect.openvpn".to_string(),
            wireguard: "com.fos.connect.wireguard".to_string(),
        }
    }
}

impl TunnelIds {
    pub fn for_protocol(&self, protocol: VpnProtocol) -> &str {
        match protocol {
            VpnProtocol::OpenVpn => &self.openvpn,
            VpnProtocol::WireGuard => &self.wireguard,
        }
    }
}

/// Timings of the simulated strategy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay between two status transitions
    pub transition_ms: u64,
    /// Settle delay before connecting with a new configuration
    pub settle_ms: u64,
    /// Interval of the byte counter ticker
    pub data_count_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            transition_ms: 1000,
            settle_ms: 2000,
            data_count_interval_ms: 3000,
        }
    }
}

impl SimulationConfig {
    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn data_count_interval(&self) -> Duration {
        Duration::from_millis(self.data_count_interval_ms)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Group shared with the tunnel process
    pub app_group: String,
    pub tunnel_ids: TunnelIds,
    /// Manual gateway/DNS/proxy/MTU overrides are honoured
    pub network_settings_supported: bool,
    /// On-demand rules are installed
    pub on_demand_supported: bool,
    /// Minimum interval between two toggles
    pub toggle_rate_limit_ms: Option<u64>,
    pub simulation: SimulationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            app_group: "group.fos.connect".to_string(),
            tunnel_ids: TunnelIds::default(),
            network_settings_supported: true,
            on_demand_supported: true,
            toggle_rate_limit_ms: None,
            simulation: SimulationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::IoError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Load from TOML string
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let config: Self =
            toml::from_str(content).map_err(|e| SettingsError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from JSON file
    pub fn from_json_file(path: &Path) -> Result<Self, SettingsError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SettingsError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Load from JSON string
    pub fn from_json(content: &str) -> Result<Self, SettingsError> {
        let config: Self =
            serde_json::from_str(content).map_err(|e| SettingsError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.app_group.trim().is_empty() {
            return Err(SettingsError::Invalid("app_group is empty".into()));
        }
        if self.tunnel_ids.openvpn.is_empty() || self.tunnel_ids.wireguard.is_empty() {
            return Err(SettingsError::Invalid("tunnel id is empty".into()));
        }
        if self.tunnel_ids.openvpn == self.tunnel_ids.wireguard {
            return Err(SettingsError::Invalid(
                "tunnel ids must differ per protocol".into(),
            ));
        }
        if self.simulation.data_count_interval_ms == 0 {
            return Err(SettingsError::Invalid(
                "data_count_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn toggle_rate_limit(&self) -> Option<Duration> {
        self.toggle_rate_limit_ms.map(Duration::from_millis)
    }

    /// Export as TOML
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
