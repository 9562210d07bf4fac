//! Persisted Preferences
//!
//! Small TOML file holding the active profile id and tunnel logging
//! preferences. Without a path the preferences live in memory only.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Preference values
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceValues {
    pub active_profile_id: Option<Uuid>,
    /// Mask addresses and credentials in tunnel logs
    pub masks_private_data: bool,
    /// Line format of the tunnel debug log
    pub tunnel_log_format: Option<String>,
}

impl Default for PreferenceValues {
    fn default() -> Self {
        Self {
            active_profile_id: None,
            masks_private_data: true,
            tunnel_log_format: None,
        }
    }
}

/// Preferences bound to an optional backing file
#[derive(Debug, Clone, Default)]
pub struct Preferences {
    path: Option<PathBuf>,
    values: PreferenceValues,
}

impl Preferences {
    /// In-memory preferences
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load from `path`, starting from defaults when the file does not exist
    pub fn load(path: &Path) -> Result<Self, PreferencesError> {
        let values = match std::fs::read_to_string(path) {
            Ok(content) => {
                toml::from_str(&content).map_err(|e| PreferencesError::ParseError(e.to_string()))?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {}, using defaults", path.display());
                PreferenceValues::default()
            }
            Err(e) => return Err(PreferencesError::IoError(e.to_string())),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            values,
        })
    }

    pub fn values(&self) -> &PreferenceValues {
        &self.values
    }

    pub fn active_profile_id(&self) -> Option<Uuid> {
        self.values.active_profile_id
    }

    pub fn set_active_profile_id(&mut self, id: Option<Uuid>) -> Result<(), PreferencesError> {
        self.update(|values| values.active_profile_id = id)
    }

    pub fn set_masks_private_data(&mut self, masks: bool) -> Result<(), PreferencesError> {
        self.update(|values| values.masks_private_data = masks)
    }

    pub fn set_tunnel_log_format(&mut self, format: Option<String>) -> Result<(), PreferencesError> {
        self.update(|values| values.tunnel_log_format = format)
    }

    /// Apply `change` and rewrite the backing file if anything changed
    fn update(&mut self, change: impl FnOnce(&mut PreferenceValues)) -> Result<(), PreferencesError> {
        let mut values = self.values.clone();
        change(&mut values);
        if values == self.values {
            return Ok(());
        }
        self.values = values;
        self.persist()
    }

    fn persist(&self) -> Result<(), PreferencesError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = toml::to_string_pretty(&self.values)
            .map_err(|e| PreferencesError::SerializeError(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| {
            warn!("Unable to write preferences to {}: {}", path.display(), e);
            PreferencesError::IoError(e.to_string())
        })
    }
}

/// Preferences errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreferencesError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),
}
