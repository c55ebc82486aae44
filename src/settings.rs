//! Driver configuration
//!
//! Settings are plain serde data so they can be embedded in the host's own
//! configuration file or loaded from a standalone JSON file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Longest client name MidiShare accepts (Str32 minus the terminator)
pub const MAX_CLIENT_NAME_LEN: usize = 31;

pub const MIDI_CHANNELS: usize = 16;
pub const MIDI_PORTS: usize = 256;

/// How the driver registers itself with MidiShare
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientMode {
    /// Regular MidiShare application, connected to the MidiShare input
    #[default]
    Application,
    /// MidiShare driver exposing an output slot
    Driver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    pub client_name: String,
    pub mode: ClientMode,
    /// Version reported when registering in driver mode
    pub driver_version: i16,
    /// Override for the MidiShare shared library location
    pub library_path: Option<PathBuf>,
    /// Accepted channels, all when unset
    pub channels: Option<Vec<u8>>,
    /// Accepted ports, all when unset
    pub ports: Option<Vec<u8>>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            client_name: "synth".to_string(),
            mode: ClientMode::Application,
            driver_version: 100,
            library_path: None,
            channels: None,
            ports: None,
        }
    }
}

impl DriverSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading driver settings from {:?}", path);
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_name.is_empty() {
            return Err(DriverError::Settings("client name is empty".to_string()));
        }
        if self.client_name.len() > MAX_CLIENT_NAME_LEN {
            return Err(DriverError::Settings(format!(
                "client name '{}' is longer than {} bytes",
                self.client_name, MAX_CLIENT_NAME_LEN
            )));
        }
        if self.client_name.contains('\0') {
            return Err(DriverError::Settings(
                "client name contains a NUL byte".to_string(),
            ));
        }
        if let Some(channels) = &self.channels {
            if let Some(bad) = channels.iter().find(|&&c| c as usize >= MIDI_CHANNELS) {
                return Err(DriverError::Settings(format!("channel {} out of range 0-15", bad)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = DriverSettings::default();
        assert_eq!(settings.client_name, "synth");
        assert_eq!(settings.mode, ClientMode::Application);
        assert_eq!(settings.driver_version, 100);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let settings =
            DriverSettings::from_json(r#"{ "mode": "driver", "channels": [0, 9] }"#).unwrap();
        assert_eq!(settings.mode, ClientMode::Driver);
        assert_eq!(settings.channels, Some(vec![0, 9]));
        assert_eq!(settings.client_name, "synth");
        assert!(settings.ports.is_none());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            DriverSettings::from_json(r#"{ "client_name": "" }"#),
            Err(DriverError::Settings(_))
        ));
        let long = format!(r#"{{ "client_name": "{}" }}"#, "x".repeat(32));
        assert!(matches!(
            DriverSettings::from_json(&long),
            Err(DriverError::Settings(_))
        ));
        assert!(matches!(
            DriverSettings::from_json(r#"{ "channels": [16] }"#),
            Err(DriverError::Settings(_))
        ));
        assert!(matches!(
            DriverSettings::from_json(r#"{ "mode": "plugin" }"#),
            Err(DriverError::Config(_))
        ));
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "midishare-driver-settings-{}.json",
            std::process::id()
        ));
        fs::write(&path, r#"{ "client_name": "fluid", "ports": [0, 1] }"#).unwrap();

        let settings = DriverSettings::load(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(settings.client_name, "fluid");
        assert_eq!(settings.ports, Some(vec![0, 1]));
    }
}
