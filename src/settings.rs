use crate::playback::PlaybackConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Persistent playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub provider: String,
    pub initial_delay_ms: u64,
    pub hold_interval_ms: u64,
    pub fallback_spacing_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: "gps".to_string(),
            initial_delay_ms: 0,
            hold_interval_ms: 1000,
            fallback_spacing_ms: 2000,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("trackplay").join("settings.json"))
    }

    /// Load from `path`, or the default location. Falls back to defaults
    /// when the file is missing or cannot be read.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::config_path) else {
            return Self::default();
        };

        if !path.exists() {
            debug!("No settings at {:?}, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    warn!("Invalid settings file {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Unable to read settings {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Write to `path`, or the default location
    pub fn save(&self, path: Option<&Path>) -> io::Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(Self::config_path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no config directory"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            provider: self.provider.clone(),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            hold_interval: Duration::from_millis(self.hold_interval_ms),
            fallback_spacing: Duration::from_millis(self.fallback_spacing_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.json")));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let settings = Settings {
            provider: "network".to_string(),
            initial_delay_ms: 250,
            ..Settings::default()
        };
        assert_eq!(settings.save(Some(&path)).unwrap(), path);
        assert_eq!(Settings::load(Some(&path)), settings);
    }

    #[test]
    fn test_partial_and_invalid_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");

        fs::write(&path, r#"{"hold_interval_ms": 500}"#).unwrap();
        let settings = Settings::load(Some(&path));
        assert_eq!(settings.hold_interval_ms, 500);
        assert_eq!(settings.provider, "gps");

        fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load(Some(&path)), Settings::default());
    }

    #[test]
    fn test_playback_config() {
        let config = Settings::default().playback_config();
        assert_eq!(config.hold_interval, Duration::from_secs(1));
        assert_eq!(config.fallback_spacing, Duration::from_secs(2));
        assert_eq!(config.initial_delay, Duration::ZERO);
    }
}
