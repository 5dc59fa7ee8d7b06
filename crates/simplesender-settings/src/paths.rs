//! Settings persistence.
//!
//! Directory resolution order: `SIMPLE_SENDER_CONFIG_DIR`, the platform
//! config directory, `~/.simple_sender`, and finally the temp dir. Saves
//! are atomic (temp file + rename) and keep one `.backup` generation.

use std::fs;
use std::path::{Path, PathBuf};

use simplesender_core::{ConfigError, Result};

use crate::config::Config;

const SETTINGS_FILENAME: &str = "settings.json";
const BACKUP_SUFFIX: &str = ".backup";
const TEMP_SUFFIX: &str = ".tmp";

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "SIMPLE_SENDER_CONFIG_DIR";

/// Resolve the settings directory, creating it when possible.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(base) = dirs::config_dir() {
        return base.join("SimpleSender");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".simple_sender");
    }
    std::env::temp_dir().join("simple_sender")
}

/// Full path of the settings file; falls back through the chain when the
/// preferred directory cannot be created.
pub fn settings_path() -> PathBuf {
    let preferred = config_dir();
    if fs::create_dir_all(&preferred).is_ok() {
        return preferred.join(SETTINGS_FILENAME);
    }
    tracing::warn!(
        "Failed to create settings directory {}",
        preferred.display()
    );
    if let Some(home) = dirs::home_dir() {
        let fallback = home.join(".simple_sender");
        if fs::create_dir_all(&fallback).is_ok() {
            return fallback.join(SETTINGS_FILENAME);
        }
    }
    std::env::temp_dir().join(SETTINGS_FILENAME)
}

/// Load/save wrapper around one settings file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the default location.
    pub fn new() -> Self {
        Self {
            path: settings_path(),
        }
    }

    /// Store at an explicit path.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The settings file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config; missing file yields defaults, a corrupt file
    /// falls back to the backup before giving up.
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        match self.read_config(&self.path) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::error!("Settings load failed: {}", err);
                let backup = self.backup_path();
                if backup.exists() {
                    tracing::warn!("Falling back to settings backup");
                    return self.read_config(&backup);
                }
                Err(err)
            }
        }
    }

    fn read_config(&self, path: &Path) -> Result<Config> {
        let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&text).map_err(|e| {
            ConfigError::LoadFailed {
                reason: format!("{}: {}", path.display(), e),
            }
            .into()
        })
    }

    /// Save atomically: write a temp file, back up the old file, rename.
    pub fn save(&self, config: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let text = serde_json::to_string_pretty(config).map_err(|e| ConfigError::SaveFailed {
            reason: e.to_string(),
        })?;

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| SETTINGS_FILENAME.to_string());
        let temp = self.path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));
        fs::write(&temp, text).map_err(ConfigError::Io)?;

        if self.path.exists() {
            let _ = fs::copy(&self.path, self.backup_path());
        }
        fs::rename(&temp, &self.path).map_err(ConfigError::Io)?;
        tracing::debug!("Settings saved to {}", self.path.display());
        Ok(())
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| SETTINGS_FILENAME.to_string());
        name.push_str(BACKUP_SUFFIX);
        self.path.with_file_name(name)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("settings.json"));
        let config = store.load().unwrap();
        assert_eq!(config.connection.baud_rate, 115_200);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("settings.json"));
        let mut config = Config::default();
        config.connection.last_port = Some("/dev/ttyACM0".to_string());
        config.streaming.dry_run_sanitize = true;
        store.save(&config).unwrap();
        let back = store.load().unwrap();
        assert_eq!(back.connection.last_port.as_deref(), Some("/dev/ttyACM0"));
        assert!(back.streaming.dry_run_sanitize);
    }

    #[test]
    fn corrupt_file_uses_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::at(dir.path().join("settings.json"));
        let mut config = Config::default();
        config.connection.last_port = Some("COM7".to_string());
        store.save(&config).unwrap();
        // A second save creates the backup of the good file.
        store.save(&config).unwrap();
        std::fs::write(store.path(), "{not json").unwrap();
        let back = store.load().unwrap();
        assert_eq!(back.connection.last_port.as_deref(), Some("COM7"));
    }
}
