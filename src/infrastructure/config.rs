//! Configuration file management.
//!
//! Handles loading and saving TOML configuration files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AppConfig, AppError, Result};

/// Default configuration file content.
const DEFAULT_CONFIG: &str = r#"# AgriSync Configuration
# Auto-generated - edit as needed

[sync]
# Base URL of the sync backend
server_url = "http://localhost:5000/api"

# Upper bound for each remote call in seconds
request_timeout_secs = 30

# Backoff after failed syncs: base delay doubles per failure, up to the max
backoff_base_secs = 2
backoff_max_secs = 300

# Sync automatically when connectivity returns
auto_sync = true

[storage]
# Database file inside the data directory
database_file = "agrisync.db"

[paths]
# Custom data directory (optional, defaults to ~/.agrisync)
# data_dir = "/custom/path"
"#;

/// Get the path to the default configuration file.
#[must_use]
pub fn config_file_path() -> PathBuf {
    AppConfig::default_data_dir().join("config.toml")
}

/// Load configuration from the default file, or defaults if it does not exist.
///
/// # Errors
/// Returns error if file exists but cannot be read or parsed.
pub fn load_config() -> Result<AppConfig> {
    let config_path = config_file_path();

    if config_path.exists() {
        load_config_from_file(&config_path)
    } else {
        tracing::debug!(path = %config_path.display(), "No config file, using defaults");
        Ok(AppConfig::default())
    }
}

/// Load configuration from a specific file.
///
/// # Errors
/// Returns error if file cannot be read or parsed.
pub fn load_config_from_file(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::io(format!("Failed to read config file: {}", path.display()), e))?;

    toml::from_str(&content).map_err(|e| AppError::Config {
        message: format!("Failed to parse config file: {e}"),
    })
}

/// Save configuration to its file inside the data directory.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config(config: &AppConfig) -> Result<()> {
    save_config_to(&config.config_file_path(), config)
}

/// Save configuration to `config_path`, creating parent directories.
///
/// # Errors
/// Returns error if file cannot be written.
pub fn save_config_to(config_path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| AppError::Config {
        message: format!("Failed to serialize config: {e}"),
    })?;

    fs::write(config_path, content).map_err(|e| {
        AppError::io(
            format!("Failed to write config file: {}", config_path.display()),
            e,
        )
    })?;

    tracing::info!(path = %config_path.display(), "Configuration saved");

    Ok(())
}

/// Create the commented default configuration file if it doesn't exist.
///
/// Returns whether a file was written.
///
/// # Errors
/// Returns error if file cannot be created.
pub fn ensure_config_exists(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| AppError::io("Failed to create config directory", e))?;
    }

    fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| AppError::io("Failed to create default config", e))?;

    tracing::info!(path = %path.display(), "Created default configuration");

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_parses() {
        let config: AppConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        let defaults = AppConfig::default();
        assert_eq!(config.sync.server_url, defaults.sync.server_url);
        assert_eq!(config.sync.request_timeout_secs, 30);
        assert_eq!(config.sync.backoff_max_secs, 300);
        assert_eq!(config.storage.database_file, "agrisync.db");
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str("[sync]\nrequest_timeout_secs = 5\n").unwrap();
        assert_eq!(config.sync.request_timeout_secs, 5);
        assert_eq!(config.sync.backoff_base_secs, 2);
        assert!(config.paths.data_dir.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().to_path_buf());
        config.sync.server_url = "https://agri.example.org/api".into();

        save_config(&config).unwrap();
        let loaded = load_config_from_file(&dir.path().join("config.toml")).unwrap();

        assert_eq!(loaded.sync.server_url, "https://agri.example.org/api");
        assert_eq!(loaded.paths.data_dir.as_deref(), Some(dir.path()));
    }

    #[test]
    fn test_save_to_explicit_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("elsewhere").join("farm.toml");
        let mut config = AppConfig::default();
        config.paths.data_dir = Some(dir.path().join("data"));
        config.sync.server_url = "https://agri.example.org/api".into();

        save_config_to(&path, &config).unwrap();

        let loaded = load_config_from_file(&path).unwrap();
        assert_eq!(loaded.sync.server_url, "https://agri.example.org/api");
        assert!(!config.config_file_path().exists());
    }

    #[test]
    fn test_ensure_config_exists_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");

        assert!(ensure_config_exists(&path).unwrap());
        assert!(!ensure_config_exists(&path).unwrap());
        assert!(load_config_from_file(&path).is_ok());
    }

    #[test]
    fn test_malformed_config_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[sync\nserver_url = ").unwrap();

        assert!(matches!(
            load_config_from_file(&path),
            Err(AppError::Config { .. })
        ));
    }
}
