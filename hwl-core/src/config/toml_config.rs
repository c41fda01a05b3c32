//! TOML configuration file I/O
//!
//! Handles loading and saving supervisor settings to/from TOML files
//! in the user's configuration directory.

use crate::config::SupervisorConfig;
use crate::error::{ConfigError, HwlError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Complete TOML configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Supervisor settings
    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

impl TomlConfig {
    /// Create a new TOML configuration
    pub fn new(supervisor: SupervisorConfig) -> Self {
        Self { supervisor }
    }
}

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "HWL_CONFIG_DIR";

/// Get the default configuration directory
///
/// Returns ~/.config/hwl, or HWL_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, HwlError> {
    if let Ok(config_dir) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| {
        HwlError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("hwl"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, HwlError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

/// Check if a configuration file exists
pub fn config_exists() -> Result<bool, HwlError> {
    let config_path = get_config_path()?;
    Ok(config_path.exists())
}

/// Load settings from the default TOML file, falling back to defaults
///
/// A missing file is not an error: the supervisor runs with built-in defaults.
pub fn load_config() -> Result<SupervisorConfig, HwlError> {
    let config_path = get_config_path()?;
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Ok(SupervisorConfig::default());
    }
    load_config_from_path(&config_path)
}

/// Load settings from a specific TOML file
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<SupervisorConfig, HwlError> {
    let contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HwlError::Config(ConfigError::LoadFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        }),
        _ => HwlError::Config(ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        }),
    })?;

    let config: TomlConfig = toml::from_str(&contents)?;

    config
        .supervisor
        .validate()
        .map_err(|e| HwlError::Config(ConfigError::ValidationError { message: e }))?;

    info!("Loaded supervisor configuration from {:?}", path.as_ref());
    Ok(config.supervisor)
}

/// Save settings to the default TOML file
pub fn save_config(config: &SupervisorConfig) -> Result<PathBuf, HwlError> {
    let config_path = get_config_path()?;
    save_config_to_path(config, &config_path)?;
    Ok(config_path)
}

/// Save settings to a specific TOML file
pub fn save_config_to_path<P: AsRef<Path>>(
    config: &SupervisorConfig,
    path: P,
) -> Result<(), HwlError> {
    config
        .validate()
        .map_err(|e| HwlError::Config(ConfigError::ValidationError { message: e }))?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            HwlError::Config(ConfigError::IoError {
                message: format!("Failed to create config directory: {}", e),
            })
        })?;
    }

    let toml_string = toml::to_string_pretty(&TomlConfig::new(config.clone()))?;

    std::fs::write(&path, toml_string).map_err(|_e| {
        HwlError::Config(ConfigError::SaveFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        })
    })?;

    info!("Saved supervisor configuration to {:?}", path.as_ref());
    Ok(())
}
