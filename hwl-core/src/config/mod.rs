//! Configuration module
//!
//! Describes where the VPN core lives, how it is invoked, and the timing and
//! buffering limits the supervisor applies to it.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod toml_config;

/// File name of the core binary shipped next to the supervisor
pub const DEFAULT_CORE_EXECUTABLE: &str = "sing-box";

/// Arguments telling the core to read its configuration from stdin
pub const DEFAULT_CORE_ARGS: [&str; 3] = ["run", "-c", "stdin"];

/// Largest accepted log buffer; every slot is allocated up front
pub const MAX_LOG_BUFFER_CAPACITY: usize = 1 << 16;

/// Supervisor settings
///
/// Every field has a default, so an empty `[supervisor]` table (or no file at
/// all) yields a working configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Core executable; relative paths resolve against the install directory
    pub core_executable: PathBuf,

    /// Fixed argument list passed to the core
    pub core_args: Vec<String>,

    /// Overrides the directory of the running executable as resolution base
    pub install_dir: Option<PathBuf>,

    /// Working directory of the core (default: install directory)
    pub working_dir: Option<PathBuf>,

    /// Grace period between SIGTERM and SIGKILL when stopping, in milliseconds
    pub stop_grace_ms: u64,

    /// Upper bound for the log pump to reach end-of-stream on stop, in milliseconds
    pub drain_timeout_ms: u64,

    /// Number of log lines buffered per subscriber before the oldest are dropped
    pub log_buffer_capacity: usize,
}

impl SupervisorConfig {
    /// Create a configuration for a specific core executable and argument list
    pub fn new(core_executable: impl Into<PathBuf>, core_args: Vec<String>) -> Self {
        Self {
            core_executable: core_executable.into(),
            core_args,
            ..Self::default()
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.core_executable.as_os_str().is_empty() {
            return Err("Core executable cannot be empty".to_string());
        }

        if self.log_buffer_capacity == 0 {
            return Err("Log buffer capacity cannot be zero".to_string());
        }

        if self.log_buffer_capacity > MAX_LOG_BUFFER_CAPACITY {
            return Err(format!(
                "Log buffer capacity cannot exceed {}",
                MAX_LOG_BUFFER_CAPACITY
            ));
        }

        if let Some(dir) = &self.install_dir {
            if !dir.is_absolute() {
                return Err(format!(
                    "Install directory must be absolute: {}",
                    dir.display()
                ));
            }
        }

        Ok(())
    }

    /// Directory the core is expected to ship in
    ///
    /// Defaults to the directory containing the running executable, not the
    /// process working directory.
    pub fn install_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.install_dir {
            return Ok(dir.clone());
        }

        let exe = std::env::current_exe().map_err(|e| ConfigError::IoError {
            message: format!("Failed to locate running executable: {}", e),
        })?;

        exe.parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::IoError {
                message: format!("Executable has no parent directory: {}", exe.display()),
            })
    }

    /// Absolute path of the core executable
    pub fn core_path(&self) -> Result<PathBuf, ConfigError> {
        if self.core_executable.is_absolute() {
            return Ok(self.core_executable.clone());
        }
        Ok(self.install_dir()?.join(&self.core_executable))
    }

    /// Directory the core is started in
    pub fn core_working_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.working_dir {
            Some(dir) => Ok(dir.clone()),
            None => self.install_dir(),
        }
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            core_executable: PathBuf::from(DEFAULT_CORE_EXECUTABLE),
            core_args: DEFAULT_CORE_ARGS.iter().map(|s| s.to_string()).collect(),
            install_dir: None,
            working_dir: None,
            stop_grace_ms: 2000,
            drain_timeout_ms: 5000,
            log_buffer_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_invokes_core_with_stdin_config() {
        let config = SupervisorConfig::default();

        assert_eq!(config.core_executable, PathBuf::from("sing-box"));
        assert_eq!(config.core_args, vec!["run", "-c", "stdin"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_relative_core_resolves_against_install_dir() {
        let config = SupervisorConfig {
            install_dir: Some(PathBuf::from("/opt/hwl")),
            ..SupervisorConfig::default()
        };

        assert_eq!(config.core_path().unwrap(), PathBuf::from("/opt/hwl/sing-box"));
        assert_eq!(config.core_working_dir().unwrap(), PathBuf::from("/opt/hwl"));
    }

    #[test]
    fn test_absolute_core_is_used_as_is() {
        let config = SupervisorConfig::new("/bin/sh", vec!["-c".to_string(), "cat".to_string()]);

        assert_eq!(config.core_path().unwrap(), PathBuf::from("/bin/sh"));
    }

    #[test]
    fn test_default_install_dir_is_executable_dir() {
        let config = SupervisorConfig::default();
        let exe = std::env::current_exe().unwrap();

        assert_eq!(config.install_dir().unwrap(), exe.parent().unwrap());
    }

    #[test]
    fn test_invalid_config_validation() {
        let invalid_configs = vec![
            SupervisorConfig::new("", vec![]),
            SupervisorConfig {
                log_buffer_capacity: 0,
                ..SupervisorConfig::default()
            },
            SupervisorConfig {
                log_buffer_capacity: MAX_LOG_BUFFER_CAPACITY + 1,
                ..SupervisorConfig::default()
            },
            SupervisorConfig {
                log_buffer_capacity: usize::MAX,
                ..SupervisorConfig::default()
            },
            SupervisorConfig {
                install_dir: Some(PathBuf::from("relative/dir")),
                ..SupervisorConfig::default()
            },
        ];

        for config in invalid_configs {
            assert!(config.validate().is_err());
        }

        let largest = SupervisorConfig {
            log_buffer_capacity: MAX_LOG_BUFFER_CAPACITY,
            ..SupervisorConfig::default()
        };
        assert!(largest.validate().is_ok());
    }
}
