//! Error types for the hwl VPN supervisor
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for the hwl application
#[derive(Error, Debug)]
pub enum HwlError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors raised while starting the VPN core
    #[error("Supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Failures while bringing the VPN core up
///
/// Every variant is local to `Supervisor::start` and is fully rolled back
/// before it is returned: no pipe, process or background task survives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    #[error("Failed to create stdio pipes: {reason}")]
    PipeCreationFailed { reason: String },

    #[error("Failed to launch core {path}: {reason}")]
    LaunchFailed { path: String, reason: String },

    #[error("Failed to enroll core process {pid} in resource group: {reason}")]
    EnrollmentFailed { pid: u32, reason: String },

    #[error("Failed to write configuration to core stdin: {reason}")]
    WriteFailed { reason: String },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, HwlError>;
