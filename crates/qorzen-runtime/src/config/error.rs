//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during configuration loading, validation, and
/// writes.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found at the specified path.
    #[error("configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Failed to read the configuration file.
    #[error("failed to read configuration file: {0}")]
    Read(#[from] std::io::Error),

    /// The configuration file extension is not a supported format.
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),

    /// Parse or merge failure from the layered providers.
    #[error("failed to load configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },

    /// A declarative constraint rejected a write.
    #[error("constraint violation on '{key}': {message}")]
    Constraint {
        /// The dotted key.
        key: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A write addressed a path through a non-object node.
    #[error("key '{key}' does not address an object path")]
    BadKeyPath {
        /// The dotted key.
        key: String,
    },

    /// Invalid port number (must be 1-65535).
    #[error("invalid port number: {0}")]
    InvalidPort(u16),

    /// Serialization failure while building the snapshot tree.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a constraint violation.
    pub fn constraint(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
