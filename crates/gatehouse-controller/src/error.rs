use std::path::PathBuf;

use gatehouse_hardware::HardwareError;
use gatehouse_protocol::ProtocolError;
use gatehouse_relay::RelayError;
use gatehouse_storage::StorageError;
use thiserror::Error;

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// One or more settings are unusable; problems are joined with `; `.
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

/// Errors that prevent a gate from starting.
#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Hardware setup failed: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Relay setup failed: {0}")]
    Relay(#[from] RelayError),

    #[error("Offline store setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A configured reader has no device attached.
    #[error("No device supplied for reader {0}")]
    MissingReader(String),
}

/// Result type alias for gate assembly.
pub type Result<T> = std::result::Result<T, GateError>;
