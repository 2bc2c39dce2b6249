use thiserror::Error;

use crate::config_store::ConfigName;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Invalid port {0}. Port must be between 9001 and 9999.")]
    InvalidPort(i64),

    #[error("Port {0} is already in use.")]
    PortInUse(u16),

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(String),

    #[error("A configuration named {0} already exists. Please upload with a different filename.")]
    DuplicateName(ConfigName),

    #[error("Invalid configuration file: {0}")]
    InvalidFormat(String),

    #[error("No mock server instance on port {0}")]
    InstanceNotFound(i64),

    #[error("Configuration {0} is currently in use by a running mock server")]
    ConfigInUse(ConfigName),

    #[error("Failed to spawn mock server on port {port}: {source}")]
    SpawnFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to stop mock server on port {port}: {source}")]
    TerminateFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    /// Whether the error describes a caller mistake rather than a daemon fault.
    /// Caller mistakes are reported verbatim; everything else is logged and masked.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DaemonError::InvalidPort(_)
                | DaemonError::PortInUse(_)
                | DaemonError::ConfigNotFound(_)
                | DaemonError::DuplicateName(_)
                | DaemonError::InvalidFormat(_)
                | DaemonError::InstanceNotFound(_)
                | DaemonError::ConfigInUse(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
