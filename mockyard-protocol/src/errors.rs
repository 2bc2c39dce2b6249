use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid daemon url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to reach daemon at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build request: {0}")]
    Build(#[source] reqwest::Error),

    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ClientError {
    /// HTTP status of an API error, if the daemon answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}
