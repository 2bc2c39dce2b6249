use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Maximum size of a configuration document accepted by the daemon (5MB)
pub const MAX_CONFIG_SIZE: u64 = 5 * 1024 * 1024;

/// Multipart field that carries an uploaded configuration
pub const UPLOAD_FIELD: &str = "config";

/// A port as sent by a client.
///
/// Accepts a JSON integer or a string holding one (`9050` or `"9050"`),
/// so range checks happen in the daemon rather than in the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PortArg(pub i64);

impl PortArg {
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl From<u16> for PortArg {
    fn from(port: u16) -> Self {
        Self(i64::from(port))
    }
}

impl std::fmt::Display for PortArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for PortArg {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) => Ok(PortArg(n)),
            Raw::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(PortArg)
                .map_err(|_| serde::de::Error::custom(format!("invalid port: {:?}", s))),
        }
    }
}

/// Body of `POST /api/mock/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub port: PortArg,
    pub config_file: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    pub port: u16,
    pub config_file: String,
    pub message: String,
}

/// Body of `POST /api/mock/stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopRequest {
    pub port: PortArg,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopResponse {
    pub success: bool,
    pub port: u16,
    pub message: String,
}

/// One running mock server as reported by `GET /api/mock/status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub port: u16,
    pub config_file: String,
    /// Uptime in milliseconds
    pub uptime: u64,
    pub uptime_formatted: String,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub filename: String,
    pub message: String,
}

/// One stored configuration as reported by `GET /api/mock/configs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInfo {
    pub name: String,
    /// Human readable size, e.g. "1.5 KB"
    pub size: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub in_use: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    /// Internal detail, only populated when the daemon runs in development mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
