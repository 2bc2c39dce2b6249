//! Daemon settings: environment (with optional `.env`), then command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tracing::{debug, warn};

use crate::duration::parse_duration;
use crate::errors::{DaemonError, Result};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 3500;
pub const DEFAULT_MOCK_BIN: &str = "mockoon-cli";
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_STARTUP_GRACE: Duration = Duration::from_millis(250);

/// Value of `MOCKYARD_ENV` that turns on development mode
const DEVELOPMENT: &str = "development";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub configs_dir: PathBuf,
    pub uploads_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub mock_bin: PathBuf,
    pub stop_timeout: Duration,
    pub startup_grace: Duration,
    /// Internal error details are included in API responses
    pub development: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            configs_dir: PathBuf::from("configs"),
            uploads_dir: PathBuf::from("uploads"),
            logs_dir: PathBuf::from("logs"),
            mock_bin: PathBuf::from(DEFAULT_MOCK_BIN),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            startup_grace: DEFAULT_STARTUP_GRACE,
            development: false,
        }
    }
}

impl Settings {
    /// Read settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`, falling back to defaults for unset keys.
    /// Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(host) = get("HOST") {
            settings.host = host;
        }
        if let Some(port) = get("PORT") {
            settings.port = port
                .trim()
                .parse()
                .map_err(|_| DaemonError::Config(format!("PORT must be a port number, got {:?}", port)))?;
        }
        if let Some(dir) = get("CONFIGS_DIR") {
            settings.configs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("UPLOAD_DIR") {
            settings.uploads_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("LOGS_DIR") {
            settings.logs_dir = PathBuf::from(dir);
        }
        if let Some(bin) = get("MOCK_SERVER_BIN") {
            settings.mock_bin = PathBuf::from(bin);
        }
        if let Some(timeout) = get("MOCK_STOP_TIMEOUT") {
            settings.stop_timeout = env_duration("MOCK_STOP_TIMEOUT", &timeout)?;
        }
        if let Some(grace) = get("MOCK_STARTUP_GRACE") {
            settings.startup_grace = env_duration("MOCK_STARTUP_GRACE", &grace)?;
        }
        if let Some(env) = get("MOCKYARD_ENV") {
            settings.development = env.trim().eq_ignore_ascii_case(DEVELOPMENT);
        }

        Ok(settings)
    }

    /// Apply command-line flags on top of the environment
    pub fn apply(&mut self, overrides: CliOverrides) {
        let CliOverrides {
            host,
            port,
            configs_dir,
            upload_dir,
            logs_dir,
            mock_bin,
            stop_timeout,
            startup_grace,
            dev,
        } = overrides;

        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(dir) = configs_dir {
            self.configs_dir = dir;
        }
        if let Some(dir) = upload_dir {
            self.uploads_dir = dir;
        }
        if let Some(dir) = logs_dir {
            self.logs_dir = dir;
        }
        if let Some(bin) = mock_bin {
            self.mock_bin = bin;
        }
        if let Some(timeout) = stop_timeout {
            self.stop_timeout = timeout;
        }
        if let Some(grace) = startup_grace {
            self.startup_grace = grace;
        }
        if dev {
            self.development = true;
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_duration(key: &str, value: &str) -> Result<Duration> {
    parse_duration(value).map_err(|e| DaemonError::Config(format!("{}: {}", key, e)))
}

/// Command-line flags, each overriding its environment variable
#[derive(Args, Debug, Default, Clone)]
pub struct CliOverrides {
    /// Address to listen on [env: HOST]
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on [env: PORT]
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding configuration files [env: CONFIGS_DIR]
    #[arg(long)]
    pub configs_dir: Option<PathBuf>,

    /// Staging directory for uploads [env: UPLOAD_DIR]
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Directory for mock server logs [env: LOGS_DIR]
    #[arg(long)]
    pub logs_dir: Option<PathBuf>,

    /// Mock server executable [env: MOCK_SERVER_BIN]
    #[arg(long)]
    pub mock_bin: Option<PathBuf>,

    /// Time to wait after SIGTERM before SIGKILL, e.g. 10s [env: MOCK_STOP_TIMEOUT]
    #[arg(long, value_parser = parse_duration)]
    pub stop_timeout: Option<Duration>,

    /// A mock server exiting within this window fails its start, e.g. 250ms [env: MOCK_STARTUP_GRACE]
    #[arg(long, value_parser = parse_duration)]
    pub startup_grace: Option<Duration>,

    /// Development mode: include internal error details in responses [env: MOCKYARD_ENV=development]
    #[arg(long)]
    pub dev: bool,
}

/// Path of the `.env` file that was loaded, if any
pub type DotenvResult = std::result::Result<Option<PathBuf>, dotenvy::Error>;

/// Load `.env` from the working directory or one of its parents.
///
/// Meant to run before logging is set up so the file can set `RUST_LOG`.
/// Report the result with [`log_dotenv`] once a subscriber exists.
pub fn load_dotenv() -> DotenvResult {
    found(dotenvy::dotenv())
}

/// Load environment variables from the file at `path`. Variables already set
/// are kept.
pub fn load_dotenv_from(path: &Path) -> DotenvResult {
    found(dotenvy::from_path(path).map(|()| path.to_path_buf()))
}

fn found(result: std::result::Result<PathBuf, dotenvy::Error>) -> DotenvResult {
    match result {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn log_dotenv(result: &DotenvResult) {
    match result {
        Ok(Some(path)) => debug!("Loaded environment from {:?}", path),
        Ok(None) => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }
}

#[cfg(test)]
mod tests;
