//! Test harness that wires a daemon into a temporary directory

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use mockyard_daemon::Daemon;
use mockyard_daemon::config_store::ConfigStore;
use mockyard_daemon::logs::log_path;
use mockyard_daemon::ports::PortProbe;
use mockyard_daemon::registry::InstanceRegistry;
use mockyard_daemon::settings::Settings;
use mockyard_protocol::client::Client;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tracing::debug;

use super::mock_scripts::MockScript;

/// Stop timeout used by harness daemons, short enough to keep escalation
/// tests quick.
pub const TEST_STOP_TIMEOUT: Duration = Duration::from_secs(1);

pub const TEST_STARTUP_GRACE: Duration = Duration::from_millis(100);

pub struct TestDaemonHarness {
    dir: TempDir,
    daemon: Daemon,
}

impl TestDaemonHarness {
    /// Daemon running `script` as its mock server, with every port treated as
    /// free on the host. Must be called inside a tokio runtime.
    pub fn new(script: MockScript) -> io::Result<Self> {
        Self::with_probe(script, Arc::new(|_port: u16| false))
    }

    pub fn with_probe(script: MockScript, probe: Arc<dyn PortProbe>) -> io::Result<Self> {
        Self::build(script, probe, |_| {})
    }

    /// Like [`new`](Self::new), with a chance to adjust settings first
    pub fn with_settings(
        script: MockScript,
        configure: impl FnOnce(&mut Settings),
    ) -> io::Result<Self> {
        Self::build(script, Arc::new(|_port: u16| false), configure)
    }

    fn build(
        script: MockScript,
        probe: Arc<dyn PortProbe>,
        configure: impl FnOnce(&mut Settings),
    ) -> io::Result<Self> {
        let dir = TempDir::new()?;
        let mock_bin = script.install(dir.path())?;

        let mut settings = Settings {
            configs_dir: dir.path().join("configs"),
            uploads_dir: dir.path().join("uploads"),
            logs_dir: dir.path().join("logs"),
            mock_bin,
            stop_timeout: TEST_STOP_TIMEOUT,
            startup_grace: TEST_STARTUP_GRACE,
            development: true,
            ..Settings::default()
        };
        configure(&mut settings);

        let daemon = Daemon::new(settings, probe).map_err(io::Error::other)?;
        Ok(Self { dir, daemon })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn daemon(&self) -> &Daemon {
        &self.daemon
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        self.daemon.registry()
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        self.daemon.registry().store()
    }

    /// Log file of the mock server on `port`
    pub fn log_path(&self, port: u16) -> PathBuf {
        log_path(&self.daemon.settings().logs_dir, port)
    }

    /// Store `document` under `name`, panicking on failure
    pub fn upload(&self, name: &str, document: &Value) {
        let bytes = serde_json::to_vec(document).expect("serialize config");
        self.store()
            .upload(name, &bytes)
            .unwrap_or_else(|e| panic!("upload {}: {}", name, e));
    }

    /// Send a request through the router in-process
    pub async fn request(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .daemon
            .router()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    /// Serve the API on an ephemeral localhost port and return a client for it
    pub async fn serve(&self) -> io::Result<ServedDaemon> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = self.daemon.router();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                debug!("Test server stopped: {}", e);
            }
        });

        let client = Client::new(&format!("http://{}", addr)).map_err(io::Error::other)?;
        Ok(ServedDaemon { client, task })
    }

    pub async fn shutdown(&self) -> usize {
        self.daemon.shutdown().await
    }
}

/// A daemon API served over real TCP for the lifetime of this value
pub struct ServedDaemon {
    pub client: Client,
    task: JoinHandle<()>,
}

impl Drop for ServedDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}
