use std::sync::Arc;

pub mod api;
pub mod config_store;
pub mod duration;
pub mod errors;
pub mod logs;
pub mod ports;
pub mod process;
pub mod registry;
pub mod settings;

use config_store::ConfigStore;
use errors::Result;
use ports::PortProbe;
use process::Supervisor;
use registry::InstanceRegistry;
use settings::Settings;

/// The wired-up daemon: config store, supervisor and registry built from
/// [`Settings`].
pub struct Daemon {
    settings: Settings,
    registry: Arc<InstanceRegistry>,
}

impl Daemon {
    /// Create the directories and components. Must run inside a tokio runtime.
    pub fn new(settings: Settings, probe: Arc<dyn PortProbe>) -> Result<Self> {
        let store = Arc::new(ConfigStore::open(
            &settings.configs_dir,
            &settings.uploads_dir,
        )?);
        std::fs::create_dir_all(&settings.logs_dir)?;

        let supervisor = Supervisor::new(
            &settings.mock_bin,
            &settings.logs_dir,
            settings.stop_timeout,
            settings.startup_grace,
        );
        let registry = InstanceRegistry::new(supervisor, store, probe);

        Ok(Self { settings, registry })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<InstanceRegistry> {
        &self.registry
    }

    pub fn router(&self) -> axum::Router {
        api::router(api::AppState::new(
            self.registry.clone(),
            self.settings.development,
        ))
    }

    /// Stop every running mock server
    pub async fn shutdown(&self) -> usize {
        self.registry.shutdown_all().await
    }
}
