use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use mockyard_daemon::Daemon;
use mockyard_daemon::ports::SystemPortProbe;
use mockyard_daemon::settings::{CliOverrides, Settings, load_dotenv, log_dotenv};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Mockyard daemon - supervisor for local mock API servers
#[derive(Parser)]
#[command(
    name = "mockyard-daemon",
    version,
    about = "Runs mock API servers on demand behind an HTTP API"
)]
struct Args {
    #[command(flatten)]
    overrides: CliOverrides,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let dotenv = load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    log_dotenv(&dotenv);
    let mut settings = Settings::from_env()?;
    settings.apply(args.overrides);

    if settings.development {
        warn!("Development mode: internal error details are returned to clients");
    }
    info!(
        "Mock servers run {:?}, configs in {:?}, logs in {:?}",
        settings.mock_bin, settings.configs_dir, settings.logs_dir
    );

    let daemon = Daemon::new(settings, Arc::new(SystemPortProbe))?;

    let addr = daemon.settings().bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Management server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, daemon.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let stopped = daemon.shutdown().await;
    info!("Stopped {} mock server(s), exiting", stopped);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
}
