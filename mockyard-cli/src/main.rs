mod commands;
mod errors;

use std::path::Path;

use crate::{commands::Commands, errors::{CliError, Result}};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use colored::Colorize;
use mockyard_protocol::{
    client::{Client, DEFAULT_DAEMON_URL},
    errors::ClientError,
    protocol::{ConfigInfo, InstanceStatus},
};
use tabled::{Table, Tabled};
use tabled::settings::Style;
use tracing_subscriber::EnvFilter;

/// Mockyard - run local mock API servers through the mockyard daemon
#[derive(Parser, Debug)]
#[command(name = "mockyard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Base URL of the daemon
    #[arg(short, long, global = true, env = "MOCKYARD_URL", default_value = DEFAULT_DAEMON_URL)]
    pub server: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        if let CliError::Protocol(ClientError::Connect { url, .. }) = &e {
            eprintln!("Is the daemon running? Start it with: mockyard-daemon (expected at {})", url);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let client = Client::new(&cli.server)?;
    execute(&client, cli.command).await
}

async fn execute(client: &Client, command: Commands) -> Result<()> {
    match command {
        Commands::Health => {
            let health = client.health().await?;
            if health.status != "healthy" {
                return Err(CliError::Server(format!("daemon reports {}", health.status)));
            }
            println!("{} {}", "healthy".green(), client.base_url());
        }
        Commands::Start { port, config } => {
            let started = client.start(port, &config).await?;
            println!("{}", started.message);
        }
        Commands::Stop { port } => {
            let stopped = client.stop(port).await?;
            println!("{}", stopped.message);
        }
        Commands::Status => {
            let instances = client.status().await?;
            if instances.is_empty() {
                println!("No mock servers running");
            } else {
                print_status_table(&instances);
            }
        }
        Commands::Configs => {
            let configs = client.list_configs().await?;
            if configs.is_empty() {
                println!("No configurations stored");
            } else {
                print_config_table(&configs);
            }
        }
        Commands::Upload { file } => {
            let uploaded = client.upload(&file).await?;
            println!("{} as {}", uploaded.message, uploaded.filename.bold());
        }
        Commands::Delete { name } => {
            let deleted = client.delete_config(&name).await?;
            println!("{}", deleted.message);
        }
        Commands::Download { name, output } => {
            let document = client.download_config(&name).await?;
            let text = serde_json::to_string_pretty(&document)?;
            match output {
                Some(path) => {
                    write_document(&path, &text)?;
                    eprintln!("Saved {} to {}", name, path.display());
                }
                None => println!("{text}"),
            }
        }
    }
    Ok(())
}

fn write_document(path: &Path, text: &str) -> Result<()> {
    std::fs::write(path, format!("{text}\n")).map_err(|source| CliError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "PORT")]
    port: String,
    #[tabled(rename = "CONFIG")]
    config: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "STARTED")]
    started: String,
    #[tabled(rename = "UPTIME")]
    uptime: String,
}

fn format_instance_row(instance: &InstanceStatus) -> InstanceRow {
    InstanceRow {
        port: instance.port.to_string(),
        config: instance.config_file.clone(),
        pid: instance.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        started: instance
            .started_at
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string()),
        uptime: instance.uptime_formatted.clone(),
    }
}

#[derive(Tabled)]
struct ConfigRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "MODIFIED")]
    modified: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

fn format_config_row(config: &ConfigInfo) -> ConfigRow {
    ConfigRow {
        name: config.name.clone(),
        size: config.size.clone(),
        modified: format_timestamp(config.modified),
        status: config_status(config.in_use),
    }
}

fn config_status(in_use: bool) -> String {
    if in_use {
        "in use".green().to_string()
    } else {
        "idle".dimmed().to_string()
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn print_status_table(instances: &[InstanceStatus]) {
    let mut sorted: Vec<_> = instances.iter().collect();
    sorted.sort_by_key(|i| i.port);

    let rows: Vec<InstanceRow> = sorted.into_iter().map(format_instance_row).collect();
    let table = Table::new(rows).with(Style::blank()).to_string();
    println!("{table}");
}

fn print_config_table(configs: &[ConfigInfo]) {
    let rows: Vec<ConfigRow> = configs.iter().map(format_config_row).collect();
    let table = Table::new(rows).with(Style::blank()).to_string();
    println!("{table}");
}
