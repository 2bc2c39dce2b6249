use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the daemon is up
    Health,

    /// Start a mock server on a port with a stored configuration
    Start {
        /// Port to serve on (9001-9999)
        #[arg(short, long)]
        port: u16,

        /// Name of the stored configuration, e.g. users.json
        #[arg(short, long)]
        config: String,
    },

    /// Stop the mock server on a port
    Stop {
        #[arg(short, long)]
        port: u16,
    },

    /// List running mock servers
    #[command(alias = "ps")]
    Status,

    /// List stored configurations
    #[command(alias = "ls")]
    Configs,

    /// Upload a JSON configuration file
    Upload {
        /// Path of the file to upload
        file: PathBuf,
    },

    /// Delete a stored configuration
    #[command(alias = "rm")]
    Delete {
        /// Name of the stored configuration
        name: String,
    },

    /// Download a stored configuration
    Download {
        /// Name of the stored configuration
        name: String,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
