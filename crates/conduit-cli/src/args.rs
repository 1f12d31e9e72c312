use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::cli::{ConnectionsCommands, ServiceCommands};

/// Control plane for the embedded conduit database service
///
/// Installs and upgrades the database engine, starts and stops it, and keeps
/// the foreign-data connections declared in `config/connections.toml`
/// imported as schemas.
#[derive(Parser)]
#[command(version, about, name = "conduit")]
pub struct Args {
    /// Install directory. Defaults to $XDG_DATA_HOME/conduit
    #[arg(long, global = true, env = "CONDUIT_INSTALL_DIR")]
    pub install_dir: Option<PathBuf>,

    /// Disable colored output and use plain text
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Give up after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand)]
pub enum Commands {
    /// Install or upgrade the database engine and extension
    Install,
    /// Manage the database service
    #[command(alias = "s")]
    Service {
        #[command(subcommand)]
        command: ServiceCommands,
    },
    /// Manage foreign-data connections
    #[command(alias = "c")]
    Connections {
        #[command(subcommand)]
        command: ConnectionsCommands,
    },
}
