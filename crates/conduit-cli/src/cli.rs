//! Subcommand arguments and their handlers.
//!
//! Argument structs stay clap-specific and convert into the core's option
//! types, so `conduit-core` never depends on the CLI framework:
//!
//! ```text
//! User Input → clap Args → core options → Orchestrator → Display → renderer
//! ```

use clap::{Args, Subcommand, ValueEnum};
use conduit_core::{ListenMode, Orchestrator, RestartOutcome, StartOptions, StopStatus};
use tokio_util::sync::CancellationToken;

use crate::renderer::TerminalRenderer;

/// Interfaces the service listens on
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum ListenArg {
    /// Loopback only
    Local,
    /// All interfaces
    Network,
}

impl From<ListenArg> for ListenMode {
    fn from(val: ListenArg) -> Self {
        match val {
            ListenArg::Local => ListenMode::Local,
            ListenArg::Network => ListenMode::Network,
        }
    }
}

/// Start the database service
#[derive(Args)]
pub struct StartArgs {
    /// Port to listen on. Defaults to $CONDUIT_DATABASE_PORT or 9193
    #[arg(long)]
    pub port: Option<u16>,
    /// Which interfaces to listen on
    #[arg(long, value_enum)]
    pub listen: Option<ListenArg>,
}

impl From<StartArgs> for StartOptions {
    fn from(val: StartArgs) -> Self {
        StartOptions {
            port: val.port,
            listen: val.listen.map(ListenMode::from),
        }
    }
}

/// Stop the database service
#[derive(Args)]
pub struct StopArgs {
    /// Stop even when clients are connected, including orphaned processes
    #[arg(long)]
    pub force: bool,
}

/// Refresh connections
#[derive(Args)]
pub struct RefreshArgs {
    /// Re-import these connections even when unchanged
    #[arg(long, value_name = "NAME", num_args = 1..)]
    pub force: Vec<String>,
}

#[derive(Subcommand)]
pub enum ServiceCommands {
    /// Start the service (installing first when needed)
    Start(StartArgs),
    /// Stop the service
    Stop(StopArgs),
    /// Stop and start the service on the same port
    Restart,
    /// Show service, version and connection status
    Status,
}

#[derive(Subcommand)]
pub enum ConnectionsCommands {
    /// Reconcile declared connections with the database
    Refresh(RefreshArgs),
    /// Show the connection state table
    State,
}

/// How a successful command ended, for the exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Stop was refused because clients are attached
    ClientsAttached,
    /// Reconciliation ran but did not fully succeed
    RefreshIncomplete,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::ClientsAttached => 5,
            Outcome::RefreshIncomplete => 6,
        }
    }
}

/// Runs commands against one orchestrator.
pub struct Cli {
    orchestrator: Orchestrator,
    renderer: TerminalRenderer,
    cancel: CancellationToken,
}

impl Cli {
    pub fn new(orchestrator: Orchestrator, renderer: TerminalRenderer, cancel: CancellationToken) -> Self {
        Self {
            orchestrator,
            renderer,
            cancel,
        }
    }

    pub async fn install(&self) -> anyhow::Result<Outcome> {
        let outcome = self.orchestrator.install(&self.cancel).await?;
        let title = if outcome.changed() {
            "# Installed"
        } else {
            "# Already up to date"
        };
        self.renderer.render(&format!("{title}\n\n{outcome}"));
        Ok(Outcome::Success)
    }

    pub async fn handle_service_command(&self, command: ServiceCommands) -> anyhow::Result<Outcome> {
        match command {
            ServiceCommands::Start(args) => {
                let report = self
                    .orchestrator
                    .start_service(args.into(), &self.cancel)
                    .await?;
                self.renderer.render(&report.to_string());
                Ok(refresh_outcome(report.refresh.as_ref()))
            }
            ServiceCommands::Stop(args) => {
                let status = self
                    .orchestrator
                    .stop_service(args.force, &self.cancel)
                    .await?;
                self.renderer.render(&status.to_string());
                Ok(match status {
                    StopStatus::ClientsAttached(_) => Outcome::ClientsAttached,
                    StopStatus::Stopped | StopStatus::NotRunning => Outcome::Success,
                })
            }
            ServiceCommands::Restart => {
                let outcome = self.orchestrator.restart_service(&self.cancel).await?;
                self.renderer.render(&outcome.to_string());
                Ok(match &outcome {
                    RestartOutcome::Restarted(report) => refresh_outcome(report.refresh.as_ref()),
                    RestartOutcome::ClientsAttached(_) => Outcome::ClientsAttached,
                })
            }
            ServiceCommands::Status => {
                let status = self.orchestrator.status().await?;
                self.renderer.render(&status.to_string());
                Ok(Outcome::Success)
            }
        }
    }

    pub async fn handle_connections_command(
        &self,
        command: ConnectionsCommands,
    ) -> anyhow::Result<Outcome> {
        match command {
            ConnectionsCommands::Refresh(args) => {
                let result = self
                    .orchestrator
                    .refresh_connections(&args.force, &self.cancel)
                    .await?;
                self.renderer
                    .render(&conduit_core::display::RefreshReport(&result).to_string());
                Ok(refresh_outcome(Some(&result)))
            }
            ConnectionsCommands::State => {
                let states = self.orchestrator.connection_states(&self.cancel).await?;
                self.renderer
                    .render(&conduit_core::display::ConnectionStates(states).to_string());
                Ok(Outcome::Success)
            }
        }
    }
}

fn refresh_outcome(result: Option<&conduit_core::RefreshResult>) -> Outcome {
    match result {
        Some(result) if !result.is_success() => Outcome::RefreshIncomplete,
        _ => Outcome::Success,
    }
}
