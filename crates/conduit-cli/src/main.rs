//! Conduit CLI Application
//!
//! Command-line front end of the conduit control plane. Exit codes:
//!
//! | Code | Meaning                                   |
//! |------|-------------------------------------------|
//! | 0    | success                                   |
//! | 1    | unknown failure                           |
//! | 2    | install failure                           |
//! | 3    | start failure                             |
//! | 4    | stop timed out                            |
//! | 5    | stop refused, clients attached            |
//! | 6    | connection refresh did not fully succeed  |

mod args;
mod cli;
mod renderer;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use args::{Args, Commands};
use clap::Parser;
use cli::{Cli, Outcome};
use conduit_core::{ConduitError, ErrorCategory, OrchestratorBuilder};
use log::{debug, info};
use renderer::TerminalRenderer;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(args: Args) -> Result<Outcome> {
    let Args {
        install_dir,
        no_color,
        timeout,
        command,
    } = args;

    let mut builder = OrchestratorBuilder::new().with_install_dir(install_dir);
    if let Some(secs) = timeout {
        builder = builder.with_start_timeout(Duration::from_secs(secs));
    }
    let orchestrator = builder
        .build()
        .await
        .context("Failed to initialize conduit")?;

    let cancel = CancellationToken::new();
    spawn_cancel_triggers(&cancel, timeout);

    let cli = Cli::new(orchestrator, TerminalRenderer::new(!no_color), cancel);
    info!("conduit started");

    match command {
        Commands::Install => cli.install().await.context("Install failed"),
        Commands::Service { command } => cli.handle_service_command(command).await,
        Commands::Connections { command } => cli.handle_connections_command(command).await,
    }
}

/// Cancels `cancel` on Ctrl-C, and after `timeout` seconds when given.
fn spawn_cancel_triggers(cancel: &CancellationToken, timeout: Option<u64>) {
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("interrupted, cancelling");
            on_interrupt.cancel();
        }
    });

    if let Some(secs) = timeout {
        let on_deadline = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            debug!("timeout of {secs}s reached, cancelling");
            on_deadline.cancel();
        });
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let category = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ConduitError>())
        .map_or(ErrorCategory::Other, ConduitError::category);
    match category {
        ErrorCategory::Install => 2,
        ErrorCategory::Start => 3,
        ErrorCategory::StopTimeout => 4,
        ErrorCategory::Other => 1,
    }
}
