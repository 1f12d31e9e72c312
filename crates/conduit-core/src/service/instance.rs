//! Short-lived engine instances used during installation and migration.

use std::path::Path;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use super::launch::{find_free_port, wait_until_ready, EngineCommand};
use super::process::{ChildProcess, ProcessHandle};
use super::shutdown::ShutdownSequence;
use crate::constants::MAINTENANCE_DATABASE;
use crate::db::{ConnectParams, Database};
use crate::error::{ConduitError, Result};

/// A temporarily started engine: the child, its port, and the database it
/// serves. Stop it with [`PgRunningInfo::stop`] once done.
#[derive(Debug)]
pub struct PgRunningInfo {
    process: ChildProcess,
    pub port: u16,
    /// Maintenance database when the data directory holds no user database
    pub database: String,
}

impl PgRunningInfo {
    /// Starts `binary` against `data_dir` on a free loopback port and waits
    /// for it to become ready.
    pub async fn start(
        binary: &Path,
        data_dir: &Path,
        logs_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let port = find_free_port()?;
        let command = EngineCommand {
            binary: binary.to_path_buf(),
            data_dir: data_dir.to_path_buf(),
            logs_dir: logs_dir.to_path_buf(),
            port,
            listen_addresses: vec!["localhost".to_string()],
        };
        let process = command.spawn()?;
        let maintenance = ConnectParams::maintenance(port);
        if let Err(e) = wait_until_ready(&maintenance, &process, cancel).await {
            process.kill();
            return Err(e);
        }

        let discovered = tokio::task::spawn_blocking(move || {
            Database::connect(&maintenance)?.discover_database_name()
        })
        .await
        .map_err(ConduitError::join)?;
        let database = match discovered {
            Ok(name) => name.unwrap_or_else(|| MAINTENANCE_DATABASE.to_string()),
            Err(e) => {
                process.kill();
                return Err(e);
            }
        };

        info!(
            "temporary engine (pid {}) serving '{database}' on port {port}",
            process.pid()
        );
        Ok(Self {
            process,
            port,
            database,
        })
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    /// Superuser session on the served database.
    pub fn params(&self) -> ConnectParams {
        ConnectParams::superuser(self.port, &self.database)
    }

    /// Stops the instance with the standard escalation, killing it outright
    /// when escalation fails.
    pub async fn stop(self, cancel: &CancellationToken) -> Result<()> {
        match ShutdownSequence::default().run(&self.process, cancel).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("temporary engine (pid {}) did not stop, killing it", self.pid());
                self.process.kill();
                Err(e)
            }
        }
    }
}
