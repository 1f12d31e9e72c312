//! Process supervision for the embedded engine.
//!
//! [`ServiceManager`] starts the engine as a detached child, records it in
//! the running-state file, and stops it again with a signal escalation.
//!
//! ```text
//!   start ──▶ purge stale record ──▶ orphan check ──▶ port check
//!                                                        │
//!        record db name ◀── wait ready ◀── persist ◀── spawn
//!
//!   stop  ──▶ record? ──no──▶ NotRunning / OrphanInstance
//!               │yes
//!               ▼
//!        clients attached? ──yes──▶ ClientsAttached
//!               │no
//!               ▼
//!        Smart ─▶ Fast ─▶ Immediate ──▶ remove record
//! ```
//!
//! ## Submodules
//!
//! - [`process`]: process handles and command-line based discovery
//! - [`shutdown`]: the escalation sequence
//! - [`running_info`]: the persisted running-state record
//! - [`launch`]: engine configuration, spawning and readiness polling
//! - [`instance`]: throwaway instances for setup and migration
//! - [`clients`]: external session counting
//! - [`password`]: application user password management

use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub mod clients;
pub mod instance;
pub mod launch;
pub mod password;
pub mod process;
pub mod running_info;
pub mod shutdown;

pub use clients::{count_external_clients, ClientCount};
pub use instance::PgRunningInfo;
pub use process::{ProcessFinder, ProcessHandle, StopSignal, SysinfoProcessFinder};
pub use running_info::RunningInstanceInfo;
pub use shutdown::{ShutdownSequence, ShutdownStep};

use self::launch::{ensure_port_free, wait_until_ready, write_engine_config, EngineCommand};
use self::process::ChildProcess;
use crate::config::{InstallLayout, Invoker, ListenMode};
use crate::constants::ENGINE_VERSION;
use crate::db::Database;
use crate::error::{ConduitError, Result};
use crate::install::DatabaseVersionFile;

/// Parameters for [`ServiceManager::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub port: u16,
    pub listen: ListenMode,
    pub invoker: Invoker,
    /// Used when the data directory holds no user database yet
    pub database_name: String,
}

/// Outcome of a start request.
#[derive(Debug, Clone, PartialEq)]
pub enum StartResult {
    Started(RunningInstanceInfo),
    AlreadyRunning(RunningInstanceInfo),
}

impl StartResult {
    pub fn info(&self) -> &RunningInstanceInfo {
        match self {
            StartResult::Started(info) | StartResult::AlreadyRunning(info) => info,
        }
    }
}

/// Outcome of a stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    NotRunning,
    /// Nothing was signalled because sessions are still attached
    ClientsAttached(ClientCount),
}

/// Starts, stops and inspects the engine for one install directory.
pub struct ServiceManager {
    layout: InstallLayout,
    finder: Arc<dyn ProcessFinder>,
    shutdown: ShutdownSequence,
}

impl ServiceManager {
    pub fn new(layout: InstallLayout) -> Self {
        let finder = Arc::new(SysinfoProcessFinder::new(layout.root()));
        Self::with_finder(layout, finder)
    }

    /// Manager using a custom process finder.
    pub fn with_finder(layout: InstallLayout, finder: Arc<dyn ProcessFinder>) -> Self {
        Self {
            layout,
            finder,
            shutdown: ShutdownSequence::default(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSequence) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn layout(&self) -> &InstallLayout {
        &self.layout
    }

    pub fn finder(&self) -> &Arc<dyn ProcessFinder> {
        &self.finder
    }

    /// Engine version recorded by the installer, or the release default.
    pub fn engine_version(&self) -> String {
        DatabaseVersionFile::load(&self.layout.versions_file())
            .ok()
            .filter(|versions| versions.embedded_db.is_installed())
            .map(|versions| versions.embedded_db.version)
            .unwrap_or_else(|| ENGINE_VERSION.to_string())
    }

    /// The running-state record when its process is alive. A stale record is
    /// deleted.
    pub fn load_live_info(&self) -> Result<Option<RunningInstanceInfo>> {
        let path = self.layout.running_info_file();
        let Some(info) = RunningInstanceInfo::load(&path)? else {
            return Ok(None);
        };
        if self.finder.process(info.pid).is_some() {
            return Ok(Some(info));
        }
        info!("removing stale running state for pid {}", info.pid);
        RunningInstanceInfo::remove(&path)?;
        Ok(None)
    }

    /// Engine processes with no live running-state record.
    pub fn find_orphan_instances(&self) -> Result<Vec<Arc<dyn ProcessHandle>>> {
        let recorded = self.load_live_info()?.map(|info| info.pid);
        Ok(self
            .finder
            .find_engine_instances()
            .into_iter()
            .filter(|process| Some(process.pid()) != recorded)
            .collect())
    }

    /// Starts the engine unless it already runs.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::PortMismatch` when the service runs on another
    /// port and `ConduitError::PortInUse` when the port is taken. Every other
    /// failure, an unrecorded live engine included, is wrapped in
    /// `ConduitError::Start`.
    pub async fn start(
        &self,
        request: &StartRequest,
        cancel: &CancellationToken,
    ) -> Result<StartResult> {
        if let Some(info) = self.load_live_info().map_err(ConduitError::start)? {
            if info.port != request.port {
                return Err(ConduitError::PortMismatch {
                    running: info.port,
                    requested: request.port,
                });
            }
            debug!("service already running with pid {}", info.pid);
            return Ok(StartResult::AlreadyRunning(info));
        }

        if let Some(orphan) = self.finder.find_engine_instances().first() {
            return Err(ConduitError::start(ConduitError::OrphanInstance {
                pid: orphan.pid(),
            }));
        }

        ensure_port_free(request.port, &request.listen.resolved_addresses())?;

        let engine_version = self.engine_version();
        let binary = self.layout.engine_binary(&engine_version);
        if !binary.exists() {
            return Err(ConduitError::start(ConduitError::Configuration {
                message: format!("database is not installed at {}", binary.display()),
            }));
        }
        let data_dir = self.layout.data_dir(&engine_version);
        write_engine_config(&data_dir).map_err(ConduitError::start)?;
        let password = password::resolve_password(&self.layout).map_err(ConduitError::start)?;

        let command = EngineCommand {
            binary,
            data_dir,
            logs_dir: self.layout.logs_dir(),
            port: request.port,
            listen_addresses: request.listen.given_addresses(),
        };
        let process = command.spawn().map_err(ConduitError::start)?;

        let mut info = RunningInstanceInfo::new(
            process.pid(),
            request.port,
            request.listen,
            request.invoker,
            password,
        );
        let path = self.layout.running_info_file();

        let started = async {
            info.save(&path)?;
            wait_until_ready(&info.superuser_params(), &process, cancel).await?;
            info.database = self.finish_start(&info, &request.database_name).await?;
            info.save(&path)
        }
        .await;

        if let Err(e) = started {
            return Err(abort_start(&process, &path, e));
        }

        info!(
            "service started (pid {}, port {}, database '{}')",
            info.pid, info.port, info.database
        );
        Ok(StartResult::Started(info))
    }

    /// Discovers the database name and rotates the application user's
    /// password to the resolved one.
    async fn finish_start(&self, info: &RunningInstanceInfo, fallback: &str) -> Result<String> {
        let params = info.superuser_params();
        let password = info.password.clone();
        let fallback = fallback.to_string();
        tokio::task::spawn_blocking(move || {
            let mut db = Database::connect(&params)?;
            let database = match db.discover_database_name()? {
                Some(name) => name,
                None => {
                    warn!("no user database found, assuming '{fallback}'");
                    fallback
                }
            };
            db.set_user_password(&password)?;
            Ok(database)
        })
        .await
        .map_err(ConduitError::join)?
    }

    /// Stops the recorded service.
    ///
    /// With `force` the client check is skipped and every engine and plugin
    /// manager process found in the process table is stopped concurrently.
    pub async fn stop(&self, force: bool, cancel: &CancellationToken) -> Result<StopStatus> {
        if force {
            return self.force_stop(cancel).await;
        }

        let Some(info) = self.load_live_info()? else {
            if let Some(orphan) = self.finder.find_engine_instances().first() {
                return Err(ConduitError::OrphanInstance { pid: orphan.pid() });
            }
            return Ok(StopStatus::NotRunning);
        };

        match count_external_clients(info.superuser_params()).await {
            Ok(count) if !count.is_empty() => {
                info!(
                    "not stopping service: {} client session(s) attached",
                    count.total()
                );
                return Ok(StopStatus::ClientsAttached(count));
            }
            Ok(_) => {}
            Err(e) => warn!("could not count client sessions, stopping anyway: {e}"),
        }

        if let Some(process) = self.finder.process(info.pid) {
            self.shutdown.run(process.as_ref(), cancel).await?;
        }
        RunningInstanceInfo::remove(&self.layout.running_info_file())?;
        Ok(StopStatus::Stopped)
    }

    /// Stops every matching process, one task per process, all joined
    /// before returning.
    async fn force_stop(&self, cancel: &CancellationToken) -> Result<StopStatus> {
        let mut targets = self.finder.find_engine_instances();
        if let Some(info) = RunningInstanceInfo::load(&self.layout.running_info_file())? {
            if !targets.iter().any(|p| p.pid() == info.pid) {
                if let Some(process) = self.finder.process(info.pid) {
                    targets.push(process);
                }
            }
        }
        targets.extend(self.finder.find_plugin_managers());

        let mut tasks = JoinSet::new();
        for process in targets {
            let shutdown = self.shutdown.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move { shutdown.run(process.as_ref(), &cancel).await });
        }

        let mut stopped = 0;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(ConduitError::join).and_then(|r| r) {
                Ok(_) => stopped += 1,
                Err(e) => failures.push(e.to_string()),
            }
        }

        RunningInstanceInfo::remove(&self.layout.running_info_file())?;

        if !failures.is_empty() {
            return Err(ConduitError::StopFailed {
                count: failures.len(),
                details: failures.join("; "),
            });
        }
        if stopped == 0 {
            return Ok(StopStatus::NotRunning);
        }
        info!("force stopped {stopped} process(es)");
        Ok(StopStatus::Stopped)
    }

    /// Makes sure nothing runs from this install directory: purges a stale
    /// record, force stops orphans, and fails when a recorded service is
    /// still alive.
    pub async fn ensure_not_running(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(info) = self.load_live_info()? {
            return Err(ConduitError::ServiceRunning { pid: info.pid });
        }
        if !self.finder.find_engine_instances().is_empty() {
            warn!("stopping orphaned database processes");
            self.force_stop(cancel).await?;
        }
        if let Some(process) = self.finder.find_engine_instances().first() {
            return Err(ConduitError::ServiceRunning { pid: process.pid() });
        }
        Ok(())
    }

    /// Stops the service when it was started implicitly by `invoker` and
    /// nobody else is using it. A service started explicitly is left alone.
    pub async fn release_for_invoker(
        &self,
        invoker: Invoker,
        cancel: &CancellationToken,
    ) -> Result<Option<StopStatus>> {
        let Some(info) = self.load_live_info()? else {
            return Ok(None);
        };
        if info.invoker == Invoker::Service || info.invoker != invoker {
            return Ok(None);
        }
        self.stop(false, cancel).await.map(Some)
    }
}

/// Kills a half-started engine and clears its record. The start error is
/// what the caller sees, even when the record cannot be removed.
fn abort_start(process: &ChildProcess, record: &Path, err: ConduitError) -> ConduitError {
    warn!("start failed, killing engine pid {}: {err}", process.pid());
    process.kill();
    if let Err(remove_err) = RunningInstanceInfo::remove(record) {
        warn!("could not remove running state after failed start: {remove_err}");
    }
    ConduitError::start(err)
}
