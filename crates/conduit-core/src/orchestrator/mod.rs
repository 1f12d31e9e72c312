//! High-level control plane API.
//!
//! [`Orchestrator`] ties the installer, the service manager and the
//! reconciliation engine together behind the operations the CLI exposes.
//! Every operation takes the caller's cancellation token; start additionally
//! runs under its own deadline.
//!
//! ```text
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │   install    │───▶│    start     │───▶│   refresh    │───▶│   release    │
//! │ (Installer)  │    │(ServiceMgr)  │    │ (Reconciler) │    │ (implicit    │
//! │              │    │              │    │              │    │  starts only)│
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//! ```
//!
//! Operations that need the database but were not asked to start it
//! (`refresh_connections`, `connection_states`) start the service on demand,
//! recording themselves as the invoker, and stop it again afterwards unless
//! someone else is connected or it was started explicitly meanwhile.
//!
//! ## Submodules
//!
//! - [`builder`]: [`OrchestratorBuilder`], configuration and collaborators

pub mod builder;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

pub use builder::OrchestratorBuilder;

use crate::config::{InstallLayout, Invoker, ListenMode, ServiceConfig};
use crate::connections::{
    load_snapshot, save_snapshot, ConnectionConfigLoader, PgSchemaBackend, PluginCatalog,
    Reconciler, RefreshResult,
};
use crate::db::Database;
use crate::error::{ConduitError, Result};
use crate::install::{DatabaseVersionFile, InstallOutcome, Installer};
use crate::models::ConnectionState;
use crate::service::{
    ClientCount, RunningInstanceInfo, ServiceManager, StartRequest, StartResult, StopStatus,
};

/// Overrides for an explicit start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartOptions {
    pub port: Option<u16>,
    pub listen: Option<ListenMode>,
}

/// Everything an explicit start did.
#[derive(Debug, Clone, PartialEq)]
pub struct StartReport {
    pub install: InstallOutcome,
    pub start: StartResult,
    /// Present when the engine was started by this call
    pub refresh: Option<RefreshResult>,
}

/// Outcome of a restart.
#[derive(Debug, Clone, PartialEq)]
pub enum RestartOutcome {
    Restarted(StartReport),
    /// The running service was left alone
    ClientsAttached(ClientCount),
}

/// Snapshot for `service status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub running: Option<RunningInstanceInfo>,
    pub versions: DatabaseVersionFile,
    /// Only read when the service is running
    pub connections: Option<Vec<ConnectionState>>,
}

/// Control plane for one install directory.
pub struct Orchestrator {
    config: ServiceConfig,
    service: Arc<ServiceManager>,
    installer: Installer,
    loader: Arc<dyn ConnectionConfigLoader>,
    catalog: Arc<dyn PluginCatalog>,
    start_timeout: Duration,
}

impl Orchestrator {
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn layout(&self) -> &InstallLayout {
        self.service.layout()
    }

    pub fn service(&self) -> &ServiceManager {
        &self.service
    }

    /// Installs or upgrades the engine and extension.
    pub async fn install(&self, cancel: &CancellationToken) -> Result<InstallOutcome> {
        self.installer.ensure_installed(cancel).await
    }

    /// Installs if needed, starts the service explicitly and refreshes
    /// connections when the engine was started by this call.
    ///
    /// A service that was started implicitly is adopted: its record is
    /// rewritten so it is no longer stopped behind the user's back.
    pub async fn start_service(
        &self,
        options: StartOptions,
        cancel: &CancellationToken,
    ) -> Result<StartReport> {
        let install = self.installer.ensure_installed(cancel).await?;
        let request = self.start_request(options, Invoker::Service);
        let start = match self.start_with_deadline(&request, cancel).await? {
            StartResult::AlreadyRunning(mut info) if info.invoker != Invoker::Service => {
                info!("adopting service started by '{}'", info.invoker);
                info.invoker = Invoker::Service;
                info.save(&self.layout().running_info_file())?;
                StartResult::AlreadyRunning(info)
            }
            other => other,
        };

        let refresh = match &start {
            StartResult::Started(info) => Some(self.reconcile_running(info, &[]).await?),
            StartResult::AlreadyRunning(_) => None,
        };

        Ok(StartReport {
            install,
            start,
            refresh,
        })
    }

    pub async fn stop_service(&self, force: bool, cancel: &CancellationToken) -> Result<StopStatus> {
        self.service.stop(force, cancel).await
    }

    /// Stops the service and starts it again on the same port and listen
    /// mode.
    pub async fn restart_service(&self, cancel: &CancellationToken) -> Result<RestartOutcome> {
        let options = match self.service.load_live_info()? {
            Some(info) => StartOptions {
                port: Some(info.port),
                listen: Some(info.listen_type),
            },
            None => StartOptions::default(),
        };

        if let StopStatus::ClientsAttached(count) = self.service.stop(false, cancel).await? {
            return Ok(RestartOutcome::ClientsAttached(count));
        }
        let report = self.start_service(options, cancel).await?;
        Ok(RestartOutcome::Restarted(report))
    }

    /// Running info, installed versions and, when running, connection
    /// states. Never starts anything.
    pub async fn status(&self) -> Result<ServiceStatus> {
        let versions = DatabaseVersionFile::load(&self.layout().versions_file())?;
        let running = self.service.load_live_info()?;
        let connections = match &running {
            Some(info) => match load_states(info).await {
                Ok(states) => Some(states),
                Err(e) => {
                    warn!("could not read connection states: {e}");
                    None
                }
            },
            None => None,
        };
        Ok(ServiceStatus {
            running,
            versions,
            connections,
        })
    }

    /// Reconciles declared connections. `force` names connections to
    /// re-import even when unchanged.
    ///
    /// Per-connection failures are reported in the result rather than as an
    /// error.
    pub async fn refresh_connections(
        &self,
        force: &[String],
        cancel: &CancellationToken,
    ) -> Result<RefreshResult> {
        let info = self.ensure_service(Invoker::Refresh, cancel).await?;
        let result = self.reconcile_running(&info, force).await;
        self.release(Invoker::Refresh, cancel).await;
        result
    }

    /// Current rows of the connection state table.
    pub async fn connection_states(&self, cancel: &CancellationToken) -> Result<Vec<ConnectionState>> {
        let info = self.ensure_service(Invoker::Query, cancel).await?;
        let states = load_states(&info).await;
        self.release(Invoker::Query, cancel).await;
        states
    }

    fn start_request(&self, options: StartOptions, invoker: Invoker) -> StartRequest {
        StartRequest {
            port: options.port.unwrap_or(self.config.port),
            listen: options.listen.unwrap_or(self.config.listen),
            invoker,
            database_name: self.config.database_name.clone(),
        }
    }

    /// Starts under a child token cancelled after the start timeout.
    async fn start_with_deadline(
        &self,
        request: &StartRequest,
        cancel: &CancellationToken,
    ) -> Result<StartResult> {
        let deadline = cancel.child_token();
        let timer = {
            let deadline = deadline.clone();
            let timeout = self.start_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            })
        };
        let result = self.service.start(request, &deadline).await;
        timer.abort();
        result
    }

    /// The live running info, installing and starting on demand.
    async fn ensure_service(
        &self,
        invoker: Invoker,
        cancel: &CancellationToken,
    ) -> Result<RunningInstanceInfo> {
        if let Some(info) = self.service.load_live_info()? {
            return Ok(info);
        }
        debug!("starting service on demand for '{invoker}'");
        self.installer.ensure_installed(cancel).await?;
        let request = self.start_request(StartOptions::default(), invoker);
        let started = self.start_with_deadline(&request, cancel).await?;
        Ok(started.info().clone())
    }

    async fn release(&self, invoker: Invoker, cancel: &CancellationToken) {
        match self.service.release_for_invoker(invoker, cancel).await {
            Ok(Some(status)) => debug!("released service: {status:?}"),
            Ok(None) => {}
            Err(e) => warn!("could not stop service started for '{invoker}': {e}"),
        }
    }

    /// Runs one reconciliation against the running engine and persists the
    /// applied snapshot.
    async fn reconcile_running(
        &self,
        info: &RunningInstanceInfo,
        force: &[String],
    ) -> Result<RefreshResult> {
        let declared = self.loader.load_connection_config()?;
        let snapshot_path = self.layout().connection_snapshot_file();
        let previous = load_snapshot(&snapshot_path)?;

        let params = info.superuser_params();
        let catalog = Arc::clone(&self.catalog);
        let page_size = self.config.state_page_size;
        let force = force.to_vec();
        let outcome = tokio::task::spawn_blocking(move || {
            let mut backend = PgSchemaBackend::new(Database::connect(&params)?);
            Ok::<_, ConduitError>(Reconciler::new(catalog.as_ref(), page_size).reconcile(
                &mut backend,
                &previous,
                &declared,
                &force,
            ))
        })
        .await
        .map_err(ConduitError::join)?;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("could not connect for connection refresh: {e}");
                return Ok(RefreshResult {
                    error: Some(e.to_string()),
                    ..RefreshResult::default()
                });
            }
        };

        if outcome.result.error.is_none() {
            save_snapshot(&snapshot_path, &outcome.applied)?;
        }
        Ok(outcome.result)
    }
}

async fn load_states(info: &RunningInstanceInfo) -> Result<Vec<ConnectionState>> {
    let params = info.superuser_params();
    tokio::task::spawn_blocking(move || {
        let mut db = Database::connect(&params)?;
        db.ensure_internal_schema()?;
        db.load_connection_states()
    })
    .await
    .map_err(ConduitError::join)?
}
