//! Installation and upgrade of the engine and its foreign-data extension.
//!
//! ```text
//!   NotInstalled ──▶ Installing ──▶ Installed
//!                                      │ digest changed
//!                                      ▼
//!                                  Upgrading ──▶ Installed
//! ```
//!
//! An upgrade across engine versions never writes into the old version's
//! directory. The old engine is started on a throwaway port and dumped, the
//! new engine is installed and initialized next to it, the dump is restored,
//! and only then is the version record written. The old directory is removed
//! only when its data made it across.
//!
//! Installs are serialized twice: a [`tokio::sync::Mutex`] inside the
//! [`Installer`] and an advisory file lock shared with other processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub mod artifact;
pub mod lock;
pub mod setup;
pub mod versions;

pub use artifact::{ArtifactKind, ArtifactSource, LocalDirectorySource, ResolvedArtifact};
pub use lock::InstallLock;
pub use versions::{DatabaseVersionFile, VersionFile};

use crate::backup::BackupManager;
use crate::config::InstallLayout;
use crate::error::{ConduitError, Result};
use crate::service::{PgRunningInfo, ServiceManager};

/// What happened to one artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallAction {
    AlreadyCurrent,
    Installed,
    Upgraded,
}

/// Result of [`Installer::ensure_installed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub engine: InstallAction,
    pub extension: InstallAction,
    /// Non-fatal problems, such as a skipped backup
    pub warnings: Vec<String>,
}

impl InstallOutcome {
    fn current() -> Self {
        Self {
            engine: InstallAction::AlreadyCurrent,
            extension: InstallAction::AlreadyCurrent,
            warnings: Vec::new(),
        }
    }

    pub fn changed(&self) -> bool {
        self.engine != InstallAction::AlreadyCurrent || self.extension != InstallAction::AlreadyCurrent
    }
}

/// Ensures the engine and extension match the current release.
pub struct Installer {
    layout: InstallLayout,
    source: Arc<dyn ArtifactSource>,
    service: Arc<ServiceManager>,
    database_name: String,
    guard: Mutex<()>,
}

/// Artifacts resolved for this run.
struct Resolved {
    engine: ResolvedArtifact,
    extension: ResolvedArtifact,
}

impl Installer {
    pub fn new(
        layout: InstallLayout,
        source: Arc<dyn ArtifactSource>,
        service: Arc<ServiceManager>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            layout,
            source,
            service,
            database_name: database_name.into(),
            guard: Mutex::new(()),
        }
    }

    /// Installs or upgrades whatever is missing or stale.
    ///
    /// # Errors
    ///
    /// Returns `ConduitError::Install` naming the failed step. A running
    /// service that blocks the install is reported the same way.
    pub async fn ensure_installed(&self, cancel: &CancellationToken) -> Result<InstallOutcome> {
        let _guard = self.guard.lock().await;
        let _lock = InstallLock::acquire(&self.layout.install_lock_file(), cancel)
            .await
            .map_err(|e| ConduitError::install("acquire install lock", e))?;
        self.layout
            .ensure_dirs()
            .map_err(|e| ConduitError::install("prepare install directory", e))?;

        let mut versions = DatabaseVersionFile::load(&self.layout.versions_file())
            .map_err(|e| ConduitError::install("read installed versions", e))?;
        let resolved = self
            .resolve()
            .await
            .map_err(|e| ConduitError::install("resolve artifacts", e))?;

        let engine_version = &resolved.engine.version;
        // Binaries and data without a matching record are the remains of an
        // interrupted install; they are redone from scratch below.
        let engine_present = versions.embedded_db.is_installed()
            && versions.embedded_db.version == *engine_version
            && self.layout.engine_binary(engine_version).exists()
            && self.layout.data_dir(engine_version).join("PG_VERSION").exists();
        let engine_current =
            engine_present && versions.embedded_db.image_digest == resolved.engine.image_digest;
        let extension_current = engine_current
            && versions.fdw_extension.image_digest == resolved.extension.image_digest;

        if engine_current && extension_current {
            return Ok(InstallOutcome::current());
        }

        self.service
            .ensure_not_running(cancel)
            .await
            .map_err(|e| ConduitError::install("stop running database", e))?;

        if engine_current {
            let action = self.install_extension_only(&resolved, &mut versions).await?;
            return Ok(InstallOutcome {
                engine: InstallAction::AlreadyCurrent,
                extension: action,
                warnings: Vec::new(),
            });
        }

        if engine_present {
            // Same engine version with different binaries: the data directory
            // stays compatible, so only the binaries are replaced.
            self.install_binaries(&resolved).await?;
            self.record(&resolved, &mut versions).await?;
            return Ok(InstallOutcome {
                engine: InstallAction::Upgraded,
                extension: InstallAction::Upgraded,
                warnings: Vec::new(),
            });
        }

        match self.previous_version(engine_version)? {
            Some(previous) => self.migrate(&previous, &resolved, &mut versions, cancel).await,
            None => {
                self.fresh_install(&resolved, &mut versions, cancel).await?;
                Ok(InstallOutcome {
                    engine: InstallAction::Installed,
                    extension: InstallAction::Installed,
                    warnings: Vec::new(),
                })
            }
        }
    }

    async fn resolve(&self) -> Result<Resolved> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || {
            Ok(Resolved {
                engine: source.resolve(ArtifactKind::Engine)?,
                extension: source.resolve(ArtifactKind::Extension)?,
            })
        })
        .await
        .map_err(ConduitError::join)?
    }

    /// Another engine version under `db/` with binaries and data.
    fn previous_version(&self, current: &str) -> Result<Option<String>> {
        let db_root = self.layout.db_root();
        let entries = match std::fs::read_dir(&db_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::file_system(&db_root, e)),
        };
        let mut found: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|version| {
                version != current
                    && self.layout.engine_binary(version).exists()
                    && self.layout.data_dir(version).join("PG_VERSION").exists()
            })
            .collect();
        found.sort();
        Ok(found.pop())
    }

    async fn install_artifact(&self, artifact: &ResolvedArtifact, dest: PathBuf) -> Result<PathBuf> {
        let source = Arc::clone(&self.source);
        let artifact = artifact.clone();
        tokio::task::spawn_blocking(move || source.install(&artifact, &dest))
            .await
            .map_err(ConduitError::join)?
    }

    /// Engine then extension into the engine directory of the resolved
    /// version.
    async fn install_binaries(&self, resolved: &Resolved) -> Result<()> {
        let engine_dir = self.layout.engine_dir(&resolved.engine.version);
        self.install_artifact(&resolved.engine, engine_dir.clone())
            .await
            .map_err(|e| ConduitError::install("install database binaries", e))?;
        self.install_artifact(&resolved.extension, engine_dir)
            .await
            .map_err(|e| ConduitError::install("install foreign-data extension", e))?;
        Ok(())
    }

    async fn install_extension_only(
        &self,
        resolved: &Resolved,
        versions: &mut DatabaseVersionFile,
    ) -> Result<InstallAction> {
        let action = if versions.fdw_extension.is_installed() {
            InstallAction::Upgraded
        } else {
            InstallAction::Installed
        };
        let engine_dir = self.layout.engine_dir(&resolved.engine.version);
        self.install_artifact(&resolved.extension, engine_dir)
            .await
            .map_err(|e| ConduitError::install("install foreign-data extension", e))?;
        versions.fdw_extension = VersionFile::installed(&resolved.extension, String::new());
        versions
            .save(&self.layout.versions_file())
            .map_err(|e| ConduitError::install("record installed versions", e))?;
        info!("foreign-data extension {} installed", resolved.extension.version);
        Ok(action)
    }

    /// Removes any leftover of an interrupted install of the new version.
    fn clear_version_dir(&self, version: &str) -> Result<()> {
        let dir = self.layout.version_dir(version);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| ConduitError::file_system(&dir, e))?;
        }
        Ok(())
    }

    /// Initializes the new data directory and runs first-time setup on a
    /// temporary instance, restoring the migration archive when `restore` is
    /// set. Returns restore warnings.
    async fn initialize(&self, version: &str, restore: bool, cancel: &CancellationToken) -> Result<Vec<String>> {
        let bin_dir = self.layout.bin_dir(version);
        let data_dir = self.layout.data_dir(version);
        setup::init_data_dir(&bin_dir, &data_dir, cancel)
            .await
            .map_err(|e| ConduitError::install("initialize data directory", e))?;

        let mut instance = PgRunningInfo::start(
            &self.layout.engine_binary(version),
            &data_dir,
            &self.layout.logs_dir(),
            cancel,
        )
        .await
        .map_err(|e| ConduitError::install("start new database", e))?;

        let result = self.setup_instance(&mut instance, &bin_dir, restore, cancel).await;
        let stopped = instance.stop(cancel).await;
        let warnings = result?;
        stopped.map_err(|e| ConduitError::install("stop new database", e))?;
        Ok(warnings)
    }

    async fn setup_instance(
        &self,
        instance: &mut PgRunningInfo,
        bin_dir: &Path,
        restore: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        setup::run_first_time_setup(instance, &self.database_name)
            .await
            .map_err(|e| ConduitError::install("first-time database setup", e))?;
        instance.database = self.database_name.clone();
        if !restore {
            return Ok(Vec::new());
        }
        BackupManager::new(self.layout.clone(), bin_dir)
            .restore(instance, cancel)
            .await
            .map_err(|e| ConduitError::install("restore backup", e))
    }

    async fn fresh_install(
        &self,
        resolved: &Resolved,
        versions: &mut DatabaseVersionFile,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let version = &resolved.engine.version;
        info!("installing database {version}");
        self.clear_version_dir(version)
            .map_err(|e| ConduitError::install("prepare install directory", e))?;
        self.install_binaries(resolved).await?;
        self.initialize(version, false, cancel).await?;
        self.record(resolved, versions).await
    }

    async fn migrate(
        &self,
        previous: &str,
        resolved: &Resolved,
        versions: &mut DatabaseVersionFile,
        cancel: &CancellationToken,
    ) -> Result<InstallOutcome> {
        let version = &resolved.engine.version;
        info!("upgrading database from {previous} to {version}");
        let mut warnings = Vec::new();

        self.clear_version_dir(version)
            .map_err(|e| ConduitError::install("prepare install directory", e))?;
        let engine_dir = self.layout.engine_dir(version);
        self.install_artifact(&resolved.engine, engine_dir.clone())
            .await
            .map_err(|e| ConduitError::install("install database binaries", e))?;

        // The new pg_dump can read older servers.
        let backup = BackupManager::new(self.layout.clone(), self.layout.bin_dir(version));
        let backed_up = match backup
            .take_backup_from(
                &self.layout.engine_binary(previous),
                &self.layout.data_dir(previous),
                cancel,
            )
            .await
        {
            Ok(_) => true,
            Err(e) => {
                let message = format!(
                    "could not back up data from database {previous}, keeping {}: {e}",
                    self.layout.version_dir(previous).display()
                );
                warn!("{message}");
                warnings.push(message);
                false
            }
        };

        self.install_artifact(&resolved.extension, engine_dir)
            .await
            .map_err(|e| ConduitError::install("install foreign-data extension", e))?;
        warnings.extend(self.initialize(version, backed_up, cancel).await?);
        self.record(resolved, versions).await?;

        if backed_up {
            let old_dir = self.layout.version_dir(previous);
            if let Err(e) = std::fs::remove_dir_all(&old_dir) {
                warnings.push(format!("could not remove {}: {e}", old_dir.display()));
            } else {
                info!("removed previous database {previous}");
            }
        }

        Ok(InstallOutcome {
            engine: InstallAction::Upgraded,
            extension: InstallAction::Upgraded,
            warnings,
        })
    }

    /// Writes the version record. An install is complete only once this
    /// has happened.
    async fn record(&self, resolved: &Resolved, versions: &mut DatabaseVersionFile) -> Result<()> {
        let binary = self.layout.engine_binary(&resolved.engine.version);
        let binary_digest = tokio::task::spawn_blocking(move || artifact::digest_file(&binary))
            .await
            .map_err(ConduitError::join)?
            .map_err(|e| ConduitError::install("record installed versions", e))?;
        versions.embedded_db = VersionFile::installed(&resolved.engine, binary_digest);
        versions.fdw_extension = VersionFile::installed(&resolved.extension, String::new());
        versions
            .save(&self.layout.versions_file())
            .map_err(|e| ConduitError::install("record installed versions", e))?;
        info!(
            "database {} with extension {} installed",
            resolved.engine.version, resolved.extension.version
        );
        Ok(())
    }
}
