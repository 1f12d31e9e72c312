//! Backup and restore of the application database across engine upgrades.
//!
//! A migration dumps the old instance into `backups/database.dump`, replays
//! it into the new instance in two passes (see [`toc`]), then keeps a
//! timestamped copy of the archive plus a plain SQL rendering of it. Only the
//! newest [`MAX_BACKUPS`] pairs are retained.

use std::path::{Path, PathBuf};

use log::{info, warn};
use tokio_util::sync::CancellationToken;

pub mod retention;
pub mod toc;

pub use toc::RestorePlan;

use crate::config::InstallLayout;
use crate::constants::{LOOPBACK, MAX_BACKUPS, SUPERUSER};
use crate::error::{FsResultExt, Result};
use crate::service::PgRunningInfo;
use crate::tools::run_tool;

/// Dumps and restores using the tools in one engine's `bin` directory.
#[derive(Debug, Clone)]
pub struct BackupManager {
    layout: InstallLayout,
    bin_dir: PathBuf,
}

impl BackupManager {
    pub fn new(layout: InstallLayout, bin_dir: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            bin_dir: bin_dir.into(),
        }
    }

    fn connection_args(port: u16, database: &str) -> Vec<String> {
        vec![
            format!("--host={LOOPBACK}"),
            format!("--port={port}"),
            format!("--username={SUPERUSER}"),
            format!("--dbname={database}"),
        ]
    }

    /// Dumps the `public` schema of `instance` into the migration archive.
    pub async fn backup(&self, instance: &PgRunningInfo, cancel: &CancellationToken) -> Result<PathBuf> {
        let archive = self.layout.backup_archive();
        let backups_dir = self.layout.backups_dir();
        std::fs::create_dir_all(&backups_dir).fs_context(&backups_dir)?;
        if archive.exists() {
            std::fs::remove_file(&archive).fs_context(&archive)?;
        }

        let mut args = vec![
            format!("--file={}", archive.display()),
            "--format=custom".to_string(),
            "--schema=public".to_string(),
        ];
        args.extend(Self::connection_args(instance.port, &instance.database));
        run_tool(&self.bin_dir.join("pg_dump"), &args, cancel).await?;
        info!("backed up '{}' to {}", instance.database, archive.display());
        Ok(archive)
    }

    /// Starts the engine at `binary` against `data_dir`, dumps it and stops
    /// it again.
    pub async fn take_backup_from(
        &self,
        binary: &Path,
        data_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let instance = PgRunningInfo::start(binary, data_dir, &self.layout.logs_dir(), cancel).await?;
        let result = self.backup(&instance, cancel).await;
        if let Err(e) = instance.stop(cancel).await {
            warn!("old database instance did not stop cleanly: {e}");
        }
        result
    }

    /// Restores the migration archive into `instance` and retains a
    /// timestamped copy. Returns warnings for non-fatal failures.
    ///
    /// # Errors
    ///
    /// Fails when listing the archive or the first restore pass fails.
    pub async fn restore(&self, instance: &PgRunningInfo, cancel: &CancellationToken) -> Result<Vec<String>> {
        self.restore_into(instance.port, &instance.database, cancel).await
    }

    async fn restore_into(&self, port: u16, database: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        let archive = self.layout.backup_archive();
        let pg_restore = self.bin_dir.join("pg_restore");
        let mut warnings = Vec::new();

        let listing = run_tool(
            &pg_restore,
            &["--list".to_string(), archive.display().to_string()],
            cancel,
        )
        .await?;
        let plan = RestorePlan::from_listing(&listing);
        info!(
            "restoring {} entries ({} view refreshes)",
            plan.len(),
            plan.refresh.len()
        );

        self.restore_pass(port, database, &plan.primary, "primary", cancel)
            .await?;
        if let Err(e) = self
            .restore_pass(port, database, &plan.refresh, "refresh", cancel)
            .await
        {
            let message = format!(
                "could not refresh materialized views after restore, refresh them manually: {e}"
            );
            warn!("{message}");
            warnings.push(message);
        }

        let text_copy = archive.with_extension("sql");
        run_tool(
            &pg_restore,
            &[
                format!("--file={}", text_copy.display()),
                archive.display().to_string(),
            ],
            cancel,
        )
        .await?;

        self.retain(&archive, &text_copy)?;
        Ok(warnings)
    }

    async fn restore_pass(
        &self,
        port: u16,
        database: &str,
        entries: &[String],
        label: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let list_file = self.layout.backups_dir().join(format!("restore-{label}.list"));
        std::fs::write(&list_file, toc::render_list(entries)).fs_context(&list_file)?;

        let mut args = Self::connection_args(port, database);
        args.extend([
            "--exit-on-error".to_string(),
            "--single-transaction".to_string(),
            format!("--use-list={}", list_file.display()),
            self.layout.backup_archive().display().to_string(),
        ]);
        let result = run_tool(&self.bin_dir.join("pg_restore"), &args, cancel).await;
        if let Err(e) = std::fs::remove_file(&list_file) {
            warn!("could not remove {}: {e}", list_file.display());
        }
        result.map(|_| ())
    }

    /// Moves the archive and its text copy to timestamped names and applies
    /// the retention cap.
    fn retain(&self, archive: &Path, text_copy: &Path) -> Result<()> {
        let stem = retention::archive_stem(jiff::Zoned::now().datetime());
        let dir = self.layout.backups_dir();
        let kept_archive = dir.join(format!("{stem}.dump"));
        let kept_text = dir.join(format!("{stem}.sql"));
        std::fs::rename(archive, &kept_archive).fs_context(&kept_archive)?;
        std::fs::rename(text_copy, &kept_text).fs_context(&kept_text)?;
        info!("kept backup {}", kept_archive.display());
        retention::trim_backups(&dir, MAX_BACKUPS)?;
        Ok(())
    }
}
