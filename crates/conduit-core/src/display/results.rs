//! Display implementations for operation outcomes.

use std::fmt;

use super::collections::ConnectionStates;
use super::models::InstalledVersions;
use crate::connections::RefreshResult;
use crate::install::{InstallAction, InstallOutcome};
use crate::orchestrator::{RestartOutcome, ServiceStatus, StartReport};
use crate::service::{StartResult, StopStatus};

impl fmt::Display for RefreshResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.error {
            return write!(f, "connection refresh failed: {error}");
        }
        write!(
            f,
            "{} updated, {} deleted, {} failed",
            self.updated.len(),
            self.deleted.len(),
            self.failed.len()
        )?;
        if !self.failed.is_empty() {
            write!(f, ": {}", self.failed.join(", "))?;
        }
        Ok(())
    }
}

/// Refresh outcome with its warnings, for the terminal.
pub struct RefreshReport<'a>(pub &'a RefreshResult);

impl fmt::Display for RefreshReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.0)?;
        if !self.0.warnings.is_empty() {
            writeln!(f)?;
            writeln!(f, "## Warnings")?;
            writeln!(f)?;
            for warning in &self.0.warnings {
                writeln!(f, "- {warning}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for StopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopStatus::Stopped => f.write_str("Database service stopped."),
            StopStatus::NotRunning => f.write_str("Database service is not running."),
            StopStatus::ClientsAttached(count) => write!(
                f,
                "Database service has {} connected client(s) ({} from other conduit processes, {} external); \
                 not stopping. Use --force to stop anyway.",
                count.total(),
                count.conduit,
                count.other
            ),
        }
    }
}

impl fmt::Display for StartResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartResult::Started(info) => {
                writeln!(f, "Database service started on port {}.", info.port)?;
            }
            StartResult::AlreadyRunning(info) => {
                writeln!(f, "Database service already running on port {}.", info.port)?;
            }
        }
        writeln!(f)?;
        write!(f, "{}", self.info())
    }
}

impl fmt::Display for InstallAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InstallAction::AlreadyCurrent => "already current",
            InstallAction::Installed => "installed",
            InstallAction::Upgraded => "upgraded",
        })
    }
}

impl fmt::Display for InstallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- **Engine**: {}", self.engine)?;
        writeln!(f, "- **Extension**: {}", self.extension)?;
        for warning in &self.warnings {
            writeln!(f, "- **Warning**: {warning}")?;
        }
        Ok(())
    }
}

impl fmt::Display for StartReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.install.changed() {
            writeln!(f, "## Install")?;
            writeln!(f)?;
            writeln!(f, "{}", self.install)?;
        }
        write!(f, "{}", self.start)?;
        if let Some(refresh) = &self.refresh {
            writeln!(f)?;
            writeln!(f, "## Connections")?;
            writeln!(f)?;
            write!(f, "{}", RefreshReport(refresh))?;
        }
        Ok(())
    }
}

impl fmt::Display for RestartOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartOutcome::Restarted(report) => write!(f, "{report}"),
            RestartOutcome::ClientsAttached(count) => {
                writeln!(f, "{}", StopStatus::ClientsAttached(*count))
            }
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.running {
            Some(info) => write!(f, "{info}")?,
            None => writeln!(f, "{}", StopStatus::NotRunning)?,
        }
        writeln!(f)?;
        write!(f, "{}", InstalledVersions(&self.versions))?;
        if let Some(states) = &self.connections {
            writeln!(f)?;
            writeln!(f, "## Connections")?;
            writeln!(f)?;
            write!(f, "{}", ConnectionStates(states.clone()))?;
        }
        Ok(())
    }
}
