//! Display implementations for domain models.

use std::fmt;

use super::datetime::MaybeDateTime;
use crate::constants::PASSWORD_PLACEHOLDER;
use crate::install::{DatabaseVersionFile, VersionFile};
use crate::models::{ConnectionState, ConnectionStatus};
use crate::service::RunningInstanceInfo;

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.status)?;
        if let Some(details) = &self.details {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

impl fmt::Display for RunningInstanceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Database service")?;
        writeln!(f)?;
        writeln!(f, "- **Status**: running (pid {})", self.pid)?;
        writeln!(f, "- **Port**: {}", self.port)?;
        writeln!(f, "- **Listen**: {} ({})", self.listen_type, self.listen.join(", "))?;
        writeln!(f, "- **Started by**: {}", self.invoker)?;
        let database = if self.database.is_empty() {
            "(pending)"
        } else {
            self.database.as_str()
        };
        writeln!(f, "- **Database**: {database}")?;
        writeln!(f, "- **User**: {}", self.user)?;
        writeln!(f, "- **Password**: {PASSWORD_PLACEHOLDER}")?;
        writeln!(f)?;
        writeln!(f, "Connection string:")?;
        writeln!(f)?;
        writeln!(f, "```")?;
        writeln!(f, "{}", self.connection_string())?;
        writeln!(f, "```")
    }
}

impl fmt::Display for VersionFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_installed() {
            return f.write_str("not installed");
        }
        write!(
            f,
            "{} ({}, installed {})",
            self.version,
            self.binary_architecture,
            MaybeDateTime(&self.install_date)
        )
    }
}

/// Installed engine and extension releases.
pub struct InstalledVersions<'a>(pub &'a DatabaseVersionFile);

impl fmt::Display for InstalledVersions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "## Installed versions")?;
        writeln!(f)?;
        writeln!(f, "- **Engine**: {}", self.0.embedded_db)?;
        writeln!(f, "- **Extension**: {}", self.0.fdw_extension)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Invoker, ListenMode};

    #[test]
    fn test_running_info_redacts_password() {
        let mut info = RunningInstanceInfo::new(
            77,
            9193,
            ListenMode::Local,
            Invoker::Query,
            "sekr-etpa-sswd".to_string(),
        );
        info.database = "conduit".to_string();
        let output = info.to_string();
        assert!(output.contains(PASSWORD_PLACEHOLDER));
        assert!(!output.contains("sekr-etpa-sswd"));
        assert!(output.contains("pid 77"));
        assert!(output.contains("- **Database**: conduit"));
    }

    #[test]
    fn test_versions_not_installed() {
        let versions = DatabaseVersionFile::default();
        let output = InstalledVersions(&versions).to_string();
        assert!(output.contains("- **Engine**: not installed"));
    }

    #[test]
    fn test_error_state_shows_details() {
        let state = ConnectionState::error("aws", "plugin 'aws' is not installed");
        assert_eq!(
            state.to_string(),
            "aws: error (plugin 'aws' is not installed)"
        );
    }
}
