//! Service configuration and the on-disk install layout.
//!
//! Everything the control plane writes lives under a single install
//! directory, defaulting to `$XDG_DATA_HOME/conduit`:
//!
//! ```text
//! <install>/
//! ├── db/<version>/postgres/     engine binaries, one directory per version
//! ├── db/<version>/data/         data directory for that engine version
//! ├── backups/                   retained migration archives
//! ├── config/connections.toml    declared connections
//! ├── internal/                  running-state, versions, password, locks
//! ├── logs/                      engine log files
//! └── plugins/<plugin>/          plugin manifests
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_NAME, DEFAULT_DATABASE_NAME, DEFAULT_PORT, ENV_ARTIFACT_DIR, ENV_DATABASE_PORT,
    ENV_INSTALL_DIR, STATE_PAGE_SIZE,
};
use crate::error::{ConduitError, Result};

/// Which interfaces the engine binds to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenMode {
    /// Loopback only
    #[default]
    Local,
    /// All interfaces
    Network,
}

impl ListenMode {
    /// Addresses as handed to the engine's `listen_addresses`.
    pub fn given_addresses(self) -> Vec<String> {
        match self {
            ListenMode::Local => vec!["localhost".to_string()],
            ListenMode::Network => vec!["*".to_string()],
        }
    }

    /// Resolved IP addresses for the given addresses.
    pub fn resolved_addresses(self) -> Vec<IpAddr> {
        match self {
            ListenMode::Local => {
                let mut resolved: Vec<IpAddr> = ("localhost", 0)
                    .to_socket_addrs()
                    .map(|addrs| addrs.map(|a| a.ip()).collect())
                    .unwrap_or_default();
                if resolved.is_empty() {
                    resolved.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
                }
                resolved.sort();
                resolved.dedup();
                resolved
            }
            ListenMode::Network => vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ListenMode::Local => "local",
            ListenMode::Network => "network",
        }
    }
}

impl FromStr for ListenMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(ListenMode::Local),
            "network" => Ok(ListenMode::Network),
            _ => Err(format!("Invalid listen mode: {s}")),
        }
    }
}

impl fmt::Display for ListenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The command that caused the service to start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Invoker {
    /// Explicit `service start`; never shut down implicitly
    Service,
    Query,
    Plugin,
    Refresh,
    Install,
}

impl Invoker {
    pub fn as_str(self) -> &'static str {
        match self {
            Invoker::Service => "service",
            Invoker::Query => "query",
            Invoker::Plugin => "plugin",
            Invoker::Refresh => "refresh",
            Invoker::Install => "install",
        }
    }
}

impl fmt::Display for Invoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved configuration for one control plane instance.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub install_dir: PathBuf,
    pub port: u16,
    pub listen: ListenMode,
    pub database_name: String,
    /// Directory holding unpacked engine and extension bundles
    pub artifact_dir: Option<PathBuf>,
    /// Declared connections file
    pub connection_config: PathBuf,
    pub plugin_dir: PathBuf,
    /// Number of state rows written per page during reconciliation
    pub state_page_size: usize,
}

impl ServiceConfig {
    /// Configuration rooted at `install_dir` with defaults for everything else.
    pub fn with_install_dir(install_dir: PathBuf) -> Self {
        Self {
            connection_config: install_dir.join("config").join("connections.toml"),
            plugin_dir: install_dir.join("plugins"),
            install_dir,
            port: DEFAULT_PORT,
            listen: ListenMode::Local,
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            artifact_dir: None,
            state_page_size: STATE_PAGE_SIZE,
        }
    }

    /// Applies the port and artifact directory overrides from the
    /// environment. The install directory is resolved separately by
    /// [`ServiceConfig::resolve_install_dir`] since every other default
    /// derives from it.
    pub fn apply_env(mut self) -> Result<Self> {
        if let Ok(port) = std::env::var(ENV_DATABASE_PORT) {
            self.port = port.parse().map_err(|_| {
                ConduitError::invalid_input(ENV_DATABASE_PORT)
                    .with_reason(format!("'{port}' is not a valid port"))
            })?;
        }
        if let Ok(dir) = std::env::var(ENV_ARTIFACT_DIR) {
            self.artifact_dir = Some(PathBuf::from(dir));
        }
        Ok(self)
    }

    /// `explicit`, else `CONDUIT_INSTALL_DIR`, else the XDG data directory.
    pub fn resolve_install_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
        if let Some(dir) = explicit {
            return Ok(dir);
        }
        match std::env::var_os(ENV_INSTALL_DIR) {
            Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
            _ => Self::default_install_dir(),
        }
    }

    /// The default install directory under the XDG data home.
    pub fn default_install_dir() -> Result<PathBuf> {
        xdg::BaseDirectories::with_prefix(APP_NAME)
            .create_data_directory("")
            .map_err(|e| ConduitError::XdgDirectory(e.to_string()))
    }

    pub fn layout(&self) -> InstallLayout {
        InstallLayout::new(&self.install_dir)
    }
}

/// Paths of every file and directory under the install root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn internal_dir(&self) -> PathBuf {
        self.root.join("internal")
    }

    pub fn running_info_file(&self) -> PathBuf {
        self.internal_dir().join(format!("{APP_NAME}.json"))
    }

    pub fn versions_file(&self) -> PathBuf {
        self.internal_dir().join("versions.json")
    }

    pub fn password_file(&self) -> PathBuf {
        self.internal_dir().join(".passwd")
    }

    pub fn install_lock_file(&self) -> PathBuf {
        self.internal_dir().join("install.lock")
    }

    pub fn connection_snapshot_file(&self) -> PathBuf {
        self.internal_dir().join("connections.json")
    }

    pub fn db_root(&self) -> PathBuf {
        self.root.join("db")
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.db_root().join(version)
    }

    pub fn engine_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("postgres")
    }

    pub fn bin_dir(&self, version: &str) -> PathBuf {
        self.engine_dir(version).join("bin")
    }

    pub fn engine_binary(&self, version: &str) -> PathBuf {
        self.bin_dir(version).join("postgres")
    }

    pub fn data_dir(&self, version: &str) -> PathBuf {
        self.version_dir(version).join("data")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Fixed path of the archive produced during a migration.
    pub fn backup_archive(&self) -> PathBuf {
        self.backups_dir().join("database.dump")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates the directories every operation expects to exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.internal_dir(),
            self.db_root(),
            self.backups_dir(),
            self.logs_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| ConduitError::file_system(&dir, e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = InstallLayout::new("/opt/conduit");
        assert_eq!(
            layout.engine_binary("14.2.0"),
            PathBuf::from("/opt/conduit/db/14.2.0/postgres/bin/postgres")
        );
        assert_eq!(
            layout.data_dir("14.2.0"),
            PathBuf::from("/opt/conduit/db/14.2.0/data")
        );
        assert_eq!(
            layout.running_info_file(),
            PathBuf::from("/opt/conduit/internal/conduit.json")
        );
    }

    #[test]
    fn test_listen_mode_parsing() {
        assert_eq!("LOCAL".parse::<ListenMode>(), Ok(ListenMode::Local));
        assert_eq!("network".parse::<ListenMode>(), Ok(ListenMode::Network));
        assert!("everywhere".parse::<ListenMode>().is_err());
    }

    #[test]
    fn test_local_listen_resolves_loopback() {
        let resolved = ListenMode::Local.resolved_addresses();
        assert!(!resolved.is_empty());
        assert!(resolved.iter().all(|ip| ip.is_loopback()));
        assert_eq!(ListenMode::Network.given_addresses(), vec!["*".to_string()]);
    }

    #[test]
    fn test_config_defaults_follow_install_dir() {
        let config = ServiceConfig::with_install_dir(PathBuf::from("/srv/c"));
        assert_eq!(
            config.connection_config,
            PathBuf::from("/srv/c/config/connections.toml")
        );
        assert_eq!(config.port, DEFAULT_PORT);
    }
}
