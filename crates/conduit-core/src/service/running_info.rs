//! Persisted record of the running service.
//!
//! The record at `internal/conduit.json` is the single source of truth for
//! "is the service running and how do I connect to it". A record whose pid
//! is no longer alive is stale; callers purge it before acting on it.

use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::{Invoker, ListenMode};
use crate::constants::{DATABASE_USER, LOOPBACK};
use crate::db::{own_application_name, ConnectParams};
use crate::error::{ConduitError, FsResultExt, Result};

/// Current layout version of the record. Older records are migrated on load.
pub const RUNNING_INFO_STRUCT_VERSION: u32 = 20240612;

fn default_user() -> String {
    DATABASE_USER.to_string()
}

fn default_invoker() -> Invoker {
    Invoker::Service
}

/// What is running, where, and with which credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunningInstanceInfo {
    pub pid: u32,
    pub port: u16,
    /// Resolved bind addresses
    #[serde(default)]
    pub listen: Vec<String>,
    /// Bind addresses as handed to the engine
    #[serde(default)]
    pub given_listen: Vec<String>,
    #[serde(default)]
    pub listen_type: ListenMode,
    #[serde(default = "default_invoker")]
    pub invoker: Invoker,
    pub password: String,
    #[serde(default = "default_user")]
    pub user: String,
    /// Empty until the engine has accepted connections
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub struct_version: u32,
}

impl RunningInstanceInfo {
    pub fn new(pid: u32, port: u16, listen: ListenMode, invoker: Invoker, password: String) -> Self {
        Self {
            pid,
            port,
            listen: listen
                .resolved_addresses()
                .iter()
                .map(ToString::to_string)
                .collect(),
            given_listen: listen.given_addresses(),
            listen_type: listen,
            invoker,
            password,
            user: default_user(),
            database: String::new(),
            struct_version: RUNNING_INFO_STRUCT_VERSION,
        }
    }

    /// Reads the record at `path`. Missing file means not running. Records
    /// written by an older release are upgraded in place.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConduitError::file_system(path, e)),
        };
        let mut info: Self = serde_json::from_str(&contents)?;
        if info.struct_version < RUNNING_INFO_STRUCT_VERSION {
            log::debug!(
                "migrating running info from struct version {} to {}",
                info.struct_version,
                RUNNING_INFO_STRUCT_VERSION
            );
            info.struct_version = RUNNING_INFO_STRUCT_VERSION;
            info.save(path)?;
        }
        Ok(Some(info))
    }

    /// Writes the record atomically, readable by the owner only since it
    /// carries a password.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_private_file(path, &json)
    }

    /// Deletes the record at `path`; a missing file is not an error.
    pub fn remove(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ConduitError::file_system(path, e)),
        }
    }

    /// Superuser session on the recorded port.
    pub fn superuser_params(&self) -> ConnectParams {
        let params = ConnectParams::maintenance(self.port);
        if self.database.is_empty() {
            params
        } else {
            params.with_database(&self.database)
        }
    }

    /// Session as the application user, the way external clients connect.
    pub fn client_params(&self) -> ConnectParams {
        ConnectParams {
            host: LOOPBACK.to_string(),
            port: self.port,
            user: self.user.clone(),
            password: Some(self.password.clone()),
            database: self.database.clone(),
            application_name: own_application_name(),
        }
    }

    /// Connection string for users, with the password left out.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}@{}:{}/{}",
            self.user, LOOPBACK, self.port, self.database
        )
    }
}

/// Writes `contents` to `path` with mode 0600 via a sibling temp file and a
/// rename, so readers never see a partial file.
pub(crate) fn write_private_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).fs_context(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(&tmp)
        .fs_context(&tmp)?;
    file.write_all(contents).fs_context(&tmp)?;
    file.sync_all().fs_context(&tmp)?;
    std::fs::rename(&tmp, path).fs_context(path)
}
