//! Spawning the engine and waiting for it to accept connections.

use std::fs::OpenOptions;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, trace};
use tokio_util::sync::CancellationToken;

use super::process::{ChildProcess, ProcessHandle};
use crate::constants::{APP_NAME, READY_POLL_INTERVAL, SERVICE_MARKER};
use crate::db::{ConnectParams, Database};
use crate::error::{ConduitError, FsResultExt, Result};

const INCLUDE_LINE: &str = "include = 'conduit.conf'";

/// Points `postgresql.conf` at `conduit.conf` and rewrites the latter. TLS
/// is enabled only when a certificate pair sits in the data directory.
pub fn write_engine_config(data_dir: &Path) -> Result<()> {
    let main_conf = data_dir.join("postgresql.conf");
    let existing = match std::fs::read_to_string(&main_conf) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ConduitError::file_system(&main_conf, e)),
    };
    if !existing.lines().any(|line| line.trim() == INCLUDE_LINE) {
        let mut contents = existing;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(INCLUDE_LINE);
        contents.push('\n');
        std::fs::write(&main_conf, contents).fs_context(&main_conf)?;
    }

    let conduit_conf = data_dir.join(format!("{APP_NAME}.conf"));
    std::fs::write(&conduit_conf, engine_settings(data_dir)).fs_context(&conduit_conf)
}

fn engine_settings(data_dir: &Path) -> String {
    let cert = data_dir.join("server.crt");
    let key = data_dir.join("server.key");
    let mut settings = String::from("# Managed by conduit; rewritten on every start.\n");
    if cert.exists() && key.exists() {
        settings.push_str("ssl = on\n");
        settings.push_str(&format!("ssl_cert_file = '{}'\n", cert.display()));
        settings.push_str(&format!("ssl_key_file = '{}'\n", key.display()));
    } else {
        settings.push_str("ssl = off\n");
    }
    settings
}

/// Fails with `PortInUse` when `port` cannot be bound on any of `addresses`.
pub fn ensure_port_free(port: u16, addresses: &[IpAddr]) -> Result<()> {
    for address in addresses {
        if TcpListener::bind(SocketAddr::new(*address, port)).is_err() {
            return Err(ConduitError::PortInUse {
                port,
                address: address.to_string(),
            });
        }
    }
    Ok(())
}

/// A loopback port nothing is listening on right now.
pub fn find_free_port() -> Result<u16> {
    let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
        .map_err(|e| ConduitError::Configuration {
            message: format!("could not find a free port: {e}"),
        })?;
    let addr = listener.local_addr().map_err(|e| ConduitError::Configuration {
        message: format!("could not find a free port: {e}"),
    })?;
    Ok(addr.port())
}

/// Everything needed to launch one engine process.
#[derive(Debug, Clone)]
pub struct EngineCommand {
    pub binary: PathBuf,
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub port: u16,
    pub listen_addresses: Vec<String>,
}

impl EngineCommand {
    pub fn args(&self) -> Vec<String> {
        vec![
            "-p".to_string(),
            self.port.to_string(),
            "-c".to_string(),
            format!("listen_addresses={}", self.listen_addresses.join(",")),
            "-c".to_string(),
            SERVICE_MARKER.to_string(),
            "-c".to_string(),
            format!("cluster_name={APP_NAME}"),
            "-c".to_string(),
            format!("log_directory={}", self.logs_dir.display()),
            "-D".to_string(),
            self.data_dir.display().to_string(),
        ]
    }

    /// Log file for today's engine output.
    pub fn log_file(&self) -> PathBuf {
        let date = jiff::Zoned::now().strftime("%Y-%m-%d").to_string();
        self.logs_dir.join(format!("database-{date}.log"))
    }

    /// Starts the engine in its own process group so it outlives this
    /// process and does not receive the terminal's signals.
    pub fn spawn(&self) -> Result<ChildProcess> {
        std::fs::create_dir_all(&self.logs_dir).fs_context(&self.logs_dir)?;
        let log_path = self.log_file();
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .fs_context(&log_path)?;
        let log_err = log.try_clone().fs_context(&log_path)?;

        debug!("spawning {} {:?}", self.binary.display(), self.args());
        let child = Command::new(&self.binary)
            .args(self.args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err))
            .process_group(0)
            .spawn()
            .fs_context(&self.binary)?;
        info!("engine started with pid {} on port {}", child.id(), self.port);
        Ok(ChildProcess::new(child))
    }
}

/// Polls until the engine accepts a session and has left recovery.
///
/// The wait is bounded only by `cancel`. `process` is checked on every round
/// so an engine that dies during startup fails fast instead of polling
/// forever.
pub async fn wait_until_ready(
    params: &ConnectParams,
    process: &dyn ProcessHandle,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut accepting = false;
    loop {
        if !process.is_alive() {
            return Err(ConduitError::Configuration {
                message: format!(
                    "database process {} exited during startup; check the logs directory",
                    process.pid()
                ),
            });
        }

        let check_params = params.clone();
        let readiness = tokio::task::spawn_blocking(move || -> Result<bool> {
            let mut db = Database::connect(&check_params)?;
            db.ping()?;
            db.is_in_recovery()
        })
        .await
        .map_err(ConduitError::join)?;

        match readiness {
            Ok(false) => {
                debug!("engine on port {} is ready", params.port);
                return Ok(());
            }
            Ok(true) => {
                if !accepting {
                    info!("engine on port {} is recovering", params.port);
                    accepting = true;
                }
            }
            Err(e) => trace!("engine on port {} not ready: {e}", params.port),
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ConduitError::timeout("waiting for the database to accept connections"));
            }
            _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
        }
    }
}
