//! OS process handles and heuristic discovery of engine instances.
//!
//! Discovery deliberately does not rely on a registry owned by this crate:
//! orphaned engines must be found even when the running-state file is lost.
//! An engine process is recognised by its command line (the program name
//! contains [`ENGINE_BINARY_FRAGMENT`] and one argument equals
//! [`SERVICE_MARKER`]), scoped to the install directory when the program path
//! is absolute. The predicate sits behind [`ProcessFinder`] so it can be
//! replaced without touching callers.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{Arc, Mutex};

use sysinfo::{Pid, ProcessStatus, Signal, System};

use crate::constants::{APP_NAME, ENGINE_BINARY_FRAGMENT, PLUGIN_MANAGER_TOKEN, SERVICE_MARKER};

/// Shutdown levels of the engine, mapped onto Unix signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Wait for clients to disconnect (`SIGTERM`)
    Smart,
    /// Abort open transactions and exit cleanly (`SIGINT`)
    Fast,
    /// Exit without a clean shutdown; recovery runs on next start (`SIGQUIT`)
    Immediate,
}

impl StopSignal {
    pub fn as_sysinfo(self) -> Signal {
        match self {
            StopSignal::Smart => Signal::Term,
            StopSignal::Fast => Signal::Interrupt,
            StopSignal::Immediate => Signal::Quit,
        }
    }
}

/// A process the supervisor can signal and observe.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> u32;

    /// Delivers `signal`; returns false when the process could not be
    /// signalled (usually because it is already gone).
    fn signal(&self, signal: StopSignal) -> bool;

    fn is_alive(&self) -> bool;
}

/// Finds processes belonging to this application.
pub trait ProcessFinder: Send + Sync {
    /// Engine processes carrying the service marker.
    fn find_engine_instances(&self) -> Vec<Arc<dyn ProcessHandle>>;

    /// Auxiliary plugin manager processes.
    fn find_plugin_managers(&self) -> Vec<Arc<dyn ProcessHandle>>;

    /// Handle for `pid` when that process is alive.
    fn process(&self, pid: u32) -> Option<Arc<dyn ProcessHandle>>;
}

/// Whether `cmd` is the command line of an engine started by this
/// application from `install_dir`.
pub fn is_engine_command_line(cmd: &[String], install_dir: &Path) -> bool {
    let Some(program) = cmd.first() else {
        return false;
    };
    if !program.contains(ENGINE_BINARY_FRAGMENT) {
        return false;
    }
    if !cmd.iter().any(|arg| arg == SERVICE_MARKER) {
        return false;
    }
    let program_path = Path::new(program);
    !program_path.is_absolute() || program_path.starts_with(install_dir)
}

/// Whether `cmd` is the command line of this application's plugin manager.
pub fn is_plugin_manager_command_line(cmd: &[String]) -> bool {
    match cmd {
        [program, subcommand, ..] => {
            program.ends_with(APP_NAME) && subcommand == PLUGIN_MANAGER_TOKEN
        }
        _ => false,
    }
}

/// Process looked up by pid in the OS process table.
#[derive(Debug)]
pub struct SysinfoProcess {
    pid: Pid,
}

impl SysinfoProcess {
    pub fn new(pid: u32) -> Self {
        Self {
            pid: Pid::from_u32(pid),
        }
    }
}

impl ProcessHandle for SysinfoProcess {
    fn pid(&self) -> u32 {
        self.pid.as_u32()
    }

    fn signal(&self, signal: StopSignal) -> bool {
        let mut system = System::new();
        if !system.refresh_process(self.pid) {
            return false;
        }
        system
            .process(self.pid)
            .and_then(|process| process.kill_with(signal.as_sysinfo()))
            .unwrap_or(false)
    }

    fn is_alive(&self) -> bool {
        let mut system = System::new();
        if !system.refresh_process(self.pid) {
            return false;
        }
        // An exited child of this process lingers as a zombie until reaped.
        system
            .process(self.pid)
            .is_some_and(|process| process.status() != ProcessStatus::Zombie)
    }
}

/// A child spawned by this process; reaped on exit so it never lingers as a
/// zombie.
#[derive(Debug)]
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    /// Kills the child outright and reaps it.
    pub fn kill(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Err(err) = child.kill() {
                log::debug!("kill of pid {} failed: {err}", self.pid);
            }
            let _ = child.wait();
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn signal(&self, signal: StopSignal) -> bool {
        SysinfoProcess::new(self.pid).signal(signal)
    }

    fn is_alive(&self) -> bool {
        match self.child.lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            Err(_) => false,
        }
    }
}

/// [`ProcessFinder`] scanning the OS process table.
#[derive(Debug, Clone)]
pub struct SysinfoProcessFinder {
    install_dir: PathBuf,
}

impl SysinfoProcessFinder {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
        }
    }

    fn scan<F>(&self, predicate: F) -> Vec<Arc<dyn ProcessHandle>>
    where
        F: Fn(&[String]) -> bool,
    {
        let mut system = System::new();
        system.refresh_processes();
        let own_pid = std::process::id();
        system
            .processes()
            .iter()
            .filter(|(pid, process)| {
                pid.as_u32() != own_pid
                    && process.status() != ProcessStatus::Zombie
                    && predicate(process.cmd())
            })
            .map(|(pid, _)| Arc::new(SysinfoProcess::new(pid.as_u32())) as Arc<dyn ProcessHandle>)
            .collect()
    }
}

impl ProcessFinder for SysinfoProcessFinder {
    fn find_engine_instances(&self) -> Vec<Arc<dyn ProcessHandle>> {
        self.scan(|cmd| is_engine_command_line(cmd, &self.install_dir))
    }

    fn find_plugin_managers(&self) -> Vec<Arc<dyn ProcessHandle>> {
        self.scan(is_plugin_manager_command_line)
    }

    fn process(&self, pid: u32) -> Option<Arc<dyn ProcessHandle>> {
        let process = SysinfoProcess::new(pid);
        process
            .is_alive()
            .then(|| Arc::new(process) as Arc<dyn ProcessHandle>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_engine_command_line_requires_marker() {
        let install = Path::new("/home/u/.local/share/conduit");
        let engine = args(&[
            "/home/u/.local/share/conduit/db/14.2.0/postgres/bin/postgres",
            "-p",
            "9193",
            "-c",
            "application_name=conduit",
        ]);
        assert!(is_engine_command_line(&engine, install));

        let unmarked = args(&["/usr/lib/postgresql/14/bin/postgres", "-D", "/var/lib/pg"]);
        assert!(!is_engine_command_line(&unmarked, install));
    }

    #[test]
    fn test_engine_command_line_scoped_to_install_dir() {
        let install = Path::new("/opt/conduit");
        let elsewhere = args(&["/opt/other/bin/postgres", "-c", "application_name=conduit"]);
        assert!(!is_engine_command_line(&elsewhere, install));

        // Forked backends rewrite argv; a bare program name cannot be scoped.
        let relative = args(&["postgres", "-c", "application_name=conduit"]);
        assert!(is_engine_command_line(&relative, install));
    }

    #[test]
    fn test_engine_command_line_rejects_other_binaries() {
        let install = Path::new("/opt/conduit");
        let other = args(&["/opt/conduit/bin/conduit", "-c", "application_name=conduit"]);
        assert!(!is_engine_command_line(&other, install));
        assert!(!is_engine_command_line(&[], install));
    }

    #[test]
    fn test_plugin_manager_command_line() {
        assert!(is_plugin_manager_command_line(&args(&[
            "/usr/local/bin/conduit",
            "plugin-manager"
        ])));
        assert!(!is_plugin_manager_command_line(&args(&[
            "/usr/local/bin/conduit",
            "service"
        ])));
        assert!(!is_plugin_manager_command_line(&args(&["conduit"])));
    }

    #[test]
    fn test_finder_ignores_missing_pid() {
        let finder = SysinfoProcessFinder::new("/nonexistent");
        // Pid numbers near the top of the range are never allocated.
        assert!(finder.process(u32::MAX - 1).is_none());
    }
}
