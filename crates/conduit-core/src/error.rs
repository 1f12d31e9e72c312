//! Error types for the conduit control plane.
//!
//! Errors fall into four groups. Environment errors (port in use, filesystem
//! failures) are reported before any state is mutated. Transient connectivity
//! problems are retried under the caller's cancellation token and surface as
//! [`ConduitError::Timeout`] once the token fires. Per-connection failures
//! during reconciliation never appear here: they are recorded as state rows
//! and warnings. Orchestration failures are wrapped in one of the
//! user-facing categories ([`ConduitError::Install`], [`ConduitError::Start`],
//! [`ConduitError::StopTimeout`]) so the CLI can give actionable guidance.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Every failure the control plane can report.
#[derive(Error, Debug)]
pub enum ConduitError {
    /// A statement or connection to the engine failed
    #[error("database: {message}")]
    Database {
        message: String,
        #[source]
        source: postgres::Error,
    },
    /// An I/O call on a path under the install directory failed
    #[error("filesystem error at '{path}': {source}")]
    FileSystem {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No data directory could be derived from the XDG environment
    #[error("cannot resolve XDG data directory: {0}")]
    XdgDirectory(String),
    #[error("invalid value for '{field}': {reason}")]
    InvalidInput { field: String, reason: String },
    /// A state file or manifest is not valid JSON for its type
    #[error("malformed JSON: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
    #[error("configuration: {message}")]
    Configuration { message: String },
    /// The requested port cannot be bound
    #[error("port {port} is already in use on {address}")]
    PortInUse { port: u16, address: String },
    /// A service is already running on a different port
    #[error("service is already running on port {running}, cannot start on port {requested}")]
    PortMismatch { running: u16, requested: u16 },
    /// A live engine process exists without a running-state record
    #[error(
        "found a running database process (pid {pid}) with no service state; \
         stop it with `conduit service stop --force`"
    )]
    OrphanInstance { pid: u32 },
    /// The service is running and blocks installation
    #[error("cannot install while the service is running (pid {pid})")]
    ServiceRunning { pid: u32 },
    /// An external tool (initdb, pg_dump, pg_restore) failed
    #[error("{tool} failed ({status}): {stderr}")]
    ExternalTool {
        tool: String,
        status: String,
        stderr: String,
    },
    /// Artifact resolution or unpacking errors
    #[error("Artifact error: {message}")]
    Artifact { message: String },
    /// The caller's cancellation token fired while waiting
    #[error("timed out while {operation}")]
    Timeout { operation: String },
    /// Graceful shutdown did not reap the process, even after escalation
    #[error("service shutdown timed out (pid {pid})")]
    StopTimeout { pid: u32 },
    /// Force stop left one or more processes running
    #[error("failed to stop {count} process(es): {details}")]
    StopFailed { count: usize, details: String },
    /// Installation failed at the named step
    #[error("could not install: {step}: {source}")]
    Install {
        step: String,
        #[source]
        source: Box<ConduitError>,
    },
    /// The service could not be started
    #[error("could not start service: {source}")]
    Start {
        #[source]
        source: Box<ConduitError>,
    },
}

/// User-facing failure category, used by the CLI to pick an exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Install,
    Start,
    StopTimeout,
    Other,
}

/// Pairs a message with the `postgres` error behind it.
pub struct DatabaseErrorBuilder {
    message: String,
}

impl DatabaseErrorBuilder {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn with_source(self, source: postgres::Error) -> ConduitError {
        ConduitError::Database {
            message: self.message,
            source,
        }
    }
}

/// Names the offending field before the reason is known.
pub struct InvalidInputBuilder {
    field: String,
}

impl InvalidInputBuilder {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn with_reason(self, reason: impl Into<String>) -> ConduitError {
        ConduitError::InvalidInput {
            field: self.field,
            reason: reason.into(),
        }
    }
}

impl ConduitError {
    /// `ConduitError::database("load states").with_source(e)`
    pub fn database(message: impl Into<String>) -> DatabaseErrorBuilder {
        DatabaseErrorBuilder::new(message)
    }

    pub fn invalid_input(field: impl Into<String>) -> InvalidInputBuilder {
        InvalidInputBuilder::new(field)
    }

    /// Wraps an error from a filesystem call with the path it touched.
    pub fn file_system(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wraps an error as an installation failure at `step`.
    pub fn install(step: impl Into<String>, source: ConduitError) -> Self {
        // Keep the innermost step name when install errors nest.
        if let Self::Install { .. } = source {
            return source;
        }
        Self::Install {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Wraps an error as a start failure.
    pub fn start(source: ConduitError) -> Self {
        match source {
            Self::Start { .. } => source,
            other => Self::Start {
                source: Box::new(other),
            },
        }
    }

    /// Creates a timeout error for an operation interrupted by cancellation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Error for a failed blocking task join.
    pub fn join(err: tokio::task::JoinError) -> Self {
        Self::Configuration {
            message: format!("background task failed: {err}"),
        }
    }

    /// The user-facing category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Install { .. } | Self::ServiceRunning { .. } => ErrorCategory::Install,
            Self::Start { .. } | Self::PortInUse { .. } | Self::PortMismatch { .. } => {
                ErrorCategory::Start
            }
            Self::StopTimeout { .. } | Self::StopFailed { .. } => ErrorCategory::StopTimeout,
            _ => ErrorCategory::Other,
        }
    }
}

/// Attaches a message to a foreign error, turning it into
/// [`ConduitError::Configuration`].
pub trait ResultExt<T, E> {
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static;
}

/// `.db_context("...")` on `postgres` results.
pub trait DatabaseResultExt<T> {
    fn db_context(self, message: &str) -> Result<T>;
}

/// `.fs_context(path)` on I/O results.
pub trait FsResultExt<T> {
    /// Map I/O errors to a filesystem error naming `path`.
    fn fs_context(self, path: &Path) -> Result<T>;
}

impl<T, E> ResultExt<T, E> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn with_context<C>(self, context: C) -> Result<T>
    where
        C: fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| ConduitError::Configuration {
            message: format!("{context}: {e}"),
        })
    }
}

impl<T> DatabaseResultExt<T> for std::result::Result<T, postgres::Error> {
    fn db_context(self, message: &str) -> Result<T> {
        self.map_err(|e| ConduitError::database(message).with_source(e))
    }
}

impl<T> FsResultExt<T> for std::result::Result<T, std::io::Error> {
    fn fs_context(self, path: &Path) -> Result<T> {
        self.map_err(|e| ConduitError::file_system(path, e))
    }
}

/// Result alias used throughout `conduit-core`.
pub type Result<T> = std::result::Result<T, ConduitError>;
