//! Core library of the conduit control plane.
//!
//! Conduit runs a local database engine on behalf of a CLI and keeps a set
//! of plugin-backed foreign-data connections imported into it. This crate
//! holds everything below the CLI:
//!
//! - [`service`]: process supervision, running-state record, graceful
//!   shutdown by escalating signals
//! - [`install`]: engine and extension install, upgrade and data migration
//! - [`backup`]: dump, restore in two passes, retention of old dumps
//! - [`connections`]: diffing declared connections against the applied set
//!   and turning the difference into schema operations with resumable state
//! - [`orchestrator`]: the high-level API tying the above together
//!
//! # Display Architecture
//!
//! Domain values are rendered through `Display` implementations in
//! [`display`], producing markdown the CLI renders for the terminal.
//!
//! # Quick Start
//!
//! ```rust
//! use conduit_core::OrchestratorBuilder;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = OrchestratorBuilder::new()
//!     .with_install_dir(Some("/tmp/conduit"))
//!     .build()
//!     .await?;
//!
//! let cancel = CancellationToken::new();
//! let status = orchestrator.status().await?;
//! if status.running.is_none() {
//!     orchestrator.start_service(Default::default(), &cancel).await?;
//! }
//! let result = orchestrator.refresh_connections(&[], &cancel).await?;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod config;
pub mod connections;
pub mod constants;
pub mod db;
pub mod display;
pub mod error;
pub mod install;
pub mod models;
pub mod orchestrator;
pub mod service;
pub mod tools;

pub use config::{InstallLayout, Invoker, ListenMode, ServiceConfig};
pub use connections::RefreshResult;
pub use error::{ConduitError, ErrorCategory, Result};
pub use install::{InstallAction, InstallOutcome};
pub use orchestrator::{
    Orchestrator, OrchestratorBuilder, RestartOutcome, ServiceStatus, StartOptions, StartReport,
};
pub use service::{StartResult, StopStatus};
