//! Human-readable rendering of service, install and connection state.
//!
//! Domain types stay free of presentation. Everything printed by the CLI goes
//! through a `Display` implementation in this module, producing markdown the
//! terminal renderer turns into styled output.
//!
//! ```text
//! ┌──────────────────┐    ┌──────────────────┐    ┌──────────────────┐
//! │  Domain values   │    │ Display impls &  │    │    Markdown      │
//! │ (running info,   │───▶│ newtype wrappers │───▶│   (terminal)     │
//! │  states, results)│    │                  │    │                  │
//! └──────────────────┘    └──────────────────┘    └──────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`models`]: `Display` for running info, versions and connection states
//! - [`results`]: `Display` for operation outcomes (start, stop, install,
//!   refresh)
//! - [`collections`]: [`ConnectionStates`], the connection state table
//! - [`datetime`]: [`LocalDateTime`] for timestamps in the system time zone
//!
//! Passwords never reach the output: running info is always rendered with
//! the password replaced by a placeholder.
//!
//! ```rust
//! use conduit_core::config::{Invoker, ListenMode};
//! use conduit_core::service::RunningInstanceInfo;
//!
//! let info = RunningInstanceInfo::new(
//!     4242,
//!     9193,
//!     ListenMode::Local,
//!     Invoker::Service,
//!     "abcd-efgh-ijkl".to_string(),
//! );
//! let output = info.to_string();
//! assert!(output.contains("XXXX-XXXX-XXXX"));
//! assert!(!output.contains("abcd-efgh-ijkl"));
//! ```

pub mod collections;
pub mod datetime;
pub mod models;
pub mod results;

pub use collections::ConnectionStates;
pub use datetime::LocalDateTime;
pub use models::InstalledVersions;
pub use results::RefreshReport;
