//! Data models for declared connections and their reconciliation state.
//!
//! Display implementations for these models live in
//! [`crate::display::models`], keeping data separate from presentation.

pub mod connection;
pub mod state;

pub use connection::{ConnectionConfig, ConnectionSet, RateLimiterSpec};
pub use state::{ConnectionState, ConnectionStatus};
