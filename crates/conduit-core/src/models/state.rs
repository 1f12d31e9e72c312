//! Per-connection reconciliation state, persisted in the managed database.

use std::str::FromStr;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::constants::MAX_ERROR_DETAIL_LEN;

/// Type-safe enumeration of connection statuses.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Declared but not yet processed
    Pending,

    /// Processing started in a run that never finished
    PendingIncomplete,

    /// Schema imported and queryable
    Ready,

    /// Schema is being dropped and recreated
    Updating,

    /// Schema is being dropped
    Deleting,

    /// Excluded from reconciliation until forced
    Disabled,

    /// Last attempt failed; details hold the error
    Error,
}

impl FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ConnectionStatus::Pending),
            "pending_incomplete" => Ok(ConnectionStatus::PendingIncomplete),
            "ready" => Ok(ConnectionStatus::Ready),
            "updating" => Ok(ConnectionStatus::Updating),
            "deleting" => Ok(ConnectionStatus::Deleting),
            "disabled" => Ok(ConnectionStatus::Disabled),
            "error" => Ok(ConnectionStatus::Error),
            _ => Err(format!("Invalid connection status: {s}")),
        }
    }
}

impl ConnectionStatus {
    /// Database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "pending",
            ConnectionStatus::PendingIncomplete => "pending_incomplete",
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Updating => "updating",
            ConnectionStatus::Deleting => "deleting",
            ConnectionStatus::Disabled => "disabled",
            ConnectionStatus::Error => "error",
        }
    }

    /// Whether a declared connection in this status must be re-imported even
    /// when its configuration did not change. Covers failures and runs that
    /// crashed between marking and completion. A declared row left at
    /// `deleting` may have lost its schema already.
    pub fn needs_retry(&self) -> bool {
        matches!(
            self,
            ConnectionStatus::Pending
                | ConnectionStatus::PendingIncomplete
                | ConnectionStatus::Updating
                | ConnectionStatus::Deleting
                | ConnectionStatus::Error
        )
    }

    /// Whether the connection's schema can be queried.
    pub fn is_queryable(&self) -> bool {
        matches!(self, ConnectionStatus::Ready)
    }
}

/// One row of the connection state table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionState {
    pub name: String,
    pub status: ConnectionStatus,
    /// Free-text details; the error message for `error` rows
    pub details: Option<String>,
    /// Whether table and column comments have been applied
    pub comments_set: bool,
    pub last_change: Timestamp,
}

impl ConnectionState {
    fn with_status(name: &str, status: ConnectionStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            details: None,
            comments_set: false,
            last_change: Timestamp::now(),
        }
    }

    /// A connection seen for the first time, before its first import.
    pub fn pending(name: &str) -> Self {
        Self::with_status(name, ConnectionStatus::Pending)
    }

    pub fn updating(name: &str) -> Self {
        Self::with_status(name, ConnectionStatus::Updating)
    }

    pub fn deleting(name: &str) -> Self {
        Self::with_status(name, ConnectionStatus::Deleting)
    }

    pub fn ready(name: &str, comments_set: bool) -> Self {
        Self {
            comments_set,
            ..Self::with_status(name, ConnectionStatus::Ready)
        }
    }

    /// An `error` row with the message truncated for storage.
    pub fn error(name: &str, message: &str) -> Self {
        Self {
            details: Some(truncate_details(message)),
            ..Self::with_status(name, ConnectionStatus::Error)
        }
    }
}

/// Cuts `message` to the stored maximum on a character boundary.
pub fn truncate_details(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_DETAIL_LEN {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(MAX_ERROR_DETAIL_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_database_strings() {
        for status in [
            ConnectionStatus::Pending,
            ConnectionStatus::PendingIncomplete,
            ConnectionStatus::Ready,
            ConnectionStatus::Updating,
            ConnectionStatus::Deleting,
            ConnectionStatus::Disabled,
            ConnectionStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ConnectionStatus>(), Ok(status));
        }
        assert!("bogus".parse::<ConnectionStatus>().is_err());
    }

    #[test]
    fn test_retry_statuses() {
        assert!(ConnectionStatus::Error.needs_retry());
        assert!(ConnectionStatus::Updating.needs_retry());
        assert!(ConnectionStatus::Pending.needs_retry());
        assert!(ConnectionStatus::Deleting.needs_retry());
        assert!(!ConnectionStatus::Ready.needs_retry());
        assert!(!ConnectionStatus::Disabled.needs_retry());
    }

    #[test]
    fn test_error_details_are_truncated() {
        let long = "x".repeat(MAX_ERROR_DETAIL_LEN * 2);
        let state = ConnectionState::error("aws", &long);
        let details = state.details.expect("details");
        assert_eq!(details.chars().count(), MAX_ERROR_DETAIL_LEN);
        assert!(details.ends_with("..."));

        let short = ConnectionState::error("aws", "boom");
        assert_eq!(short.details.as_deref(), Some("boom"));
    }

    #[test]
    fn test_serde_uses_snake_case() {
        let json = serde_json::to_string(&ConnectionStatus::PendingIncomplete).expect("serialize");
        assert_eq!(json, "\"pending_incomplete\"");
    }
}
