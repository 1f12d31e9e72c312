//! Internal schema initialization.

use crate::error::{DatabaseResultExt, Result};

/// DDL for the internal schema and the connection state table.
pub const CONNECTION_STATE_SQL: &str = include_str!("../../assets/connection_state.sql");

impl super::Database {
    /// Creates the internal schema and connection state table when missing.
    pub fn ensure_internal_schema(&mut self) -> Result<()> {
        self.client
            .batch_execute(CONNECTION_STATE_SQL)
            .db_context("Failed to initialize internal schema")
    }
}
