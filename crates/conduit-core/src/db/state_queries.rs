//! Connection state table queries.

use jiff::Timestamp;

use crate::error::{ConduitError, DatabaseResultExt, Result};
use crate::models::{ConnectionState, ConnectionStatus};

impl super::Database {
    /// Loads every connection state row, ordered by name.
    pub fn load_connection_states(&mut self) -> Result<Vec<ConnectionState>> {
        let rows = self
            .client
            .query(
                "SELECT name, status, details, comments_set, \
                        (extract(epoch FROM last_change) * 1000000)::bigint \
                 FROM conduit_internal.connection_state ORDER BY name",
                &[],
            )
            .db_context("Failed to query connection state")?;

        rows.iter()
            .map(|row| {
                let name: String = row.get(0);
                let status_str: String = row.get(1);
                let status = status_str.parse::<ConnectionStatus>().map_err(|reason| {
                    ConduitError::invalid_input("status").with_reason(reason)
                })?;
                let micros: i64 = row.get(4);
                let last_change = Timestamp::from_microsecond(micros).map_err(|e| {
                    ConduitError::invalid_input("last_change").with_reason(e.to_string())
                })?;
                Ok(ConnectionState {
                    name,
                    status,
                    details: row.get(2),
                    comments_set: row.get(3),
                    last_change,
                })
            })
            .collect()
    }

    /// Inserts or replaces a page of state rows in one transaction.
    pub fn upsert_connection_states(&mut self, states: &[ConnectionState]) -> Result<()> {
        if states.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .client
            .transaction()
            .db_context("Failed to begin transaction")?;
        let stmt = tx
            .prepare(
                "INSERT INTO conduit_internal.connection_state \
                    (name, status, details, comments_set, last_change) \
                 VALUES ($1, $2, $3, $4, to_timestamp($5::bigint / 1000000.0)) \
                 ON CONFLICT (name) DO UPDATE SET \
                    status = EXCLUDED.status, \
                    details = EXCLUDED.details, \
                    comments_set = EXCLUDED.comments_set, \
                    last_change = EXCLUDED.last_change",
            )
            .db_context("Failed to prepare state upsert")?;
        for state in states {
            let micros = state.last_change.as_microsecond();
            tx.execute(
                &stmt,
                &[
                    &state.name,
                    &state.status.as_str(),
                    &state.details,
                    &state.comments_set,
                    &micros,
                ],
            )
            .db_context("Failed to write connection state")?;
        }
        tx.commit().db_context("Failed to commit connection state")
    }

    /// Removes the rows of deleted connections.
    pub fn delete_connection_states(&mut self, names: &[String]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        self.client
            .execute(
                "DELETE FROM conduit_internal.connection_state WHERE name = ANY($1)",
                &[&names],
            )
            .db_context("Failed to delete connection state")?;
        Ok(())
    }
}
