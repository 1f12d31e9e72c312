//! Queries the supervisor and client counter run against a live engine.

use crate::constants::{DATABASE_USER, MAINTENANCE_DATABASE};
use crate::error::{DatabaseResultExt, Result};

use super::quote_literal;

impl super::Database {
    /// Liveness check.
    pub fn ping(&mut self) -> Result<()> {
        self.client
            .query_one("SELECT 1", &[])
            .db_context("Liveness query failed")?;
        Ok(())
    }

    /// Whether the engine is still replaying WAL after a crash.
    pub fn is_in_recovery(&mut self) -> Result<bool> {
        let row = self
            .client
            .query_one("SELECT pg_is_in_recovery()", &[])
            .db_context("Failed to query recovery status")?;
        Ok(row.get(0))
    }

    /// The single user database of the instance, if one has been created.
    pub fn discover_database_name(&mut self) -> Result<Option<String>> {
        let rows = self
            .client
            .query(
                "SELECT datname FROM pg_database \
                 WHERE NOT datistemplate AND datname <> $1 \
                 ORDER BY datname LIMIT 1",
                &[&MAINTENANCE_DATABASE],
            )
            .db_context("Failed to discover database name")?;
        Ok(rows.first().map(|row| row.get(0)))
    }

    /// Sets the password of the application user.
    pub fn set_user_password(&mut self, password: &str) -> Result<()> {
        let sql = format!(
            "ALTER ROLE {} WITH PASSWORD {}",
            DATABASE_USER,
            quote_literal(password)
        );
        self.client
            .batch_execute(&sql)
            .db_context("Failed to set database user password")
    }

    /// Client sessions grouped by `application_name`, excluding `own_app_name`.
    pub fn client_sessions(&mut self, own_app_name: &str) -> Result<Vec<(String, i64)>> {
        let rows = self
            .client
            .query(
                "SELECT application_name, count(*) FROM pg_stat_activity \
                 WHERE client_port IS NOT NULL \
                   AND backend_type = 'client backend' \
                   AND application_name <> $1 \
                 GROUP BY application_name",
                &[&own_app_name],
            )
            .db_context("Failed to query client sessions")?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<_, String>(0), row.get::<_, i64>(1)))
            .collect())
    }
}
