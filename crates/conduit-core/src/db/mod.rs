//! Database access for the managed engine.
//!
//! This module wraps a synchronous `postgres::Client`. Callers on the async
//! side move a [`Database`] into `tokio::task::spawn_blocking`, the same way
//! every other blocking call in the crate is isolated from the runtime.
//! Queries are grouped by concern in the submodules, each adding methods to
//! [`Database`].

use std::time::Duration;

use postgres::{Client, NoTls};

use crate::constants::{LOOPBACK, MAINTENANCE_DATABASE, SUPERUSER};
use crate::error::{DatabaseResultExt, Result};

pub mod migrations;
pub mod service_queries;
pub mod state_queries;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parameters for opening a session against an engine instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub database: String,
    pub application_name: String,
}

impl ConnectParams {
    /// Superuser session over loopback, which the engine trusts without a
    /// password.
    pub fn superuser(port: u16, database: impl Into<String>) -> Self {
        Self {
            host: LOOPBACK.to_string(),
            port,
            user: SUPERUSER.to_string(),
            password: None,
            database: database.into(),
            application_name: own_application_name(),
        }
    }

    /// Superuser session against the maintenance database.
    pub fn maintenance(port: u16) -> Self {
        Self::superuser(port, MAINTENANCE_DATABASE)
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }
}

/// `application_name` used by this process for its own sessions, so the
/// client counter can exclude them.
pub fn own_application_name() -> String {
    format!(
        "{}_client_{}",
        crate::constants::CLIENT_APP_NAME_PREFIX,
        std::process::id()
    )
}

/// Open session against an engine instance.
pub struct Database {
    client: Client,
}

impl Database {
    /// Connects using `params`.
    pub fn connect(params: &ConnectParams) -> Result<Self> {
        let mut config = postgres::Config::new();
        config
            .host(&params.host)
            .port(params.port)
            .user(&params.user)
            .dbname(&params.database)
            .application_name(&params.application_name)
            .connect_timeout(CONNECT_TIMEOUT);
        if let Some(password) = &params.password {
            config.password(password);
        }
        let client = config
            .connect(NoTls)
            .db_context("Failed to open database connection")?;
        Ok(Self { client })
    }

    /// Runs a batch of statements inside one transaction.
    pub fn execute_in_transaction(&mut self, statements: &[String]) -> Result<()> {
        let mut tx = self
            .client
            .transaction()
            .db_context("Failed to begin transaction")?;
        for statement in statements {
            tx.batch_execute(statement)
                .db_context(&format!("Failed to execute '{}'", first_line(statement)))?;
        }
        tx.commit().db_context("Failed to commit transaction")
    }

    /// Runs a batch of statements outside any explicit transaction.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.client
            .batch_execute(sql)
            .db_context(&format!("Failed to execute '{}'", first_line(sql)))
    }
}

fn first_line(sql: &str) -> &str {
    sql.trim().lines().next().unwrap_or_default()
}

/// Quotes an identifier for interpolation into DDL.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quotes a string literal for interpolation into DDL, where bind
/// parameters are not accepted.
pub fn quote_literal(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    if escaped.contains('\\') {
        format!("E'{}'", escaped.replace('\\', "\\\\"))
    } else {
        format!("'{escaped}'")
    }
}
