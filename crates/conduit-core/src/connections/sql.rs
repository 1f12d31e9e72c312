//! Schema-level SQL for connections.

use crate::constants::{FOREIGN_SERVER, USERS_ROLE};
use crate::db::{quote_ident, quote_literal};
use crate::models::ConnectionConfig;

use super::plugins::PluginManifest;

/// Statements that drop and re-import the schema of `connection`, run as
/// one transaction.
pub fn update_schema_sql(connection: &ConnectionConfig) -> Vec<String> {
    let schema = quote_ident(&connection.name);
    let comment = quote_literal(&format!("conduit plugin: {}", connection.plugin));
    vec![
        format!("DROP SCHEMA IF EXISTS {schema} CASCADE"),
        format!("CREATE SCHEMA {schema}"),
        format!("COMMENT ON SCHEMA {schema} IS {comment}"),
        format!("GRANT USAGE ON SCHEMA {schema} TO {USERS_ROLE}"),
        format!("ALTER DEFAULT PRIVILEGES IN SCHEMA {schema} GRANT SELECT ON TABLES TO {USERS_ROLE}"),
        format!(
            "IMPORT FOREIGN SCHEMA {schema} FROM SERVER {} INTO {schema}",
            quote_ident(FOREIGN_SERVER)
        ),
    ]
}

/// Drops the schema of connection `name`.
pub fn delete_schema_sql(name: &str) -> String {
    format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(name))
}

/// Table and column comments from `manifest` for the schema `schema`.
pub fn comment_sql(schema: &str, manifest: &PluginManifest) -> Vec<String> {
    let schema = quote_ident(schema);
    let mut statements = Vec::new();
    for (table, description) in &manifest.tables {
        let table_ref = format!("{schema}.{}", quote_ident(table));
        if let Some(text) = &description.description {
            statements.push(format!(
                "COMMENT ON FOREIGN TABLE {table_ref} IS {}",
                quote_literal(text)
            ));
        }
        for (column, text) in &description.columns {
            statements.push(format!(
                "COMMENT ON COLUMN {table_ref}.{} IS {}",
                quote_ident(column),
                quote_literal(text)
            ));
        }
    }
    statements
}
