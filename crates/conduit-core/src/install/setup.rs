//! Data directory initialization and first-time database setup.

use std::path::Path;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::constants::{INTERNAL_SCHEMA, MAINTENANCE_DATABASE, SUPERUSER, USERS_ROLE};
use crate::db::{quote_ident, Database};
use crate::error::{ConduitError, FsResultExt, Result};
use crate::service::PgRunningInfo;
use crate::tools::run_tool;

/// Roles, extension and foreign server.
pub const BOOTSTRAP_SQL: &str = include_str!("../../assets/bootstrap.sql");

/// Arguments for `initdb` on `data_dir`.
pub fn initdb_args(data_dir: &Path) -> Vec<String> {
    vec![
        format!("--pgdata={}", data_dir.display()),
        "--auth=trust".to_string(),
        format!("--username={SUPERUSER}"),
        "--encoding=UTF8".to_string(),
        "--wal-segsize=1".to_string(),
    ]
}

/// The superuser is trusted only from the same host; everyone else needs a
/// password.
pub fn pg_hba_conf() -> String {
    format!(
        "# Managed by conduit.\n\
         # TYPE   DATABASE  USER  ADDRESS   METHOD\n\
         local    all       {SUPERUSER}  trust\n\
         hostssl  all       {SUPERUSER}  samehost  trust\n\
         host     all       {SUPERUSER}  samehost  trust\n\
         hostssl  all       all   all       md5\n\
         host     all       all   all       md5\n"
    )
}

/// Creates a fresh data directory with `initdb` from `bin_dir`.
pub async fn init_data_dir(bin_dir: &Path, data_dir: &Path, cancel: &CancellationToken) -> Result<()> {
    if data_dir.exists() {
        std::fs::remove_dir_all(data_dir).fs_context(data_dir)?;
    }
    std::fs::create_dir_all(data_dir).fs_context(data_dir)?;
    run_tool(&bin_dir.join("initdb"), &initdb_args(data_dir), cancel).await?;

    let hba = data_dir.join("pg_hba.conf");
    std::fs::write(&hba, pg_hba_conf()).fs_context(&hba)?;
    info!("initialized data directory {}", data_dir.display());
    Ok(())
}

/// Statements run inside the application database after bootstrap.
fn grant_statements() -> Vec<String> {
    let internal = quote_ident(INTERNAL_SCHEMA);
    vec![
        format!("GRANT USAGE ON SCHEMA {internal} TO {USERS_ROLE}"),
        format!("GRANT SELECT ON ALL TABLES IN SCHEMA {internal} TO {USERS_ROLE}"),
    ]
}

/// Creates the application database and everything inside it on a freshly
/// initialized instance.
pub async fn run_first_time_setup(instance: &PgRunningInfo, database_name: &str) -> Result<()> {
    let maintenance = instance.params().with_database(MAINTENANCE_DATABASE);
    let target = maintenance.clone().with_database(database_name);
    let database_name = database_name.to_string();

    tokio::task::spawn_blocking(move || {
        let mut admin = Database::connect(&maintenance)?;
        if admin.discover_database_name()?.as_deref() != Some(database_name.as_str()) {
            // CREATE DATABASE cannot run inside a transaction.
            admin.execute_batch(&format!("CREATE DATABASE {}", quote_ident(&database_name)))?;
        }
        drop(admin);

        let mut db = Database::connect(&target)?;
        db.execute_batch(BOOTSTRAP_SQL)?;
        db.ensure_internal_schema()?;
        db.execute_in_transaction(&grant_statements())?;
        info!("first-time setup of '{database_name}' complete");
        Ok(())
    })
    .await
    .map_err(ConduitError::join)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initdb_args() {
        let args = initdb_args(Path::new("/opt/conduit/db/14.2.0/data"));
        assert!(args.contains(&"--auth=trust".to_string()));
        assert!(args.contains(&"--username=root".to_string()));
        assert!(args.contains(&"--wal-segsize=1".to_string()));
        assert_eq!(args[0], "--pgdata=/opt/conduit/db/14.2.0/data");
    }

    #[test]
    fn test_hba_trusts_root_on_same_host_only() {
        let hba = pg_hba_conf();
        let trust_lines: Vec<&str> = hba
            .lines()
            .filter(|line| !line.starts_with('#') && line.ends_with("trust"))
            .collect();
        assert!(!trust_lines.is_empty());
        assert!(trust_lines.iter().all(|line| line.contains("root")));
        assert!(hba.lines().any(|line| line.starts_with("host ") && line.ends_with("md5")));
    }

    #[test]
    fn test_bootstrap_is_idempotent_sql() {
        assert!(BOOTSTRAP_SQL.contains("IF NOT EXISTS (SELECT FROM pg_roles WHERE rolname = 'conduit_users')"));
        assert!(BOOTSTRAP_SQL.contains("CREATE SERVER IF NOT EXISTS conduit"));
    }
}
