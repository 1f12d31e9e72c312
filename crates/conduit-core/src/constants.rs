//! Fixed identifiers shared by every component.

use std::time::Duration;

/// Application name; also the runtime marker the engine is launched with.
pub const APP_NAME: &str = "conduit";

/// Command-line argument identifying an engine started by this application.
pub const SERVICE_MARKER: &str = "application_name=conduit";

/// Fragment of the engine binary name used for process discovery.
pub const ENGINE_BINARY_FRAGMENT: &str = "postgres";

/// Subcommand token of the auxiliary plugin manager process.
pub const PLUGIN_MANAGER_TOKEN: &str = "plugin-manager";

/// Prefix of `application_name` for sessions opened by this application.
pub const CLIENT_APP_NAME_PREFIX: &str = "conduit";

/// Engine release the application expects.
pub const ENGINE_VERSION: &str = "14.2.0";

/// Foreign-data extension release the application expects.
pub const FDW_VERSION: &str = "1.9.0";

pub const DEFAULT_PORT: u16 = 9193;
pub const DEFAULT_DATABASE_NAME: &str = "conduit";

/// Maintenance database every engine instance has.
pub const MAINTENANCE_DATABASE: &str = "postgres";

pub const SUPERUSER: &str = "root";
pub const DATABASE_USER: &str = "conduit";
pub const USERS_ROLE: &str = "conduit_users";

pub const FDW_EXTENSION: &str = "conduit_postgres_fdw";
pub const FOREIGN_SERVER: &str = "conduit";

pub const INTERNAL_SCHEMA: &str = "conduit_internal";
pub const CONNECTION_STATE_TABLE: &str = "connection_state";

pub const LOOPBACK: &str = "127.0.0.1";

/// Shown in place of the password in any human-readable rendering.
pub const PASSWORD_PLACEHOLDER: &str = "XXXX-XXXX-XXXX";

/// Number of retained backup pairs.
pub const MAX_BACKUPS: usize = 5;

/// Default page size for connection state writes.
pub const STATE_PAGE_SIZE: usize = 100;

/// Error details stored in the state table are cut to this many characters.
pub const MAX_ERROR_DETAIL_LEN: usize = 1024;

/// Plugin protocol versions this release can import schemas from.
pub const MIN_PROTOCOL_VERSION: u32 = 18;
pub const MAX_PROTOCOL_VERSION: u32 = 20;

/// Poll interval while waiting for a process to exit.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll interval while waiting for the engine to accept connections.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub const ENV_INSTALL_DIR: &str = "CONDUIT_INSTALL_DIR";
pub const ENV_DATABASE_PORT: &str = "CONDUIT_DATABASE_PORT";
pub const ENV_DATABASE_PASSWORD: &str = "CONDUIT_DATABASE_PASSWORD";
pub const ENV_ARTIFACT_DIR: &str = "CONDUIT_ARTIFACT_DIR";

/// How long a start may take before it is abandoned.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);
