//! Connection reconciliation.
//!
//! Declared connections come from a [`ConnectionConfigLoader`]. The last set
//! that was applied is kept as a snapshot next to the install. A refresh
//! diffs the two, consults the [`PluginCatalog`] and drives a
//! [`SchemaBackend`] until every declared connection has a schema or an
//! `error` row.
//!
//! ```text
//!  declared ─┐
//!            ├─▶ diff ─▶ promote (force, retry) ─▶ mark ─▶ drop ─▶ import ─▶ record
//!  applied ──┘                                                                  │
//!     ▲                                                                         │
//!     └──────────────────── applied snapshot (failures rolled back) ◀───────────┘
//! ```

pub mod backend;
pub mod config;
pub mod diff;
pub mod plugins;
pub mod reconcile;
pub mod snapshot;
pub mod sql;

pub use backend::{PgSchemaBackend, SchemaBackend, StatePager};
pub use config::{ConnectionConfigLoader, TomlConnectionLoader};
pub use diff::{diff, ConnectionDiff, PluginGroups};
pub use plugins::{DirectoryPluginCatalog, PluginCatalog, PluginManifest, TableManifest};
pub use reconcile::{Reconciler, Reconciliation, RefreshResult};
pub use snapshot::{load_snapshot, save_snapshot};
