//! Applying a connection diff to the database.
//!
//! A run marks every affected connection first (`pending` for connections
//! without a row, `updating` / `deleting` otherwise), then touches schemas,
//! then records the outcome. A crash at any point leaves marked rows behind,
//! and marked rows of declared connections are retried by the next run.
//! Rows of connections that are no longer declared are dropped, whether or
//! not the previous snapshot still knows about them.
//!
//! ```text
//!   pending ──▶ ready ◀── updating ◀── ready (changed)
//!      │          ▲          │
//!      └──────────┴─ error ◀─┘         deleting ──▶ (row removed)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::Serialize;

use super::backend::{SchemaBackend, StatePager};
use super::diff::{diff, ConnectionDiff};
use super::plugins::{PluginCatalog, PluginManifest};
use super::sql::{comment_sql, delete_schema_sql, update_schema_sql};
use crate::error::Result;
use crate::models::{ConnectionConfig, ConnectionSet, ConnectionState};

/// Outcome of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshResult {
    pub updated: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
    pub warnings: Vec<String>,
    /// Set only when the run could not get going, or state could not be
    /// written
    pub error: Option<String>,
}

impl RefreshResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.failed.is_empty()
    }

    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// A run's result plus the set to persist as applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub result: RefreshResult,
    /// Declared set with failed connections rolled back to their previous
    /// config (or dropped when new), so they are retried next run
    pub applied: ConnectionSet,
}

/// Turns declared connections into schemas.
pub struct Reconciler<'a> {
    catalog: &'a dyn PluginCatalog,
    page_size: usize,
}

/// Per-run bookkeeping.
struct Run {
    result: RefreshResult,
    pager: StatePager,
    failed: BTreeSet<String>,
}

impl Run {
    fn fail<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B, name: &str, message: &str) -> Result<()> {
        self.failed.insert(name.to_string());
        self.result.failed.push(name.to_string());
        self.pager.upsert(backend, ConnectionState::error(name, message))
    }
}

impl<'a> Reconciler<'a> {
    pub fn new(catalog: &'a dyn PluginCatalog, page_size: usize) -> Self {
        Self { catalog, page_size }
    }

    /// Reconciles `declared` against the `previous` applied set. Names in
    /// `force` are re-imported even when unchanged.
    pub fn reconcile<B: SchemaBackend + ?Sized>(
        &self,
        backend: &mut B,
        previous: &ConnectionSet,
        declared: &ConnectionSet,
        force: &[String],
    ) -> Reconciliation {
        let mut run = Run {
            result: RefreshResult::default(),
            pager: StatePager::new(self.page_size),
            failed: BTreeSet::new(),
        };

        if let Err(e) = self.run(backend, previous, declared, force, &mut run) {
            warn!("connection refresh aborted: {e}");
            run.result.error = Some(e.to_string());
            return Reconciliation {
                result: run.result,
                applied: previous.clone(),
            };
        }

        let applied = applied_snapshot(previous, declared, &run.failed);
        info!("connection refresh: {}", run.result);
        Reconciliation {
            result: run.result,
            applied,
        }
    }

    fn run<B: SchemaBackend + ?Sized>(
        &self,
        backend: &mut B,
        previous: &ConnectionSet,
        declared: &ConnectionSet,
        force: &[String],
        run: &mut Run,
    ) -> Result<()> {
        backend.ensure_internal_schema()?;
        let states: BTreeMap<String, ConnectionState> = backend
            .load_states()?
            .into_iter()
            .map(|state| (state.name.clone(), state))
            .collect();

        let mut changes = diff(previous, declared);
        self.promote(&mut changes, declared, force, &states, &mut run.result);

        let updates = changes.update_names();
        let mut drops = changes.deleted_names();
        let mut removed = changes.removed_names();
        let undeclared: Vec<String> = states
            .keys()
            .filter(|name| !declared.contains(name) && !drops.contains(*name))
            .cloned()
            .collect();
        if !undeclared.is_empty() {
            debug!("dropping undeclared connections {}", undeclared.join(", "));
        }
        drops.extend(undeclared.iter().cloned());
        removed.extend(undeclared);

        if updates.is_empty() && drops.is_empty() {
            debug!("connections are up to date");
            return Ok(());
        }

        // Mark before touching any schema.
        for name in &updates {
            let marker = if states.contains_key(name) {
                ConnectionState::updating(name)
            } else {
                ConnectionState::pending(name)
            };
            run.pager.upsert(backend, marker)?;
        }
        for name in &removed {
            run.pager.upsert(backend, ConnectionState::deleting(name))?;
        }
        run.pager.flush(backend)?;

        for name in drops {
            match backend.execute_transaction(&[delete_schema_sql(&name)]) {
                Ok(()) if removed.contains(&name) => {
                    run.pager.delete(backend, name.clone())?;
                    run.result.deleted.push(name);
                }
                Ok(()) => {}
                Err(e) => {
                    let message = format!("failed to drop schema '{name}': {e}");
                    run.result.warn(message.clone());
                    run.fail(backend, &name, &message)?;
                }
            }
        }

        for (plugin, connections) in changes.updates_by_plugin() {
            let manifest = match self.compatible_manifest(&plugin) {
                Ok(manifest) => manifest,
                Err(message) => {
                    run.result.warn(message.clone());
                    for connection in &connections {
                        run.fail(backend, &connection.name, &message)?;
                    }
                    continue;
                }
            };
            for connection in &connections {
                if run.failed.contains(&connection.name) {
                    continue;
                }
                self.update_connection(backend, connection, declared, &manifest, run)?;
            }
        }

        run.pager.flush(backend)
    }

    /// Promotes forced names, names left mid-flight or failed by an earlier
    /// run, and declared names with no state row at all.
    fn promote(
        &self,
        changes: &mut ConnectionDiff,
        declared: &ConnectionSet,
        force: &[String],
        states: &BTreeMap<String, ConnectionState>,
        result: &mut RefreshResult,
    ) {
        for name in force {
            if !declared.contains(name) {
                result.warn(format!("cannot refresh '{name}': connection is not declared"));
            }
        }
        let forced = changes.promote(declared, force.iter().map(String::as_str));
        if !forced.is_empty() {
            debug!("forced refresh of {}", forced.join(", "));
        }

        let retry: Vec<&str> = declared
            .names()
            .filter(|name| match states.get(*name) {
                Some(state) => state.status.needs_retry(),
                None => true,
            })
            .collect();
        let retried = changes.promote(declared, retry);
        if !retried.is_empty() {
            debug!("retrying {}", retried.join(", "));
        }
    }

    fn compatible_manifest(&self, plugin: &str) -> std::result::Result<PluginManifest, String> {
        let manifest = match self.catalog.manifest(plugin) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => return Err(format!("plugin '{plugin}' is not installed")),
            Err(e) => return Err(format!("could not read plugin '{plugin}': {e}")),
        };
        manifest.check_compatibility()?;
        Ok(manifest)
    }

    fn update_connection<B: SchemaBackend + ?Sized>(
        &self,
        backend: &mut B,
        connection: &ConnectionConfig,
        declared: &ConnectionSet,
        manifest: &PluginManifest,
        run: &mut Run,
    ) -> Result<()> {
        let name = &connection.name;
        if let Err(message) = check_children(connection, declared) {
            run.result.warn(message.clone());
            return run.fail(backend, name, &message);
        }

        if let Err(e) = backend.execute_transaction(&update_schema_sql(connection)) {
            return run.fail(backend, name, &e.to_string());
        }

        let comments = comment_sql(name, manifest);
        let comments_set = if comments.is_empty() {
            true
        } else {
            match backend.execute_transaction(&comments) {
                Ok(()) => true,
                Err(e) => {
                    run.result
                        .warn(format!("failed to set comments for '{name}': {e}"));
                    false
                }
            }
        };

        run.pager
            .upsert(backend, ConnectionState::ready(name, comments_set))?;
        run.result.updated.push(name.clone());
        Ok(())
    }
}

/// Children of an aggregator must be declared and share its plugin.
fn check_children(connection: &ConnectionConfig, declared: &ConnectionSet) -> std::result::Result<(), String> {
    for child in &connection.connections {
        match declared.get(child) {
            None => {
                return Err(format!(
                    "aggregator '{}' refers to undeclared connection '{child}'",
                    connection.name
                ))
            }
            Some(config) if config.plugin != connection.plugin => {
                return Err(format!(
                    "aggregator '{}' uses plugin '{}' but child '{child}' uses '{}'",
                    connection.name, connection.plugin, config.plugin
                ))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// `declared`, with every failed connection reverted to its `previous`
/// config, or left out when it had none.
fn applied_snapshot(previous: &ConnectionSet, declared: &ConnectionSet, failed: &BTreeSet<String>) -> ConnectionSet {
    let mut applied = declared.clone();
    for name in failed {
        match previous.get(name) {
            Some(config) => applied.insert(config.clone()),
            None => {
                applied.remove(name);
            }
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::connections::backend::tests::MemoryBackend;
    use crate::connections::plugins::TableManifest;
    use crate::models::ConnectionStatus;

    #[derive(Default)]
    struct FakeCatalog {
        manifests: BTreeMap<String, PluginManifest>,
        lookups: Mutex<Vec<String>>,
    }

    impl FakeCatalog {
        fn with(plugins: &[(&str, u32)]) -> Self {
            let manifests = plugins
                .iter()
                .map(|(name, protocol)| {
                    (
                        name.to_string(),
                        PluginManifest {
                            name: name.to_string(),
                            version: "1.0.0".to_string(),
                            protocol_version: *protocol,
                            tables: BTreeMap::from([(
                                "items".to_string(),
                                TableManifest {
                                    description: Some("Items".to_string()),
                                    columns: BTreeMap::new(),
                                },
                            )]),
                        },
                    )
                })
                .collect();
            Self {
                manifests,
                lookups: Mutex::new(Vec::new()),
            }
        }
    }

    impl PluginCatalog for FakeCatalog {
        fn manifest(&self, plugin: &str) -> crate::error::Result<Option<PluginManifest>> {
            self.lookups.lock().expect("lock").push(plugin.to_string());
            Ok(self.manifests.get(plugin).cloned())
        }
    }

    fn set(configs: Vec<ConnectionConfig>) -> ConnectionSet {
        ConnectionSet::from_configs(configs).expect("valid set")
    }

    fn reconcile(
        catalog: &FakeCatalog,
        backend: &mut MemoryBackend,
        previous: &ConnectionSet,
        declared: &ConnectionSet,
        force: &[&str],
    ) -> Reconciliation {
        let force: Vec<String> = force.iter().map(|s| s.to_string()).collect();
        Reconciler::new(catalog, 2).reconcile(backend, previous, declared, &force)
    }

    #[test]
    fn test_first_run_imports_everything() {
        let catalog = FakeCatalog::with(&[("aws", 20), ("gcp", 19)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![
            ConnectionConfig::new("aws_a", "aws"),
            ConnectionConfig::new("aws_b", "aws"),
            ConnectionConfig::new("gcp", "gcp"),
        ]);

        let outcome = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        assert!(outcome.result.is_success(), "{}", outcome.result);
        assert_eq!(outcome.result.updated, vec!["aws_a", "aws_b", "gcp"]);
        assert_eq!(outcome.applied, declared);
        for name in ["aws_a", "aws_b", "gcp"] {
            assert_eq!(backend.status_of(name), Some(ConnectionStatus::Ready));
            assert!(backend.schemas.contains(name));
            assert!(backend.states[name].comments_set);
        }
        assert_eq!(outcome.result.to_string(), "3 updated, 0 deleted, 0 failed");
    }

    #[test]
    fn test_noop_run_never_touches_ready_rows() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![ConnectionConfig::new("aws", "aws")]);
        let first = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        let stamp = backend.states["aws"].last_change;
        let writes = backend.upsert_pages.len();

        let second = reconcile(&catalog, &mut backend, &first.applied, &declared, &[]);
        assert_eq!(second.result, RefreshResult::default());
        assert_eq!(backend.upsert_pages.len(), writes);
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Ready));
        assert_eq!(backend.states["aws"].last_change, stamp);
    }

    #[test]
    fn test_changes_deletions_and_plugin_switch() {
        let catalog = FakeCatalog::with(&[("x", 20), ("y", 20), ("z", 20)]);
        let mut backend = MemoryBackend::default();
        let previous = set(vec![
            ConnectionConfig::new("a", "x"),
            ConnectionConfig::new("b", "y"),
            ConnectionConfig::new("s", "x"),
        ]);
        reconcile(&catalog, &mut backend, &ConnectionSet::new(), &previous, &[]);

        let declared = set(vec![
            ConnectionConfig::new("a", "x").with_config(json!({"k": 1})),
            ConnectionConfig::new("c", "z"),
            ConnectionConfig::new("s", "y"),
        ]);
        let outcome = reconcile(&catalog, &mut backend, &previous, &declared, &[]);

        assert_eq!(outcome.result.updated, vec!["a", "s", "c"]);
        assert_eq!(outcome.result.deleted, vec!["b"]);
        assert!(backend.status_of("b").is_none());
        assert!(!backend.schemas.contains("b"));
        // Switching plugin keeps the row and ends ready under the new plugin.
        assert_eq!(backend.status_of("s"), Some(ConnectionStatus::Ready));
        assert!(backend.schemas.contains("s"));
    }

    #[test]
    fn test_missing_and_incompatible_plugins_fail_their_connections() {
        let catalog = FakeCatalog::with(&[("old", 12), ("good", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![
            ConnectionConfig::new("legacy", "old"),
            ConnectionConfig::new("ghost", "absent"),
            ConnectionConfig::new("fine", "good"),
        ]);
        let outcome = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);

        assert_eq!(outcome.result.updated, vec!["fine"]);
        assert_eq!(outcome.result.failed.len(), 2);
        assert_eq!(outcome.result.warnings.len(), 2);
        assert!(outcome.result.error.is_none());
        assert_eq!(backend.status_of("ghost"), Some(ConnectionStatus::Error));
        assert_eq!(backend.status_of("legacy"), Some(ConnectionStatus::Error));
        // New connections that failed are left out of the applied set.
        assert_eq!(outcome.applied.names().collect::<Vec<_>>(), vec!["fine"]);
        assert!(outcome.result.to_string().ends_with("2 failed: ghost, legacy"));
    }

    #[test]
    fn test_failed_update_is_retried_next_run() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let v1 = set(vec![ConnectionConfig::new("aws", "aws")]);
        let first = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &v1, &[]);

        let v2 = set(vec![ConnectionConfig::new("aws", "aws").with_config(json!({"r": 1}))]);
        backend.fail_on = vec!["IMPORT FOREIGN SCHEMA".to_string()];
        let failed = reconcile(&catalog, &mut backend, &first.applied, &v2, &[]);
        assert_eq!(failed.result.failed, vec!["aws"]);
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Error));
        assert_eq!(failed.applied, v1);

        backend.fail_on.clear();
        let retried = reconcile(&catalog, &mut backend, &failed.applied, &v2, &[]);
        assert_eq!(retried.result.updated, vec!["aws"]);
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Ready));
        assert_eq!(retried.applied, v2);
    }

    #[test]
    fn test_interrupted_run_is_resumed() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![ConnectionConfig::new("aws", "aws")]);
        // A crashed run left the row marked while the snapshot was saved.
        backend
            .states
            .insert("aws".to_string(), ConnectionState::updating("aws"));

        let outcome = reconcile(&catalog, &mut backend, &declared, &declared, &[]);
        assert_eq!(outcome.result.updated, vec!["aws"]);
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Ready));
    }

    #[test]
    fn test_force_reimports_unchanged_connection() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![
            ConnectionConfig::new("a", "aws"),
            ConnectionConfig::new("b", "aws"),
        ]);
        let first = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        let outcome = reconcile(&catalog, &mut backend, &first.applied, &declared, &["b", "nope"]);
        assert_eq!(outcome.result.updated, vec!["b"]);
        assert_eq!(outcome.result.warnings.len(), 1);
    }

    #[test]
    fn test_disabled_rows_stay_disabled() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![ConnectionConfig::new("aws", "aws")]);
        let mut disabled = ConnectionState::ready("aws", true);
        disabled.status = ConnectionStatus::Disabled;
        backend.states.insert("aws".to_string(), disabled);

        let outcome = reconcile(&catalog, &mut backend, &declared, &declared, &[]);
        assert!(outcome.result.updated.is_empty());
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Disabled));
    }

    #[test]
    fn test_aggregator_children_must_match() {
        let catalog = FakeCatalog::with(&[("aws", 20), ("gcp", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![
            ConnectionConfig::new("a", "aws"),
            ConnectionConfig::new("g", "gcp"),
            ConnectionConfig::new("all_ok", "aws").with_children(["a"]),
            ConnectionConfig::new("all_mixed", "aws").with_children(["a", "g"]),
            ConnectionConfig::new("all_missing", "aws").with_children(["zzz"]),
        ]);
        let outcome = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        assert_eq!(outcome.result.failed, vec!["all_missing", "all_mixed"]);
        assert_eq!(backend.status_of("all_ok"), Some(ConnectionStatus::Ready));
    }

    #[test]
    fn test_comment_failure_is_a_warning() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend {
            fail_on: vec!["COMMENT ON FOREIGN TABLE".to_string()],
            ..MemoryBackend::default()
        };
        let declared = set(vec![ConnectionConfig::new("aws", "aws")]);
        let outcome = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        assert_eq!(outcome.result.updated, vec!["aws"]);
        assert_eq!(outcome.result.warnings.len(), 1);
        assert_eq!(backend.status_of("aws"), Some(ConnectionStatus::Ready));
        assert!(!backend.states["aws"].comments_set);
    }

    #[test]
    fn test_failed_delete_keeps_connection_applied() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let previous = set(vec![ConnectionConfig::new("gone", "aws")]);
        reconcile(&catalog, &mut backend, &ConnectionSet::new(), &previous, &[]);

        backend.fail_on = vec!["DROP SCHEMA IF EXISTS \"gone\"".to_string()];
        let outcome = reconcile(&catalog, &mut backend, &previous, &ConnectionSet::new(), &[]);
        assert_eq!(outcome.result.failed, vec!["gone"]);
        assert_eq!(backend.status_of("gone"), Some(ConnectionStatus::Error));
        assert!(outcome.applied.contains("gone"));
    }

    #[test]
    fn test_setup_failure_sets_error_and_keeps_previous() {
        let catalog = FakeCatalog::default();
        let mut backend = MemoryBackend {
            fail_setup: true,
            ..MemoryBackend::default()
        };
        let previous = set(vec![ConnectionConfig::new("aws", "aws")]);
        let outcome = reconcile(&catalog, &mut backend, &previous, &ConnectionSet::new(), &[]);
        assert!(outcome.result.error.is_some());
        assert_eq!(outcome.applied, previous);
        assert!(catalog.lookups.lock().expect("lock").is_empty());
    }

    #[test]
    fn test_declared_row_left_deleting_is_reimported() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![ConnectionConfig::new("a", "aws")]);
        // A crashed run dropped the schema but never removed the row.
        backend
            .states
            .insert("a".to_string(), ConnectionState::deleting("a"));

        let outcome = reconcile(&catalog, &mut backend, &declared, &declared, &[]);
        assert_eq!(outcome.result.updated, vec!["a"]);
        assert_eq!(backend.status_of("a"), Some(ConnectionStatus::Ready));
        assert!(backend.schemas.contains("a"));
    }

    #[test]
    fn test_rows_of_undeclared_connections_are_dropped() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let declared = set(vec![ConnectionConfig::new("a", "aws")]);
        // Rows and a schema the (lost) snapshot no longer mentions.
        backend
            .states
            .insert("lost".to_string(), ConnectionState::ready("lost", true));
        backend.schemas.insert("lost".to_string());
        backend
            .states
            .insert("stuck".to_string(), ConnectionState::deleting("stuck"));

        let outcome = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &declared, &[]);
        assert!(outcome.result.is_success(), "{}", outcome.result);
        assert_eq!(outcome.result.updated, vec!["a"]);
        assert_eq!(outcome.result.deleted, vec!["lost", "stuck"]);
        assert!(backend.status_of("lost").is_none());
        assert!(backend.status_of("stuck").is_none());
        assert!(!backend.schemas.contains("lost"));
        assert_eq!(backend.status_of("a"), Some(ConnectionStatus::Ready));
        assert_eq!(backend.delete_pages, vec![2]);
    }

    #[test]
    fn test_new_connections_are_marked_pending() {
        let catalog = FakeCatalog::with(&[("aws", 20)]);
        let mut backend = MemoryBackend::default();
        let v1 = set(vec![ConnectionConfig::new("old", "aws")]);
        let first = reconcile(&catalog, &mut backend, &ConnectionSet::new(), &v1, &[]);
        backend.written.clear();

        let v2 = set(vec![
            ConnectionConfig::new("new", "aws"),
            ConnectionConfig::new("old", "aws").with_config(json!({"r": 1})),
        ]);
        reconcile(&catalog, &mut backend, &first.applied, &v2, &[]);
        assert_eq!(
            &backend.written[..2],
            &[
                ("new".to_string(), ConnectionStatus::Pending),
                ("old".to_string(), ConnectionStatus::Updating),
            ]
        );
        assert_eq!(backend.status_of("new"), Some(ConnectionStatus::Ready));
    }
}
