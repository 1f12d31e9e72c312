//! Database seam of the reconciliation engine.

use crate::db::Database;
use crate::error::Result;
use crate::models::ConnectionState;

/// Everything reconciliation needs from the database.
pub trait SchemaBackend {
    /// Creates the internal schema and state table when missing.
    fn ensure_internal_schema(&mut self) -> Result<()>;

    /// Runs `statements` in a single transaction.
    fn execute_transaction(&mut self, statements: &[String]) -> Result<()>;

    fn load_states(&mut self) -> Result<Vec<ConnectionState>>;

    /// Inserts or replaces `states` in one write.
    fn upsert_states(&mut self, states: &[ConnectionState]) -> Result<()>;

    fn delete_states(&mut self, names: &[String]) -> Result<()>;
}

/// [`SchemaBackend`] over a live session.
pub struct PgSchemaBackend {
    db: Database,
}

impl PgSchemaBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl SchemaBackend for PgSchemaBackend {
    fn ensure_internal_schema(&mut self) -> Result<()> {
        self.db.ensure_internal_schema()
    }

    fn execute_transaction(&mut self, statements: &[String]) -> Result<()> {
        self.db.execute_in_transaction(statements)
    }

    fn load_states(&mut self) -> Result<Vec<ConnectionState>> {
        self.db.load_connection_states()
    }

    fn upsert_states(&mut self, states: &[ConnectionState]) -> Result<()> {
        self.db.upsert_connection_states(states)
    }

    fn delete_states(&mut self, names: &[String]) -> Result<()> {
        self.db.delete_connection_states(names)
    }
}

/// Buffers state writes and flushes them in pages of `page_size`.
///
/// A run that dies midway leaves at most one page unwritten; the rows
/// already written keep the run resumable.
#[derive(Debug)]
pub struct StatePager {
    page_size: usize,
    upserts: Vec<ConnectionState>,
    deletes: Vec<String>,
    pages_written: usize,
}

impl StatePager {
    /// A `page_size` of zero is treated as one.
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            upserts: Vec::new(),
            deletes: Vec::new(),
            pages_written: 0,
        }
    }

    pub fn upsert<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B, state: ConnectionState) -> Result<()> {
        self.upserts.push(state);
        if self.upserts.len() >= self.page_size {
            self.flush_upserts(backend)?;
        }
        Ok(())
    }

    pub fn delete<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B, name: String) -> Result<()> {
        self.deletes.push(name);
        if self.deletes.len() >= self.page_size {
            self.flush_deletes(backend)?;
        }
        Ok(())
    }

    /// Writes whatever is buffered, including a partial page.
    pub fn flush<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        self.flush_upserts(backend)?;
        self.flush_deletes(backend)
    }

    /// Number of non-empty pages written so far.
    pub fn pages_written(&self) -> usize {
        self.pages_written
    }

    fn flush_upserts<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        if self.upserts.is_empty() {
            return Ok(());
        }
        let page = std::mem::take(&mut self.upserts);
        log::trace!("writing {} connection state row(s)", page.len());
        backend.upsert_states(&page)?;
        self.pages_written += 1;
        Ok(())
    }

    fn flush_deletes<B: SchemaBackend + ?Sized>(&mut self, backend: &mut B) -> Result<()> {
        if self.deletes.is_empty() {
            return Ok(());
        }
        let page = std::mem::take(&mut self.deletes);
        log::trace!("removing {} connection state row(s)", page.len());
        backend.delete_states(&page)?;
        self.pages_written += 1;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use super::*;
    use crate::error::ConduitError;

    /// In-memory backend recording every write.
    #[derive(Debug, Default)]
    pub(crate) struct MemoryBackend {
        pub(crate) states: BTreeMap<String, ConnectionState>,
        pub(crate) schemas: BTreeSet<String>,
        pub(crate) executed: Vec<Vec<String>>,
        pub(crate) upsert_pages: Vec<usize>,
        /// Every upserted row in write order
        pub(crate) written: Vec<(String, crate::models::ConnectionStatus)>,
        pub(crate) delete_pages: Vec<usize>,
        /// Statements containing any of these fragments fail
        pub(crate) fail_on: Vec<String>,
        pub(crate) fail_setup: bool,
    }

    impl MemoryBackend {
        pub(crate) fn status_of(&self, name: &str) -> Option<crate::models::ConnectionStatus> {
            self.states.get(name).map(|state| state.status)
        }
    }

    impl SchemaBackend for MemoryBackend {
        fn ensure_internal_schema(&mut self) -> Result<()> {
            if self.fail_setup {
                return Err(ConduitError::Configuration {
                    message: "internal schema unavailable".to_string(),
                });
            }
            Ok(())
        }

        fn execute_transaction(&mut self, statements: &[String]) -> Result<()> {
            if let Some(fragment) = self
                .fail_on
                .iter()
                .find(|fragment| statements.iter().any(|s| s.contains(fragment.as_str())))
            {
                return Err(ConduitError::Configuration {
                    message: format!("statement failed near {fragment}"),
                });
            }
            for statement in statements {
                let quoted = statement.split('"').nth(1).map(str::to_string);
                if let Some(schema) = quoted {
                    if statement.starts_with("DROP SCHEMA") {
                        self.schemas.remove(&schema);
                    } else if statement.starts_with("CREATE SCHEMA") {
                        self.schemas.insert(schema);
                    }
                }
            }
            self.executed.push(statements.to_vec());
            Ok(())
        }

        fn load_states(&mut self) -> Result<Vec<ConnectionState>> {
            Ok(self.states.values().cloned().collect())
        }

        fn upsert_states(&mut self, states: &[ConnectionState]) -> Result<()> {
            self.upsert_pages.push(states.len());
            for state in states {
                self.written.push((state.name.clone(), state.status));
                self.states.insert(state.name.clone(), state.clone());
            }
            Ok(())
        }

        fn delete_states(&mut self, names: &[String]) -> Result<()> {
            self.delete_pages.push(names.len());
            for name in names {
                self.states.remove(name);
            }
            Ok(())
        }
    }

    fn write_upserts(count: usize, page_size: usize) -> (MemoryBackend, StatePager) {
        let mut backend = MemoryBackend::default();
        let mut pager = StatePager::new(page_size);
        for i in 0..count {
            pager
                .upsert(&mut backend, ConnectionState::updating(&format!("c{i}")))
                .expect("upsert");
        }
        pager.flush(&mut backend).expect("flush");
        (backend, pager)
    }

    #[test]
    fn test_no_items_writes_no_pages() {
        let (backend, pager) = write_upserts(0, 3);
        assert!(backend.upsert_pages.is_empty());
        assert_eq!(pager.pages_written(), 0);
    }

    #[test]
    fn test_exactly_one_page() {
        let (backend, pager) = write_upserts(3, 3);
        assert_eq!(backend.upsert_pages, vec![3]);
        assert_eq!(pager.pages_written(), 1);
    }

    #[test]
    fn test_one_over_a_page_flushes_remainder() {
        let (backend, pager) = write_upserts(4, 3);
        assert_eq!(backend.upsert_pages, vec![3, 1]);
        assert_eq!(pager.pages_written(), 2);
        assert_eq!(backend.states.len(), 4);
    }

    #[test]
    fn test_deletes_are_paged_separately() {
        let mut backend = MemoryBackend::default();
        let mut pager = StatePager::new(2);
        for name in ["a", "b", "c"] {
            pager.delete(&mut backend, name.to_string()).expect("delete");
        }
        assert_eq!(backend.delete_pages, vec![2]);
        pager.flush(&mut backend).expect("flush");
        assert_eq!(backend.delete_pages, vec![2, 1]);
    }
}
