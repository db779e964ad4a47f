//! Core trait implemented by every database engine adapter.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::{Dialect, ObjectDescriptor};

/// Result of applying one DDL statement.
///
/// A rejected statement is a value, not an error: the executor records it on
/// the item and moves on. `Err` from [`DatabaseAdapter::execute_ddl`] is
/// reserved for losing the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DdlOutcome {
    /// Statement applied.
    Applied,
    /// Statement rejected by the database (syntax, constraint, permission).
    Failed(String),
}

impl DdlOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, DdlOutcome::Applied)
    }
}

/// Introspection and DDL execution against one database.
///
/// Implementations own their connection pool; `close` releases it.
#[async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Dialect spoken by this database.
    fn dialect(&self) -> Dialect;

    /// Adapter name for logs (e.g. "postgres", "snapshot").
    fn name(&self) -> &str;

    /// Enumerate schema objects, optionally restricted to one schema.
    ///
    /// Descriptors carry their declared references; the caller is responsible
    /// for ordering.
    async fn introspect(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>>;

    /// Apply one DDL statement.
    async fn execute_ddl(&self, ddl: &str) -> Result<DdlOutcome>;

    /// Check that the database is reachable.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Close the connection pool.
    async fn close(&self);
}
