//! Adapter catalog for explicit dependency injection.
//!
//! The [`AdapterCatalog`] maps connection ids to [`DatabaseAdapter`]s. It is
//! built from configuration (or by hand in tests) and passed to the
//! orchestrator; nothing in the engine looks adapters up globally.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapters::SnapshotAdapter;
use crate::config::{AdapterType, Config, ConnectionConfig};
use crate::error::{MigrateError, Result};

use super::traits::DatabaseAdapter;

/// Registry of database adapters keyed by connection id.
///
/// # Example
///
/// ```rust,ignore
/// let mut catalog = AdapterCatalog::new();
/// catalog.register("legacy", Arc::new(SnapshotAdapter::from_config("legacy", &conn)?));
/// let orchestrator = Orchestrator::with_catalog(config, catalog, store)?;
/// ```
#[derive(Default)]
pub struct AdapterCatalog {
    adapters: BTreeMap<String, Arc<dyn DatabaseAdapter>>,
}

impl AdapterCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with one adapter per configured connection.
    ///
    /// Pools are created lazily, so an unreachable database is reported when
    /// it is first used, not here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut catalog = Self::new();
        for (id, conn) in &config.connections {
            let adapter = Self::create_adapter(id, conn)?;
            catalog.register(id.clone(), adapter);
        }
        Ok(catalog)
    }

    /// Create the adapter for one connection.
    pub fn create_adapter(id: &str, conn: &ConnectionConfig) -> Result<Arc<dyn DatabaseAdapter>> {
        match conn.r#type {
            AdapterType::Snapshot => Ok(Arc::new(SnapshotAdapter::from_config(id, conn)?)),
            #[cfg(feature = "postgres")]
            AdapterType::Postgres => Ok(Arc::new(crate::adapters::PostgresAdapter::new(id, conn)?)),
            #[cfg(feature = "mysql")]
            AdapterType::Mysql => Ok(Arc::new(crate::adapters::MysqlAdapter::new(id, conn)?)),
            #[allow(unreachable_patterns)]
            other => Err(MigrateError::Config(format!(
                "Connection '{}' uses type '{}', which is not compiled in",
                id, other
            ))),
        }
    }

    /// Register an adapter under a connection id.
    pub fn register(&mut self, id: impl Into<String>, adapter: Arc<dyn DatabaseAdapter>) {
        self.adapters.insert(id.into(), adapter);
    }

    /// Get an adapter by connection id.
    pub fn get(&self, id: &str) -> Option<Arc<dyn DatabaseAdapter>> {
        self.adapters.get(id).cloned()
    }

    /// Get an adapter by connection id, returning an error if not found.
    pub fn require(&self, id: &str) -> Result<Arc<dyn DatabaseAdapter>> {
        self.get(id)
            .ok_or_else(|| MigrateError::Config(format!("Unknown connection id: '{}'", id)))
    }

    /// Check if a connection id is registered.
    pub fn has(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Registered connection ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    /// Close every adapter.
    pub async fn close_all(&self) {
        for adapter in self.adapters.values() {
            adapter.close().await;
        }
    }
}

impl std::fmt::Debug for AdapterCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .adapters
            .iter()
            .map(|(id, a)| format!("{} ({}, {})", id, a.name(), a.dialect()))
            .collect();
        f.debug_struct("AdapterCatalog")
            .field("adapters", &entries)
            .finish()
    }
}
