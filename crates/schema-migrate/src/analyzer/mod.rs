//! Source schema analysis.
//!
//! [`SchemaAnalyzer`] pulls object descriptors out of an adapter and
//! normalizes them. [`ObjectSummary`] is the read-only view returned by the
//! `analyze` operation: counts by kind, the resolved order, and any cycles.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::{DatabaseAdapter, Dialect, ObjectDescriptor, ObjectKind};
use crate::error::{MigrateError, Result};
use crate::resolver::{DependencyResolver, ExternalReference};

/// Enumerates schema objects through a [`DatabaseAdapter`].
pub struct SchemaAnalyzer {
    adapter: Arc<dyn DatabaseAdapter>,
}

impl SchemaAnalyzer {
    pub fn new(adapter: Arc<dyn DatabaseAdapter>) -> Self {
        Self { adapter }
    }

    pub fn dialect(&self) -> Dialect {
        self.adapter.dialect()
    }

    /// Introspect and normalize objects, optionally restricted to `schema`.
    ///
    /// Self-references and duplicate references are dropped, duplicate
    /// objects keep their first occurrence, and the result is sorted by
    /// `(kind, schema, name)` so that later stages see a stable input.
    pub async fn analyze(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>> {
        info!(
            "Introspecting {} ({}){}",
            self.adapter.name(),
            self.adapter.dialect().display_name(),
            schema.map(|s| format!(" schema {}", s)).unwrap_or_default()
        );

        let raw = self.adapter.introspect(schema).await.map_err(|e| match e {
            MigrateError::Adapter(msg) => MigrateError::Introspection(msg),
            other => other,
        })?;

        let mut seen = HashSet::new();
        let mut objects: Vec<ObjectDescriptor> = Vec::with_capacity(raw.len());
        for d in raw {
            if let Some(s) = schema {
                if !d.schema.is_empty() && d.schema != s {
                    debug!("Ignoring {} outside schema {}", d.qualified_name(), s);
                    continue;
                }
            }
            if !seen.insert(d.object_ref()) {
                warn!("Duplicate {} {} reported by adapter, keeping first", d.kind, d.qualified_name());
                continue;
            }
            objects.push(d.normalize());
        }
        objects.sort_by_key(|d| d.object_ref());

        info!("Found {} objects", objects.len());
        Ok(objects)
    }

    /// Analyze and summarize in one step.
    pub async fn summarize(&self, connection: &str, schema: Option<&str>) -> Result<ObjectSummary> {
        let objects = self.analyze(schema).await?;
        Ok(ObjectSummary::build(
            connection,
            self.adapter.dialect(),
            schema.map(str::to_string),
            objects,
        ))
    }
}

/// A dependency cycle found during analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Participants as `kind:schema.name`.
    pub objects: Vec<String>,
    /// Whether a foreign key could be deferred to break it.
    pub broken: bool,
    /// Constraint items split off to break it.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub deferred_constraints: Vec<String>,
}

/// Result of analyzing a source database.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSummary {
    pub connection: String,
    pub dialect: Dialect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub total: usize,
    pub counts: BTreeMap<ObjectKind, usize>,
    /// Resolved execution order as `kind:schema.name`; empty when a cycle
    /// could not be broken.
    pub order: Vec<String>,
    pub cycles: Vec<CycleSummary>,
    pub external_references: Vec<ExternalReference>,
}

impl ObjectSummary {
    pub fn build(
        connection: &str,
        dialect: Dialect,
        schema: Option<String>,
        objects: Vec<ObjectDescriptor>,
    ) -> Self {
        let mut counts = BTreeMap::new();
        for d in &objects {
            *counts.entry(d.kind).or_insert(0) += 1;
        }
        let total = objects.len();

        let (order, cycles, external_references) = match DependencyResolver::new().resolve(objects) {
            Ok(resolution) => {
                let order = resolution
                    .descriptors()
                    .map(|d| d.object_ref().to_string())
                    .collect();
                let cycles = resolution
                    .broken_cycles
                    .iter()
                    .map(|c| CycleSummary {
                        objects: c.objects.iter().map(|o| o.to_string()).collect(),
                        broken: true,
                        deferred_constraints: c.deferred_constraints.iter().map(|r| r.to_string()).collect(),
                    })
                    .collect();
                (order, cycles, resolution.external_references)
            }
            Err(MigrateError::Cycle { objects }) => {
                warn!("Unbreakable dependency cycle: {}", objects.join(" -> "));
                let cycle = CycleSummary {
                    objects,
                    broken: false,
                    deferred_constraints: Vec::new(),
                };
                (Vec::new(), vec![cycle], Vec::new())
            }
            Err(e) => {
                warn!("Dependency resolution failed: {}", e);
                (Vec::new(), Vec::new(), Vec::new())
            }
        };

        Self {
            connection: connection.to_string(),
            dialect,
            schema,
            total,
            counts,
            order,
            cycles,
            external_references,
        }
    }

    pub fn count(&self, kind: ObjectKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn has_unbroken_cycle(&self) -> bool {
        self.cycles.iter().any(|c| !c.broken)
    }
}
