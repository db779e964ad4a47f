//! Structural comparison of source and target after a migration.
//!
//! The comparer re-introspects both sides, scoped to the objects in one task,
//! and matches them by `(kind, schema, name)`. Identifiers are compared
//! case-insensitively since engines fold unquoted names differently. Nothing
//! here writes to the task store.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::analyzer::SchemaAnalyzer;
use crate::core::{DatabaseAdapter, ObjectKind, ObjectRef};
use crate::error::Result;
use crate::state::{ItemStatus, MigrationItem, MigrationTask, TaskStore};

/// One task object and where it was (or was not) found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    /// Identity in the source.
    pub source: ObjectRef,
    /// Expected identity in the target.
    pub target: ObjectRef,
    pub item_status: ItemStatus,
    pub execution_order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Output of [`VerificationComparer::compare`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub task_id: Uuid,
    pub matched: Vec<ComparisonEntry>,
    pub missing_in_target: Vec<ComparisonEntry>,
    /// Present under the same name with a different kind.
    pub altered_in_target: Vec<ComparisonEntry>,
    /// Target objects in scope that no task item accounts for.
    pub extra_in_target: Vec<ObjectRef>,
    pub notes: Vec<String>,
}

impl ComparisonReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_in_target.is_empty() && self.altered_in_target.is_empty()
    }

    pub fn discrepancies(&self) -> usize {
        self.missing_in_target.len() + self.altered_in_target.len() + self.extra_in_target.len()
    }
}

/// Case-folded `(schema, name)` lookup key.
type NameKey = (String, String);

fn name_key(schema: &str, name: &str) -> NameKey {
    (schema.to_lowercase(), name.to_lowercase())
}

/// Diagnoses how far the target matches the source for one task.
pub struct VerificationComparer {
    store: Arc<dyn TaskStore>,
    source: Arc<dyn DatabaseAdapter>,
    target: Arc<dyn DatabaseAdapter>,
}

impl VerificationComparer {
    pub fn new(
        store: Arc<dyn TaskStore>,
        source: Arc<dyn DatabaseAdapter>,
        target: Arc<dyn DatabaseAdapter>,
    ) -> Self {
        Self { store, source, target }
    }

    pub async fn compare(&self, task_id: Uuid) -> Result<ComparisonReport> {
        let task = self.store.get_task(task_id).await?;
        let items = self.store.get_items(task_id).await?;
        info!("Comparing {} objects of task {}", items.len(), task_id);

        let source_objects = SchemaAnalyzer::new(self.source.clone())
            .analyze(task.source_schema.as_deref())
            .await?;
        let target_scope = task.target_schema.as_deref().or(task.source_schema.as_deref());
        let target_objects = SchemaAnalyzer::new(self.target.clone())
            .analyze(target_scope)
            .await?;

        let source_names: HashSet<(ObjectKind, NameKey)> = source_objects
            .iter()
            .map(|d| (d.kind, name_key(&d.schema, &d.name)))
            .collect();
        let mut target_by_name: HashMap<NameKey, Vec<ObjectRef>> = HashMap::new();
        for d in &target_objects {
            target_by_name
                .entry(name_key(&d.schema, &d.name))
                .or_default()
                .push(d.object_ref());
        }

        let mut report = ComparisonReport {
            task_id,
            ..Default::default()
        };
        let mut accounted: HashSet<ObjectRef> = HashSet::new();

        for item in &items {
            let source = ObjectRef::new(item.object_type, item.schema_name.clone(), item.object_name.clone());
            let expected = expected_target(&task, item);

            if item.deferred {
                report.notes.push(format!(
                    "deferred constraint {} is not compared structurally",
                    item.qualified_name()
                ));
                continue;
            }
            if !source_names.contains(&(source.kind, name_key(&source.schema, &source.name))) {
                report
                    .notes
                    .push(format!("{} {} is no longer present in the source", source.kind, source.qualified_name()));
            }

            let mut entry = ComparisonEntry {
                source,
                target: expected.clone(),
                item_status: item.status,
                execution_order: item.execution_order,
                detail: None,
            };

            let candidates = target_by_name
                .get(&name_key(&expected.schema, &expected.name))
                .map(Vec::as_slice)
                .unwrap_or_default();

            if let Some(found) = candidates.iter().find(|r| r.kind == expected.kind) {
                accounted.insert(found.clone());
                report.matched.push(entry);
            } else if let Some(other) = candidates.first() {
                accounted.extend(candidates.iter().cloned());
                entry.detail = Some(format!("found as {} instead of {}", other.kind, expected.kind));
                report.altered_in_target.push(entry);
            } else {
                entry.detail = match item.status {
                    ItemStatus::Completed => Some("applied but not found in target".to_string()),
                    ItemStatus::Failed => item.error_message.clone(),
                    ItemStatus::Skipped => Some("skipped".to_string()),
                    ItemStatus::Pending | ItemStatus::Executing => Some("not yet executed".to_string()),
                };
                report.missing_in_target.push(entry);
            }
        }

        let mut extra: Vec<ObjectRef> = target_objects
            .iter()
            .map(|d| d.object_ref())
            .filter(|r| !accounted.contains(r))
            .collect();
        extra.sort();
        report.extra_in_target = extra;

        let by_kind = count_by_kind(&report.missing_in_target);
        if !by_kind.is_empty() {
            debug!("Missing in target by kind: {:?}", by_kind);
        }
        info!(
            "Comparison: {} matched, {} missing, {} altered, {} extra",
            report.matched.len(),
            report.missing_in_target.len(),
            report.altered_in_target.len(),
            report.extra_in_target.len()
        );
        Ok(report)
    }
}

/// Where an item's object should live in the target.
fn expected_target(task: &MigrationTask, item: &MigrationItem) -> ObjectRef {
    let schema = match (&task.source_schema, &task.target_schema) {
        (Some(src), Some(tgt)) if item.schema_name.eq_ignore_ascii_case(src) => tgt.clone(),
        (None, Some(tgt)) => tgt.clone(),
        _ => item.schema_name.clone(),
    };
    ObjectRef::new(item.object_type, schema, item.object_name.clone())
}

fn count_by_kind(entries: &[ComparisonEntry]) -> BTreeMap<ObjectKind, usize> {
    let mut counts = BTreeMap::new();
    for e in entries {
        *counts.entry(e.source.kind).or_insert(0) += 1;
    }
    counts
}
