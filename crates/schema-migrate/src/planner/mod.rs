//! Turns a source schema into a persisted migration task.
//!
//! Planning runs analysis, ordering and conversion, then stores one
//! `pending` item per object. Only a lost connection or an unbreakable cycle
//! fails the task; conversion problems become item notes.

use std::sync::Arc;

use regex::Regex;
use tracing::{error, info, warn};

use crate::analyzer::SchemaAnalyzer;
use crate::convert::{ConversionEngine, Severity};
use crate::core::{DatabaseAdapter, Dialect};
use crate::error::{MigrateError, Result};
use crate::resolver::DependencyResolver;
use crate::state::{ItemStatus, MigrationItem, MigrationTask, TaskStatus, TaskStore};

/// Parameters of a new migration plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanRequest {
    pub source_connection: String,
    pub target_connection: String,
    pub source_schema: Option<String>,
    pub target_schema: Option<String>,
}

impl PlanRequest {
    pub fn new(source_connection: impl Into<String>, target_connection: impl Into<String>) -> Self {
        Self {
            source_connection: source_connection.into(),
            target_connection: target_connection.into(),
            ..Default::default()
        }
    }

    pub fn with_schemas(mut self, source: Option<String>, target: Option<String>) -> Self {
        self.source_schema = source;
        self.target_schema = target;
        self
    }
}

/// Builds migration tasks.
pub struct MigrationPlanner {
    engine: Arc<ConversionEngine>,
    store: Arc<dyn TaskStore>,
    resolver: DependencyResolver,
}

impl MigrationPlanner {
    pub fn new(engine: Arc<ConversionEngine>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            engine,
            store,
            resolver: DependencyResolver::new(),
        }
    }

    /// Plan a migration from `source` into a database speaking `target_dialect`.
    ///
    /// The task is created in `analyzing`, moves to `planning` once its items
    /// are stored, and is marked `failed` (with no items) if analysis or
    /// ordering fails. The error is returned either way.
    pub async fn plan(
        &self,
        request: &PlanRequest,
        source: Arc<dyn DatabaseAdapter>,
        target_dialect: Dialect,
    ) -> Result<MigrationTask> {
        let source_dialect = source.dialect();
        let task = MigrationTask::new(
            &request.source_connection,
            &request.target_connection,
            source_dialect,
            target_dialect,
        )
        .with_schemas(request.source_schema.clone(), request.target_schema.clone());
        let task_id = task.id;
        self.store.create_task(task).await?;

        info!(
            "Planning task {}: {} ({}) -> {} ({})",
            task_id,
            request.source_connection,
            source_dialect.display_name(),
            request.target_connection,
            target_dialect.display_name()
        );

        match self.build_items(task_id, request, source, target_dialect).await {
            Ok(items) => {
                let count = items.len();
                self.store.insert_items(task_id, items).await?;
                let task = self
                    .store
                    .set_task_status(task_id, TaskStatus::Planning, None)
                    .await?;
                info!("Plan ready: {} items", count);
                Ok(task)
            }
            Err(e) => {
                error!("Planning failed for task {}: {}", task_id, e);
                self.store
                    .set_task_status(task_id, TaskStatus::Failed, Some(e.to_string()))
                    .await?;
                Err(e)
            }
        }
    }

    async fn build_items(
        &self,
        task_id: uuid::Uuid,
        request: &PlanRequest,
        source: Arc<dyn DatabaseAdapter>,
        target_dialect: Dialect,
    ) -> Result<Vec<MigrationItem>> {
        let source_dialect = source.dialect();

        info!("Phase 1: Analyzing source schema");
        let objects = SchemaAnalyzer::new(source)
            .analyze(request.source_schema.as_deref())
            .await?;

        info!("Phase 2: Resolving dependencies");
        let resolution = self.resolver.resolve(objects)?;
        for cycle in &resolution.broken_cycles {
            let names: Vec<String> = cycle
                .deferred_constraints
                .iter()
                .map(|c| c.qualified_name())
                .collect();
            warn!("Broke dependency cycle by deferring {}", names.join(", "));
        }

        info!("Phase 3: Converting {} objects", resolution.objects.len());
        let remap = SchemaRemap::new(request.source_schema.as_deref(), request.target_schema.as_deref())?;

        let mut items = Vec::with_capacity(resolution.objects.len());
        let mut low_confidence = 0;
        for (idx, resolved) in resolution.objects.into_iter().enumerate() {
            let descriptor = resolved.descriptor;
            let converted = self.engine.convert(&descriptor, source_dialect, target_dialect);

            let mut notes: Vec<String> = resolved
                .notes
                .into_iter()
                .map(|n| format!("{}: {}", Severity::Info, n))
                .collect();
            notes.extend(converted.notes.iter().map(|n| n.to_string()));

            let mut target_ddl = converted.target_ddl;
            if let Some(remap) = &remap {
                if let Some(rewritten) = remap.apply(&target_ddl) {
                    target_ddl = rewritten;
                    notes.push(format!("{}: {}", Severity::Info, remap.note()));
                }
            }

            if converted.confidence == crate::convert::Confidence::Low {
                low_confidence += 1;
            }

            items.push(MigrationItem {
                task_id,
                execution_order: idx as u32 + 1,
                object_type: descriptor.kind,
                object_name: descriptor.name,
                schema_name: descriptor.schema,
                status: ItemStatus::Pending,
                source_ddl: descriptor.source_definition,
                target_ddl,
                conversion_notes: notes,
                confidence: converted.confidence,
                deferred: resolved.deferred,
                error_message: None,
                retry_count: 0,
                executed_at: None,
            });
        }

        if low_confidence > 0 {
            warn!("{} items converted with low confidence; review before executing", low_confidence);
        }
        Ok(items)
    }
}

/// Rewrites `src.` qualifiers to `tgt.` in converted text.
///
/// Single-quoted literals and comments are copied unchanged.
struct SchemaRemap {
    from: String,
    to: String,
    pattern: Regex,
    protected: Regex,
}

impl SchemaRemap {
    fn new(source: Option<&str>, target: Option<&str>) -> Result<Option<Self>> {
        let (Some(from), Some(to)) = (source, target) else {
            return Ok(None);
        };
        if from == to || from.is_empty() {
            return Ok(None);
        }
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| MigrateError::Rule(format!("schema remap pattern: {}", e)))
        };
        Ok(Some(Self {
            from: from.to_string(),
            to: to.to_string(),
            pattern: compile(&format!(r#"(?i)(^|[^\w$])([`"\[]?){}([`"\]]?)\."#, regex::escape(from)))?,
            protected: compile(r"(?s)'(?:[^']|'')*'|--[^\n]*|/\*.*?\*/")?,
        }))
    }

    fn apply(&self, text: &str) -> Option<String> {
        let replacement = format!("${{1}}${{2}}{}${{3}}.", self.to.replace('$', "$$"));
        let mut out = String::with_capacity(text.len());
        let mut changed = false;
        let mut last = 0;

        let mut rewrite = |code: &str, out: &mut String| {
            if self.pattern.is_match(code) {
                changed = true;
                out.push_str(&self.pattern.replace_all(code, replacement.as_str()));
            } else {
                out.push_str(code);
            }
        };
        for span in self.protected.find_iter(text) {
            rewrite(&text[last..span.start()], &mut out);
            out.push_str(span.as_str());
            last = span.end();
        }
        rewrite(&text[last..], &mut out);

        changed.then_some(out)
    }

    fn note(&self) -> String {
        format!("schema {} remapped to {}", self.from, self.to)
    }
}
