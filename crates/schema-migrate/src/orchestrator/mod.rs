//! Migration orchestrator - entry point for every migration operation.
//!
//! The orchestrator owns the adapter catalog, the conversion engine and the
//! task store, and wires them into the analyzer, planner, executor and
//! comparer on each call. It holds no per-task state of its own.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analyzer::{ObjectSummary, SchemaAnalyzer};
use crate::config::Config;
use crate::convert::{ConversionEngine, Severity};
use crate::core::{AdapterCatalog, DatabaseAdapter, Dialect};
use crate::error::{MigrateError, Result};
use crate::executor::{BatchExecutor, ExecuteOptions, ExecutionSummary, ProgressEvent};
use crate::planner::{MigrationPlanner, PlanRequest};
use crate::report::MigrationReport;
use crate::state::{
    FileTaskStore, InMemoryTaskStore, ItemStatus, MigrationItem, MigrationTask, TaskStatus, TaskStore,
};
use crate::verify::{ComparisonReport, VerificationComparer};

/// A task together with its items in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    pub task: MigrationTask,
    pub items: Vec<MigrationItem>,
}

/// Reachability of one configured connection.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub connection: String,
    pub adapter: String,
    pub dialect: Dialect,
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: AdapterCatalog,
    store: Arc<dyn TaskStore>,
    engine: Arc<ConversionEngine>,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl Orchestrator {
    /// Create an orchestrator from configuration.
    ///
    /// Adapters are built for every configured connection. Tasks go to the
    /// ledger at `state.path` when set, otherwise they stay in memory.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let catalog = AdapterCatalog::from_config(&config)?;
        let store: Arc<dyn TaskStore> = match &config.state.path {
            Some(path) => Arc::new(FileTaskStore::open(path)?),
            None => Arc::new(InMemoryTaskStore::new()),
        };
        Self::with_catalog(config, catalog, store)
    }

    /// Create an orchestrator over an explicit catalog and store.
    pub fn with_catalog(config: Config, catalog: AdapterCatalog, store: Arc<dyn TaskStore>) -> Result<Self> {
        let engine = ConversionEngine::with_builtins()
            .and_then(|mut engine| {
                for set in &config.rules {
                    engine.register_rule_set(set)?;
                }
                Ok(engine)
            })?;
        debug!(
            "Orchestrator ready: config {}, {} store, {:?}",
            &config.hash()[..12],
            store.store_type(),
            catalog
        );
        Ok(Self {
            config,
            catalog,
            store,
            engine: Arc::new(engine),
            progress_tx: None,
        })
    }

    /// Replace the task store with the ledger at `path`.
    pub fn with_state_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.store = Arc::new(FileTaskStore::open(path)?);
        Ok(self)
    }

    /// Set progress channel for execution events.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn catalog(&self) -> &AdapterCatalog {
        &self.catalog
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Default execution policy from the `migration` section.
    pub fn default_options(&self) -> ExecuteOptions {
        ExecuteOptions::from(&self.config.migration)
    }

    /// Count, order and cycle-check the objects of a source database.
    pub async fn analyze_source_database(&self, connection_id: &str, schema: Option<&str>) -> Result<ObjectSummary> {
        let adapter = self.catalog.require(connection_id)?;
        let schema = schema.or(self.config.connection(connection_id)?.schema.as_deref());
        SchemaAnalyzer::new(adapter).summarize(connection_id, schema).await
    }

    /// Analyze, order and convert the source, and store the resulting task.
    ///
    /// Schemas default to the `schema` of each connection when not given.
    pub async fn create_migration_plan(&self, request: &PlanRequest) -> Result<MigrationTask> {
        let source = self.catalog.require(&request.source_connection)?;
        let target = self.catalog.require(&request.target_connection)?;

        let mut request = request.clone();
        if request.source_schema.is_none() {
            request.source_schema = self.config.connection(&request.source_connection)?.schema.clone();
        }
        if request.target_schema.is_none() {
            request.target_schema = self.config.connection(&request.target_connection)?.schema.clone();
        }

        MigrationPlanner::new(self.engine.clone(), self.store.clone())
            .plan(&request, source, target.dialect())
            .await
    }

    fn executor(&self, task: &MigrationTask) -> Result<BatchExecutor> {
        let target = self.catalog.require(&task.target_connection)?;
        let executor = BatchExecutor::new(self.store.clone(), target);
        Ok(match &self.progress_tx {
            Some(tx) => executor.with_progress(tx.clone()),
            None => executor,
        })
    }

    /// Apply every outstanding item of a task to its target.
    pub async fn execute_migration_batch(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let task = self.store.get_task(task_id).await?;
        self.executor(&task)?.execute(task_id, options, cancel).await
    }

    /// Re-run only the failed items of a task.
    pub async fn retry_failed_items(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let task = self.store.get_task(task_id).await?;
        if task.failed_items == 0 {
            info!("Task {} has no failed items to retry", task_id);
        }
        self.executor(&task)?.retry_failed(task_id, options, cancel).await
    }

    /// Structural comparison of source and target for a task's objects.
    pub async fn compare_databases(&self, task_id: Uuid) -> Result<ComparisonReport> {
        let task = self.store.get_task(task_id).await?;
        let source = self.catalog.require(&task.source_connection)?;
        let target = self.catalog.require(&task.target_connection)?;
        VerificationComparer::new(self.store.clone(), source, target)
            .compare(task_id)
            .await
    }

    /// Build a report for a task, optionally with a fresh comparison.
    ///
    /// A comparison that fails (e.g. the target is unreachable) is logged and
    /// left out rather than failing the report.
    pub async fn generate_migration_report(&self, task_id: Uuid, with_comparison: bool) -> Result<MigrationReport> {
        let task = self.store.get_task(task_id).await?;
        let items = self.store.get_items(task_id).await?;
        let comparison = if with_comparison {
            match self.compare_databases(task_id).await {
                Ok(report) => Some(report),
                Err(e) => {
                    warn!("Comparison for report skipped: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Ok(MigrationReport::build(task, &items, comparison))
    }

    pub async fn get_migration_status(&self, task_id: Uuid) -> Result<MigrationTask> {
        self.store.get_task(task_id).await
    }

    pub async fn get_migration_plan(&self, task_id: Uuid) -> Result<MigrationPlan> {
        let task = self.store.get_task(task_id).await?;
        let items = self.store.get_items(task_id).await?;
        Ok(MigrationPlan { task, items })
    }

    pub async fn list_tasks(&self) -> Result<Vec<MigrationTask>> {
        self.store.list_tasks().await
    }

    /// Delete a task and its items. Rejected while the task is executing.
    pub async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.store.delete_task(task_id).await?;
        info!("Deleted task {}", task_id);
        Ok(())
    }

    /// Resolve a full task id or a unique prefix of one.
    pub async fn resolve_task_id(&self, id: &str) -> Result<Uuid> {
        if let Ok(uuid) = Uuid::parse_str(id) {
            return Ok(uuid);
        }
        let needle = id.to_lowercase();
        let matches: Vec<Uuid> = self
            .store
            .list_tasks()
            .await?
            .into_iter()
            .map(|t| t.id)
            .filter(|u| !needle.is_empty() && u.to_string().starts_with(&needle))
            .collect();
        match matches.as_slice() {
            [one] => Ok(*one),
            [] => Err(MigrateError::TaskNotFound(id.to_string())),
            _ => Err(MigrateError::State(format!(
                "Task id prefix '{}' is ambiguous ({} matches)",
                id,
                matches.len()
            ))),
        }
    }

    async fn ensure_idle(&self, task_id: Uuid) -> Result<MigrationTask> {
        let task = self.store.get_task(task_id).await?;
        if task.status == TaskStatus::Executing {
            return Err(MigrateError::TaskBusy(task_id.to_string()));
        }
        Ok(task)
    }

    /// Mark a failed item as skipped.
    pub async fn skip_item(&self, task_id: Uuid, execution_order: u32, reason: Option<&str>) -> Result<MigrationItem> {
        self.ensure_idle(task_id).await?;
        let mut item = self.store.get_item(task_id, execution_order).await?;
        item.transition(ItemStatus::Skipped)?;
        item.conversion_notes.push(format!(
            "{}: skipped manually{}",
            Severity::Info,
            reason.map(|r| format!(": {}", r)).unwrap_or_default()
        ));
        let task = self.store.update_item(item.clone()).await?;
        self.settle(&task).await?;
        info!("Skipped item #{} ({}) of task {}", execution_order, item.qualified_name(), task_id);
        Ok(item)
    }

    /// Replace the target definition of a pending or failed item.
    pub async fn update_item_ddl(&self, task_id: Uuid, execution_order: u32, ddl: &str) -> Result<MigrationItem> {
        self.ensure_idle(task_id).await?;
        let mut item = self.store.get_item(task_id, execution_order).await?;
        if !matches!(item.status, ItemStatus::Pending | ItemStatus::Failed) {
            return Err(MigrateError::State(format!(
                "Item #{} is {}; only pending or failed items can be edited",
                execution_order, item.status
            )));
        }
        item.target_ddl = ddl.trim().to_string();
        item.conversion_notes
            .push(format!("{}: target definition edited manually", Severity::Info));
        self.store.update_item(item.clone()).await?;
        info!("Updated target DDL of item #{} ({})", execution_order, item.qualified_name());
        Ok(item)
    }

    /// A failed task whose last failures were skipped is now complete.
    async fn settle(&self, task: &MigrationTask) -> Result<()> {
        if task.status == TaskStatus::Failed
            && task.error_message.is_none()
            && task.pending_items == 0
            && task.failed_items == 0
            && task.executing_items == 0
        {
            self.store
                .set_task_status(task.id, TaskStatus::Completed, None)
                .await?;
        }
        Ok(())
    }

    /// Ping every configured connection.
    pub async fn health_check(&self) -> Vec<HealthStatus> {
        let checks = self
            .catalog
            .ids()
            .into_iter()
            .filter_map(|id| self.catalog.get(id).map(|adapter| Self::ping(id, adapter)));
        join_all(checks).await
    }

    async fn ping(id: &str, adapter: Arc<dyn DatabaseAdapter>) -> HealthStatus {
        let start = Instant::now();
        let outcome = adapter.ping().await;
        HealthStatus {
            connection: id.to_string(),
            adapter: adapter.name().to_string(),
            dialect: adapter.dialect(),
            healthy: outcome.is_ok(),
            latency_ms: start.elapsed().as_millis() as u64,
            error: outcome.err().map(|e| e.to_string()),
        }
    }

    /// Close all adapter pools.
    pub async fn close(&self) {
        self.catalog.close_all().await;
    }
}
