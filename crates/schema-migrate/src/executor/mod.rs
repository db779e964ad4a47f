//! Sequential execution of a planned migration task.
//!
//! Items run strictly in `execution_order`. Each status change is written to
//! the task store (which recounts the task) and then published as a
//! [`ProgressEvent`]. A rejected statement fails only its item; losing the
//! target connection fails the whole task and leaves the rest `pending`.
//! Cancellation is observed between items, never in the middle of one.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MigrationConfig;
use crate::core::{DatabaseAdapter, DdlOutcome, ObjectKind};
use crate::error::Result;
use crate::state::{ItemStatus, MigrationItem, MigrationTask, TaskStatus, TaskStore};

/// Retry and failure policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOptions {
    /// Retry a rejected statement immediately.
    pub auto_retry: bool,
    /// Upper bound on `retry_count` for automatic retries.
    pub max_retries: u32,
    /// Halt the queue at the first failed item.
    pub stop_on_failure: bool,
    /// Mark items that are still failed after retries as `skipped`.
    pub skip_failed: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            auto_retry: false,
            max_retries: 3,
            stop_on_failure: false,
            skip_failed: false,
        }
    }
}

impl From<&MigrationConfig> for ExecuteOptions {
    fn from(config: &MigrationConfig) -> Self {
        Self {
            auto_retry: config.auto_retry,
            max_retries: config.max_retries,
            stop_on_failure: config.stop_on_failure,
            skip_failed: config.skip_failed,
        }
    }
}

/// Which items a run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunScope {
    /// Pending items and items left failed by an earlier run.
    Outstanding,
    /// Failed items only.
    FailedOnly,
}

impl RunScope {
    fn includes(&self, status: ItemStatus) -> bool {
        match self {
            RunScope::Outstanding => matches!(status, ItemStatus::Pending | ItemStatus::Failed),
            RunScope::FailedOnly => status == ItemStatus::Failed,
        }
    }
}

/// One item status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemEvent {
    pub task_id: Uuid,
    pub execution_order: u32,
    pub object_type: ObjectKind,
    pub object_name: String,
    pub schema_name: String,
    pub status: ItemStatus,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<&MigrationItem> for ItemEvent {
    fn from(item: &MigrationItem) -> Self {
        Self {
            task_id: item.task_id,
            execution_order: item.execution_order,
            object_type: item.object_type,
            object_name: item.object_name.clone(),
            schema_name: item.schema_name.clone(),
            status: item.status,
            retry_count: item.retry_count,
            error_message: item.error_message.clone(),
        }
    }
}

/// Terminal result of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub task_id: Uuid,
    pub status: TaskStatus,
    /// Operator-facing status, e.g. "completed with errors, 1 item failed".
    pub outcome: String,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub pending: u32,
    /// Items this run picked up.
    pub attempted: u32,
    pub cancelled: bool,
    pub halted: bool,
    pub duration_ms: u64,
}

impl ExecutionSummary {
    fn from_task(task: &MigrationTask, attempted: u32, cancelled: bool, halted: bool, duration_ms: u64) -> Self {
        Self {
            task_id: task.id,
            status: task.status,
            outcome: task.outcome_label(),
            total: task.total_items,
            completed: task.completed_items,
            failed: task.failed_items,
            skipped: task.skipped_items,
            pending: task.pending_items,
            attempted,
            cancelled,
            halted,
            duration_ms,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Progress stream element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Item(ItemEvent),
    Finished(ExecutionSummary),
}

#[derive(Default)]
struct RunTally {
    attempted: u32,
    cancelled: bool,
    halted: bool,
}

/// Applies a task's converted definitions to the target.
pub struct BatchExecutor {
    store: Arc<dyn TaskStore>,
    target: Arc<dyn DatabaseAdapter>,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl BatchExecutor {
    pub fn new(store: Arc<dyn TaskStore>, target: Arc<dyn DatabaseAdapter>) -> Self {
        Self {
            store,
            target,
            progress_tx: None,
        }
    }

    /// Set progress channel for updates.
    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    async fn send_progress(&self, event: ProgressEvent) {
        if let Some(tx) = &self.progress_tx {
            let _ = tx.send(event).await;
        }
    }

    /// Run every pending item, plus items a previous run left failed.
    pub async fn execute(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        self.run(task_id, options, RunScope::Outstanding, cancel).await
    }

    /// Re-run failed items only. Completed and skipped items are never touched.
    pub async fn retry_failed(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        self.run(task_id, options, RunScope::FailedOnly, cancel).await
    }

    pub async fn run(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        scope: RunScope,
        cancel: CancellationToken,
    ) -> Result<ExecutionSummary> {
        let start = std::time::Instant::now();
        let task = self.store.begin_execution(task_id).await?;
        info!(
            "Executing task {} against {} ({} items, {} pending, {} failed)",
            task_id,
            task.target_connection,
            task.total_items,
            task.pending_items,
            task.failed_items
        );

        let tally = match self.run_items(task_id, options, scope, &cancel).await {
            Ok(tally) => tally,
            Err(e) => {
                error!("Execution of task {} aborted: {}", task_id, e);
                self.store
                    .set_task_status(task_id, TaskStatus::Failed, Some(e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        let task = self.store.get_task(task_id).await?;
        let status = if task.pending_items == 0 && task.failed_items == 0 && task.executing_items == 0 {
            TaskStatus::Completed
        } else if task.failed_items > 0 || task.executing_items > 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::Planning
        };
        let task = self.store.set_task_status(task_id, status, None).await?;

        let summary = ExecutionSummary::from_task(
            &task,
            tally.attempted,
            tally.cancelled,
            tally.halted,
            start.elapsed().as_millis() as u64,
        );
        match task.status {
            TaskStatus::Completed => info!(
                "Task {} completed: {} completed, {} skipped",
                task_id, summary.completed, summary.skipped
            ),
            _ => warn!(
                "Task {} {}: {} completed, {} failed, {} skipped, {} pending",
                task_id, summary.outcome, summary.completed, summary.failed, summary.skipped, summary.pending
            ),
        }

        self.send_progress(ProgressEvent::Finished(summary.clone()))
            .await;
        Ok(summary)
    }

    async fn run_items(
        &self,
        task_id: Uuid,
        options: &ExecuteOptions,
        scope: RunScope,
        cancel: &CancellationToken,
    ) -> Result<RunTally> {
        let queue: Vec<u32> = self
            .store
            .get_items(task_id)
            .await?
            .into_iter()
            .filter(|i| scope.includes(i.status))
            .map(|i| i.execution_order)
            .collect();

        let mut tally = RunTally::default();
        for order in queue {
            if cancel.is_cancelled() {
                info!("Cancellation requested, stopping before item #{}", order);
                tally.cancelled = true;
                break;
            }

            let item = self.store.get_item(task_id, order).await?;
            tally.attempted += 1;
            let item = self.execute_item(item, options, cancel).await?;

            if item.status == ItemStatus::Failed {
                if options.skip_failed {
                    let mut skipped = item;
                    skipped.transition(ItemStatus::Skipped)?;
                    self.save(&skipped).await?;
                }
                if options.stop_on_failure {
                    warn!("Stopping after failed item #{} (stop_on_failure)", order);
                    tally.halted = true;
                    break;
                }
            }
        }
        Ok(tally)
    }

    /// Attempt one item, retrying in place when policy allows.
    async fn execute_item(
        &self,
        mut item: MigrationItem,
        options: &ExecuteOptions,
        cancel: &CancellationToken,
    ) -> Result<MigrationItem> {
        loop {
            item.transition(ItemStatus::Executing)?;
            item.error_message = None;
            self.save(&item).await?;
            debug!(
                "#{} {} {} (attempt {})",
                item.execution_order,
                item.object_type,
                item.qualified_name(),
                item.retry_count + 1
            );

            let outcome = if item.target_ddl.trim().is_empty() {
                DdlOutcome::Failed("no target definition to execute".to_string())
            } else {
                match self.target.execute_ddl(&item.target_ddl).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        item.transition(ItemStatus::Failed)?;
                        item.error_message = Some(e.to_string());
                        self.save(&item).await?;
                        return Err(e);
                    }
                }
            };

            match outcome {
                DdlOutcome::Applied => {
                    item.transition(ItemStatus::Completed)?;
                    item.executed_at = Some(Utc::now());
                    self.save(&item).await?;
                    return Ok(item);
                }
                DdlOutcome::Failed(message) => {
                    item.transition(ItemStatus::Failed)?;
                    item.retry_count += 1;
                    item.error_message = Some(message);
                    self.save(&item).await?;

                    let retry = options.auto_retry
                        && item.retry_count < options.max_retries
                        && !cancel.is_cancelled();
                    warn!(
                        "#{} {} failed (attempt {}){}: {}",
                        item.execution_order,
                        item.qualified_name(),
                        item.retry_count,
                        if retry { ", retrying" } else { "" },
                        item.error_message.as_deref().unwrap_or_default()
                    );
                    if !retry {
                        return Ok(item);
                    }
                }
            }
        }
    }

    /// Persist an item transition and publish it.
    async fn save(&self, item: &MigrationItem) -> Result<MigrationTask> {
        let task = self.store.update_item(item.clone()).await?;
        self.send_progress(ProgressEvent::Item(ItemEvent::from(item)))
            .await;
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::Confidence;
    use crate::core::Dialect;
    use crate::error::MigrateError;
    use crate::state::InMemoryTaskStore;
    use crate::testing::MockAdapter;

    async fn planned_task(store: &Arc<dyn TaskStore>, n: u32) -> Uuid {
        let task = MigrationTask::new("src", "tgt", Dialect::Mysql, Dialect::Postgres);
        let id = task.id;
        store.create_task(task).await.unwrap();
        let items = (1..=n)
            .map(|i| MigrationItem {
                task_id: id,
                execution_order: i,
                object_type: ObjectKind::Table,
                object_name: format!("t{:02}", i),
                schema_name: "app".into(),
                status: ItemStatus::Pending,
                source_ddl: format!("CREATE TABLE app.t{:02} (id INT)", i),
                target_ddl: format!("CREATE TABLE app.t{:02} (id INTEGER)", i),
                conversion_notes: Vec::new(),
                confidence: Confidence::High,
                deferred: false,
                error_message: None,
                retry_count: 0,
                executed_at: None,
            })
            .collect();
        store.insert_items(id, items).await.unwrap();
        store
            .set_task_status(id, TaskStatus::Planning, None)
            .await
            .unwrap();
        id
    }

    fn store() -> Arc<dyn TaskStore> {
        Arc::new(InMemoryTaskStore::quiet())
    }

    #[tokio::test]
    async fn test_all_items_complete() {
        let store = store();
        let id = planned_task(&store, 3).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres));

        let summary = BatchExecutor::new(store.clone(), target.clone())
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.outcome, "completed");
        assert_eq!(target.attempts().len(), 3);
        let items = store.get_items(id).await.unwrap();
        assert!(items.iter().all(|i| i.executed_at.is_some()));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let store = store();
        let id = planned_task(&store, 10).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on(
            "app.t04",
            u32::MAX,
            "violates check constraint",
        ));

        let summary = BatchExecutor::new(store.clone(), target.clone())
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.completed, 9);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pending, 0);
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.outcome, "completed with errors, 1 item failed");

        let item4 = store.get_item(id, 4).await.unwrap();
        assert_eq!(item4.status, ItemStatus::Failed);
        assert_eq!(item4.retry_count, 1);
        assert_eq!(item4.error_message.as_deref(), Some("violates check constraint"));
        assert_eq!(target.attempts().len(), 10);
    }

    #[tokio::test]
    async fn test_stop_on_failure_leaves_rest_pending() {
        let store = store();
        let id = planned_task(&store, 10).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t04", u32::MAX, "boom"));
        let options = ExecuteOptions {
            stop_on_failure: true,
            ..Default::default()
        };

        let summary = BatchExecutor::new(store.clone(), target)
            .execute(id, &options, CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.halted);
        assert_eq!((summary.completed, summary.failed, summary.pending), (3, 1, 6));
        assert_eq!(summary.status, TaskStatus::Failed);
        assert_eq!(summary.outcome, "failed");
    }

    #[tokio::test]
    async fn test_auto_retry_is_bounded() {
        let store = store();
        let id = planned_task(&store, 2).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t01", u32::MAX, "lock timeout"));
        let options = ExecuteOptions {
            auto_retry: true,
            max_retries: 3,
            ..Default::default()
        };

        BatchExecutor::new(store.clone(), target.clone())
            .execute(id, &options, CancellationToken::new())
            .await
            .unwrap();

        let item = store.get_item(id, 1).await.unwrap();
        assert_eq!(item.retry_count, 3);
        assert_eq!(item.status, ItemStatus::Failed);
        let t01_attempts = target.attempts().iter().filter(|d| d.contains("t01")).count();
        assert_eq!(t01_attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_failure_recovers_with_retry() {
        let store = store();
        let id = planned_task(&store, 1).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t01", 1, "deadlock"));
        let options = ExecuteOptions {
            auto_retry: true,
            ..Default::default()
        };

        let summary = BatchExecutor::new(store.clone(), target)
            .execute(id, &options, CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.is_success());
        let item = store.get_item(id, 1).await.unwrap();
        assert_eq!(item.retry_count, 1);
        assert!(item.error_message.is_none());
    }

    #[tokio::test]
    async fn test_skip_failed_marks_skipped() {
        let store = store();
        let id = planned_task(&store, 3).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t02", u32::MAX, "denied"));
        let options = ExecuteOptions {
            skip_failed: true,
            ..Default::default()
        };

        let summary = BatchExecutor::new(store.clone(), target)
            .execute(id, &options, CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!((summary.completed, summary.skipped), (2, 1));
        let item = store.get_item(id, 2).await.unwrap();
        assert_eq!(item.status, ItemStatus::Skipped);
        assert_eq!(item.error_message.as_deref(), Some("denied"));
    }

    #[tokio::test]
    async fn test_rerun_after_fix_skips_completed_items() {
        let store = store();
        let id = planned_task(&store, 5).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres));
        let broken = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t03", u32::MAX, "syntax error"));

        BatchExecutor::new(store.clone(), broken)
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        let mut fixed = store.get_item(id, 3).await.unwrap();
        fixed.target_ddl = "CREATE TABLE app.t03 (id BIGINT)".into();
        store.update_item(fixed).await.unwrap();

        let summary = BatchExecutor::new(store.clone(), target.clone())
            .retry_failed(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        assert!(summary.is_success());
        assert_eq!(summary.attempted, 1);
        assert_eq!(target.attempts(), vec!["CREATE TABLE app.t03 (id BIGINT)".to_string()]);
    }

    #[tokio::test]
    async fn test_connection_loss_fails_task_and_leaves_rest_pending() {
        let store = store();
        let id = planned_task(&store, 5).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).disconnect_on("app.t03"));

        let err = BatchExecutor::new(store.clone(), target)
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_connectivity());

        let task = store.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!((task.completed_items, task.failed_items, task.pending_items), (2, 1, 2));
        assert!(task.error_message.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_cancel_before_start_returns_task_to_planning() {
        let store = store();
        let id = planned_task(&store, 3).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = BatchExecutor::new(store.clone(), Arc::new(MockAdapter::new(Dialect::Postgres)))
            .execute(id, &ExecuteOptions::default(), cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.status, TaskStatus::Planning);
        assert_eq!(summary.pending, 3);
    }

    #[tokio::test]
    async fn test_cancel_mid_run_finishes_current_item_only() {
        let store = store();
        let id = planned_task(&store, 4).await;
        let (adapter, release) = MockAdapter::new(Dialect::Postgres).gated();
        let target = Arc::new(adapter);
        let started = target.started.clone();
        let cancel = CancellationToken::new();

        let run = {
            let executor = BatchExecutor::new(store.clone(), target.clone());
            let cancel = cancel.clone();
            tokio::spawn(async move {
                executor
                    .execute(id, &ExecuteOptions::default(), cancel)
                    .await
            })
        };
        started.notified().await;
        cancel.cancel();
        release.notify_one();

        let summary = run.await.unwrap().unwrap();
        assert!(summary.cancelled);
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.status, TaskStatus::Planning);
        assert_eq!((summary.completed, summary.pending), (1, 3));

        assert_eq!(store.get_item(id, 1).await.unwrap().status, ItemStatus::Completed);
        for order in 2..=4 {
            assert_eq!(store.get_item(id, order).await.unwrap().status, ItemStatus::Pending);
        }
        assert_eq!(target.attempts().len(), 1);
        assert_eq!(store.get_task(id).await.unwrap().status, TaskStatus::Planning);
    }

    #[tokio::test]
    async fn test_concurrent_execute_is_rejected() {
        let store = store();
        let id = planned_task(&store, 1).await;
        let (adapter, release) = MockAdapter::new(Dialect::Postgres).gated();
        let target = Arc::new(adapter);
        let started = target.started.clone();

        let first = {
            let executor = BatchExecutor::new(store.clone(), target.clone());
            tokio::spawn(async move {
                executor
                    .execute(id, &ExecuteOptions::default(), CancellationToken::new())
                    .await
            })
        };
        started.notified().await;

        let second = BatchExecutor::new(store.clone(), target.clone())
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await;
        assert!(matches!(second, Err(MigrateError::TaskBusy(_))));

        release.notify_one();
        let summary = first.await.unwrap().unwrap();
        assert!(summary.is_success());
        assert_eq!(target.attempts().len(), 1);
    }

    #[tokio::test]
    async fn test_progress_events_follow_transitions() {
        let store = store();
        let id = planned_task(&store, 2).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t02", u32::MAX, "nope"));
        let (tx, mut rx) = mpsc::channel(64);

        BatchExecutor::new(store.clone(), target)
            .with_progress(tx)
            .execute(id, &ExecuteOptions::default(), CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        let statuses: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Item(i) => Some((i.execution_order, i.status)),
                ProgressEvent::Finished(_) => None,
            })
            .collect();
        assert_eq!(
            statuses,
            vec![
                (1, ItemStatus::Executing),
                (1, ItemStatus::Completed),
                (2, ItemStatus::Executing),
                (2, ItemStatus::Failed),
            ]
        );
        match events.last() {
            Some(ProgressEvent::Finished(summary)) => assert_eq!(summary.failed, 1),
            other => panic!("expected final summary, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_aggregate_invariant_during_run() {
        let store = store();
        let id = planned_task(&store, 6).await;
        let target = Arc::new(MockAdapter::new(Dialect::Postgres).fail_on("app.t05", u32::MAX, "x"));
        let (tx, mut rx) = mpsc::channel(128);

        let executor = BatchExecutor::new(store.clone(), target).with_progress(tx);
        let handle = tokio::spawn(async move {
            executor
                .execute(id, &ExecuteOptions::default(), CancellationToken::new())
                .await
        });

        while let Some(event) = rx.recv().await {
            let task = store.get_task(id).await.unwrap();
            assert_eq!(
                task.total_items,
                task.pending_items
                    + task.executing_items
                    + task.completed_items
                    + task.failed_items
                    + task.skipped_items
            );
            if matches!(event, ProgressEvent::Finished(_)) {
                break;
            }
        }
        handle.await.unwrap().unwrap();
    }
}
