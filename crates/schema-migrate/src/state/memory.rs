//! In-memory task store.
//!
//! Tasks live only as long as the process. Useful for tests and for one-shot
//! `analyze`/`compare` runs that never need to resume.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{MigrationItem, MigrationTask, TaskLedger, TaskStatus, TaskStore};
use crate::error::Result;

/// Task store that does not persist anything.
///
/// Logs a warning the first time a task is created.
pub struct InMemoryTaskStore {
    ledger: Mutex<TaskLedger>,
    warned: AtomicBool,
    quiet: bool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(TaskLedger::new()),
            warned: AtomicBool::new(false),
            quiet: false,
        }
    }

    /// Store that never warns about missing persistence.
    pub fn quiet() -> Self {
        Self {
            quiet: true,
            ..Self::new()
        }
    }

    fn warn_once(&self) {
        if !self.quiet && !self.warned.swap(true, Ordering::SeqCst) {
            warn!(
                "Using in-memory task store: migration tasks will not be persisted. \
                 Configure state.path to keep tasks between runs."
            );
        }
    }

    async fn with_ledger<T>(&self, f: impl FnOnce(&mut TaskLedger) -> Result<T>) -> Result<T> {
        let mut ledger = self.ledger.lock().await;
        f(&mut ledger)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: MigrationTask) -> Result<()> {
        self.warn_once();
        self.with_ledger(|l| l.create_task(task)).await
    }

    async fn insert_items(&self, task_id: Uuid, items: Vec<MigrationItem>) -> Result<MigrationTask> {
        self.with_ledger(|l| l.insert_items(task_id, items)).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<MigrationTask> {
        self.with_ledger(|l| l.get_task(task_id)).await
    }

    async fn list_tasks(&self) -> Result<Vec<MigrationTask>> {
        self.with_ledger(|l| Ok(l.list_tasks())).await
    }

    async fn get_items(&self, task_id: Uuid) -> Result<Vec<MigrationItem>> {
        self.with_ledger(|l| l.get_items(task_id)).await
    }

    async fn get_item(&self, task_id: Uuid, execution_order: u32) -> Result<MigrationItem> {
        self.with_ledger(|l| l.get_item(task_id, execution_order)).await
    }

    async fn update_item(&self, item: MigrationItem) -> Result<MigrationTask> {
        self.with_ledger(|l| l.update_item(item)).await
    }

    async fn set_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<MigrationTask> {
        self.with_ledger(|l| l.set_task_status(task_id, status, error_message))
            .await
    }

    async fn begin_execution(&self, task_id: Uuid) -> Result<MigrationTask> {
        self.with_ledger(|l| l.begin_execution(task_id)).await
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.with_ledger(|l| l.delete_task(task_id)).await
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}
