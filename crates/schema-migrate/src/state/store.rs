//! Task store trait.
//!
//! The [`TaskStore`] trait is the seam between the planner/executor and the
//! place tasks live. Two implementations ship with the crate:
//!
//! - [`InMemoryTaskStore`](super::InMemoryTaskStore): process-local, used by tests and one-shot runs
//! - [`FileTaskStore`](super::FileTaskStore): HMAC-signed JSON ledger on disk
//!
//! Every mutating call is atomic with respect to other calls on the same store.

use async_trait::async_trait;
use uuid::Uuid;

use super::{MigrationItem, MigrationTask, TaskStatus};
use crate::error::Result;

/// Persistence for migration tasks and their items.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` to allow sharing across async tasks.
///
/// # Example
///
/// ```rust,ignore
/// let store: Arc<dyn TaskStore> = Arc::new(FileTaskStore::open("tasks.json")?);
/// store.create_task(task.clone()).await?;
/// store.insert_items(task.id, items).await?;
/// let task = store.begin_execution(task.id).await?;
/// ```
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Register a new task with no items.
    async fn create_task(&self, task: MigrationTask) -> Result<()>;

    /// Attach items to a task and recompute its counters.
    ///
    /// Execution orders must be unique within the task.
    async fn insert_items(&self, task_id: Uuid, items: Vec<MigrationItem>) -> Result<MigrationTask>;

    async fn get_task(&self, task_id: Uuid) -> Result<MigrationTask>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> Result<Vec<MigrationTask>>;

    /// Items of a task in execution order.
    async fn get_items(&self, task_id: Uuid) -> Result<Vec<MigrationItem>>;

    async fn get_item(&self, task_id: Uuid, execution_order: u32) -> Result<MigrationItem>;

    /// Replace an item.
    ///
    /// Rejects status changes the item state machine forbids and any change
    /// to a completed or skipped item. Returns the task with fresh counters.
    async fn update_item(&self, item: MigrationItem) -> Result<MigrationTask>;

    /// Set the task status and optional task-level error.
    async fn set_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<MigrationTask>;

    /// Atomically move the task to `executing`.
    ///
    /// Fails with [`MigrateError::TaskBusy`](crate::MigrateError::TaskBusy)
    /// if another executor already holds it.
    async fn begin_execution(&self, task_id: Uuid) -> Result<MigrationTask>;

    /// Remove a task and all of its items.
    async fn delete_task(&self, task_id: Uuid) -> Result<()>;

    /// Short name for logs.
    fn store_type(&self) -> &'static str;
}
