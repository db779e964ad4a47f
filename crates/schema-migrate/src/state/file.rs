//! JSON file task store.
//!
//! The whole ledger is rewritten after every mutation using the same
//! temp-file-then-rename step as [`TaskLedger::save`]. One process per ledger
//! file; concurrent writers from separate processes are not coordinated.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{MigrationItem, MigrationTask, TaskLedger, TaskStatus, TaskStore};
use crate::error::Result;

/// Task store backed by an HMAC-signed JSON file.
pub struct FileTaskStore {
    path: PathBuf,
    ledger: Mutex<TaskLedger>,
}

impl FileTaskStore {
    /// Open the ledger at `path`, creating an empty one if the file is absent.
    ///
    /// Tasks still marked `executing` in the file were interrupted and are
    /// settled as failed; see [`TaskLedger::recover_interrupted`].
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let ledger = if path.exists() {
            let mut ledger = TaskLedger::load(&path)?;
            debug!("Loaded {} task(s) from {}", ledger.tasks.len(), path.display());
            let interrupted = ledger.recover_interrupted();
            if !interrupted.is_empty() {
                for id in &interrupted {
                    warn!("Task {} was left executing by an earlier run; marked failed", id);
                }
                ledger.save(&path)?;
            }
            ledger
        } else {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            TaskLedger::new()
        };
        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read<T>(&self, f: impl FnOnce(&TaskLedger) -> Result<T>) -> Result<T> {
        let ledger = self.ledger.lock().await;
        f(&ledger)
    }

    /// Apply `f` and persist. On a failed write the in-memory ledger is
    /// restored so memory and disk stay in step.
    async fn write<T>(&self, f: impl FnOnce(&mut TaskLedger) -> Result<T>) -> Result<T> {
        let mut ledger = self.ledger.lock().await;
        let before = ledger.clone();
        let out = f(&mut ledger)?;
        if let Err(e) = ledger.save(&self.path) {
            *ledger = before;
            return Err(e);
        }
        Ok(out)
    }
}

#[async_trait]
impl TaskStore for FileTaskStore {
    async fn create_task(&self, task: MigrationTask) -> Result<()> {
        self.write(|l| l.create_task(task)).await
    }

    async fn insert_items(&self, task_id: Uuid, items: Vec<MigrationItem>) -> Result<MigrationTask> {
        self.write(|l| l.insert_items(task_id, items)).await
    }

    async fn get_task(&self, task_id: Uuid) -> Result<MigrationTask> {
        self.read(|l| l.get_task(task_id)).await
    }

    async fn list_tasks(&self) -> Result<Vec<MigrationTask>> {
        self.read(|l| Ok(l.list_tasks())).await
    }

    async fn get_items(&self, task_id: Uuid) -> Result<Vec<MigrationItem>> {
        self.read(|l| l.get_items(task_id)).await
    }

    async fn get_item(&self, task_id: Uuid, execution_order: u32) -> Result<MigrationItem> {
        self.read(|l| l.get_item(task_id, execution_order)).await
    }

    async fn update_item(&self, item: MigrationItem) -> Result<MigrationTask> {
        self.write(|l| l.update_item(item)).await
    }

    async fn set_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<MigrationTask> {
        self.write(|l| l.set_task_status(task_id, status, error_message))
            .await
    }

    async fn begin_execution(&self, task_id: Uuid) -> Result<MigrationTask> {
        self.write(|l| l.begin_execution(task_id)).await
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<()> {
        self.write(|l| l.delete_task(task_id)).await
    }

    fn store_type(&self) -> &'static str {
        "file"
    }
}
