//! Migration tasks, their items, and the stores that persist them.
//!
//! A [`MigrationTask`] owns an ordered list of [`MigrationItem`]s, one per
//! schema object. Both live in a [`TaskLedger`]; stores wrap the ledger behind
//! an async mutex and optionally persist it as HMAC-signed JSON.

mod file;
mod memory;
mod store;

pub use file::FileTaskStore;
pub use memory::InMemoryTaskStore;
pub use store::TaskStore;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::convert::Confidence;
use crate::core::{Dialect, ObjectKind};
use crate::error::{MigrateError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Lifecycle of a migration task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Analyzing,
    Planning,
    Executing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Analyzing => "analyzing",
            TaskStatus::Planning => "planning",
            TaskStatus::Executing => "executing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "analyzing" => Ok(TaskStatus::Analyzing),
            "planning" => Ok(TaskStatus::Planning),
            "executing" => Ok(TaskStatus::Executing),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(MigrateError::State(format!("Invalid task status: {}", s))),
        }
    }
}

/// Lifecycle of one migration item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Executing => "executing",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        }
    }

    /// `completed` and `skipped` are never left.
    pub fn is_final(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Skipped)
    }

    /// Allowed moves: pending -> executing -> {completed, failed};
    /// failed -> {executing, skipped}.
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        matches!(
            (self, next),
            (Pending, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Failed, Executing)
                | (Failed, Skipped)
        )
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemStatus {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ItemStatus::Pending),
            "executing" => Ok(ItemStatus::Executing),
            "completed" => Ok(ItemStatus::Completed),
            "failed" => Ok(ItemStatus::Failed),
            "skipped" => Ok(ItemStatus::Skipped),
            _ => Err(MigrateError::State(format!("Invalid item status: {}", s))),
        }
    }
}

/// Item counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub total: u32,
    pub pending: u32,
    pub executing: u32,
    pub completed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl ItemCounts {
    pub fn from_items(items: &[MigrationItem]) -> Self {
        let mut counts = Self::default();
        for item in items {
            counts.total += 1;
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Executing => counts.executing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Failed => counts.failed += 1,
                ItemStatus::Skipped => counts.skipped += 1,
            }
        }
        counts
    }
}

/// One migration run from a source connection to a target connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationTask {
    pub id: Uuid,
    pub source_connection: String,
    pub target_connection: String,
    pub source_schema: Option<String>,
    pub target_schema: Option<String>,
    pub source_dialect: Dialect,
    pub target_dialect: Dialect,
    pub status: TaskStatus,

    pub total_items: u32,
    pub pending_items: u32,
    pub executing_items: u32,
    pub completed_items: u32,
    pub failed_items: u32,
    pub skipped_items: u32,

    /// Task-level failure (connectivity, cycle, etc.).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationTask {
    /// Create a task in the `analyzing` state with no items.
    pub fn new(
        source_connection: impl Into<String>,
        target_connection: impl Into<String>,
        source_dialect: Dialect,
        target_dialect: Dialect,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_connection: source_connection.into(),
            target_connection: target_connection.into(),
            source_schema: None,
            target_schema: None,
            source_dialect,
            target_dialect,
            status: TaskStatus::Analyzing,
            total_items: 0,
            pending_items: 0,
            executing_items: 0,
            completed_items: 0,
            failed_items: 0,
            skipped_items: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn with_schemas(mut self, source: Option<String>, target: Option<String>) -> Self {
        self.source_schema = source;
        self.target_schema = target;
        self
    }

    /// Recompute aggregate counters from the task's items.
    pub fn recount(&mut self, items: &[MigrationItem]) {
        let c = ItemCounts::from_items(items);
        self.total_items = c.total;
        self.pending_items = c.pending;
        self.executing_items = c.executing;
        self.completed_items = c.completed;
        self.failed_items = c.failed;
        self.skipped_items = c.skipped;
        self.updated_at = Utc::now();
    }

    pub fn counts(&self) -> ItemCounts {
        ItemCounts {
            total: self.total_items,
            pending: self.pending_items,
            executing: self.executing_items,
            completed: self.completed_items,
            failed: self.failed_items,
            skipped: self.skipped_items,
        }
    }

    /// Status shown to operators. A task that finished its queue with
    /// failures reads "completed with errors".
    pub fn outcome_label(&self) -> String {
        match self.status {
            TaskStatus::Failed if self.pending_items == 0 && self.failed_items > 0 => format!(
                "completed with errors, {} item{} failed",
                self.failed_items,
                if self.failed_items == 1 { "" } else { "s" }
            ),
            status => status.to_string(),
        }
    }

    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

/// One object's migration record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationItem {
    pub task_id: Uuid,
    /// Position in the resolved order, starting at 1.
    pub execution_order: u32,
    pub object_type: ObjectKind,
    pub object_name: String,
    pub schema_name: String,
    pub status: ItemStatus,
    pub source_ddl: String,
    pub target_ddl: String,
    #[serde(default)]
    pub conversion_notes: Vec<String>,
    pub confidence: Confidence,
    /// Constraint split off the owning table to break a cycle.
    #[serde(default)]
    pub deferred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

impl MigrationItem {
    /// `schema.name` of the object.
    pub fn qualified_name(&self) -> String {
        if self.schema_name.is_empty() {
            self.object_name.clone()
        } else {
            format!("{}.{}", self.schema_name, self.object_name)
        }
    }

    /// Move to `next`, enforcing the item state machine.
    pub fn transition(&mut self, next: ItemStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MigrateError::transition(
                format!("{} ({})", self.status, self.qualified_name()),
                next,
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// A task and the items it owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task: MigrationTask,
    pub items: Vec<MigrationItem>,
}

impl TaskRecord {
    /// Fail items stuck in `executing` and recount. Returns how many there were.
    fn fail_interrupted_items(&mut self) -> u32 {
        let mut count = 0;
        for item in self.items.iter_mut().filter(|i| i.status == ItemStatus::Executing) {
            item.status = ItemStatus::Failed;
            item.error_message = Some("interrupted before the statement finished".to_string());
            count += 1;
        }
        if count > 0 {
            self.task.recount(&self.items);
        }
        count
    }
}

/// All tasks known to a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskLedger {
    /// Ledger identifier, also the HMAC key.
    pub ledger_id: String,

    pub tasks: BTreeMap<Uuid, TaskRecord>,

    /// HMAC-SHA256 over the serialized ledger (excluding this field).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl Default for TaskLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskLedger {
    pub fn new() -> Self {
        Self {
            ledger_id: Uuid::new_v4().to_string(),
            tasks: BTreeMap::new(),
            hmac: None,
        }
    }

    fn record(&self, id: Uuid) -> Result<&TaskRecord> {
        self.tasks
            .get(&id)
            .ok_or_else(|| MigrateError::TaskNotFound(id.to_string()))
    }

    fn record_mut(&mut self, id: Uuid) -> Result<&mut TaskRecord> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| MigrateError::TaskNotFound(id.to_string()))
    }

    pub fn create_task(&mut self, task: MigrationTask) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(MigrateError::State(format!(
                "Migration task {} already exists",
                task.id
            )));
        }
        self.tasks.insert(
            task.id,
            TaskRecord {
                task,
                items: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn insert_items(&mut self, id: Uuid, items: Vec<MigrationItem>) -> Result<MigrationTask> {
        let record = self.record_mut(id)?;
        for item in &items {
            if item.task_id != id {
                return Err(MigrateError::State(format!(
                    "Item #{} belongs to task {}, not {}",
                    item.execution_order, item.task_id, id
                )));
            }
            if record
                .items
                .iter()
                .any(|i| i.execution_order == item.execution_order)
            {
                return Err(MigrateError::State(format!(
                    "Duplicate execution order {} in task {}",
                    item.execution_order, id
                )));
            }
        }
        record.items.extend(items);
        record.items.sort_by_key(|i| i.execution_order);
        let TaskRecord { task, items } = record;
        task.recount(items);
        Ok(task.clone())
    }

    pub fn get_task(&self, id: Uuid) -> Result<MigrationTask> {
        Ok(self.record(id)?.task.clone())
    }

    pub fn list_tasks(&self) -> Vec<MigrationTask> {
        let mut tasks: Vec<MigrationTask> = self.tasks.values().map(|r| r.task.clone()).collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn get_items(&self, id: Uuid) -> Result<Vec<MigrationItem>> {
        Ok(self.record(id)?.items.clone())
    }

    pub fn get_item(&self, id: Uuid, order: u32) -> Result<MigrationItem> {
        self.record(id)?
            .items
            .iter()
            .find(|i| i.execution_order == order)
            .cloned()
            .ok_or_else(|| MigrateError::ItemNotFound {
                task_id: id.to_string(),
                order,
            })
    }

    /// Replace a stored item, enforcing monotonic status and recounting.
    pub fn update_item(&mut self, item: MigrationItem) -> Result<MigrationTask> {
        let id = item.task_id;
        let record = self.record_mut(id)?;
        let stored = record
            .items
            .iter_mut()
            .find(|i| i.execution_order == item.execution_order)
            .ok_or_else(|| MigrateError::ItemNotFound {
                task_id: id.to_string(),
                order: item.execution_order,
            })?;

        if stored.status.is_final() && *stored != item {
            return Err(MigrateError::transition(
                format!("{} ({})", stored.status, stored.qualified_name()),
                item.status,
            ));
        }
        if stored.status != item.status && !stored.status.can_transition_to(item.status) {
            return Err(MigrateError::transition(
                format!("{} ({})", stored.status, stored.qualified_name()),
                item.status,
            ));
        }
        *stored = item;

        let TaskRecord { task, items } = record;
        task.recount(items);
        Ok(task.clone())
    }

    /// Set the task status, stamping start/end times.
    pub fn set_task_status(
        &mut self,
        id: Uuid,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> Result<MigrationTask> {
        let task = &mut self.record_mut(id)?.task;
        let now = Utc::now();
        task.status = status;
        task.error_message = error_message;
        task.updated_at = now;
        match status {
            TaskStatus::Executing => {
                task.started_at = Some(now);
                task.completed_at = None;
            }
            TaskStatus::Completed | TaskStatus::Failed => task.completed_at = Some(now),
            TaskStatus::Analyzing | TaskStatus::Planning => {}
        }
        Ok(task.clone())
    }

    /// Claim the task for one executor.
    ///
    /// Items still marked `executing` belong to a run that never finished;
    /// they are failed first so this run picks them up again.
    pub fn begin_execution(&mut self, id: Uuid) -> Result<MigrationTask> {
        let record = self.record_mut(id)?;
        match record.task.status {
            TaskStatus::Executing => return Err(MigrateError::TaskBusy(id.to_string())),
            TaskStatus::Analyzing => {
                return Err(MigrateError::State(format!(
                    "Migration task {} has no plan yet",
                    id
                )))
            }
            _ => {}
        }
        record.fail_interrupted_items();
        self.set_task_status(id, TaskStatus::Executing, None)
    }

    /// Settle tasks left `executing` by a process that stopped mid-run.
    ///
    /// Each such task becomes `failed` and its in-flight items `failed`, so
    /// a later execute or retry resumes it. Returns the recovered task ids.
    pub fn recover_interrupted(&mut self) -> Vec<Uuid> {
        let interrupted: Vec<Uuid> = self
            .tasks
            .values()
            .filter(|r| r.task.status == TaskStatus::Executing)
            .map(|r| r.task.id)
            .collect();

        for id in &interrupted {
            if let Some(record) = self.tasks.get_mut(id) {
                let in_flight = record.fail_interrupted_items();
                let message = format!(
                    "execution interrupted ({} item(s) in flight); run execute again to resume",
                    in_flight
                );
                let task = &mut record.task;
                let now = Utc::now();
                task.status = TaskStatus::Failed;
                task.error_message = Some(message);
                task.updated_at = now;
                task.completed_at = Some(now);
            }
        }
        interrupted
    }

    pub fn delete_task(&mut self, id: Uuid) -> Result<()> {
        if self.record(id)?.task.status == TaskStatus::Executing {
            return Err(MigrateError::TaskBusy(id.to_string()));
        }
        self.tasks.remove(&id);
        Ok(())
    }

    /// Compute HMAC-SHA256 signature keyed by the ledger id.
    fn compute_hmac(&self) -> Result<String> {
        let mut for_signing = self.clone();
        for_signing.hmac = None;

        let content = serde_json::to_string(&for_signing)
            .map_err(|e| MigrateError::State(format!("Failed to serialize ledger for HMAC: {}", e)))?;

        let mut mac = HmacSha256::new_from_slice(self.ledger_id.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load a ledger file, verifying its HMAC.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let ledger: Self = serde_json::from_str(&content)?;

        match &ledger.hmac {
            Some(stored) => {
                if stored != &ledger.compute_hmac()? {
                    return Err(MigrateError::State(
                        "Task ledger integrity check failed: HMAC mismatch (possible tampering)"
                            .to_string(),
                    ));
                }
            }
            None => tracing::warn!("Task ledger has no HMAC signature, integrity cannot be verified"),
        }

        Ok(ledger)
    }

    /// Save the ledger (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = Some(self.compute_hmac()?);

        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn task() -> MigrationTask {
        MigrationTask::new("src", "tgt", Dialect::Mysql, Dialect::Postgres)
    }

    pub fn item(task_id: Uuid, order: u32, name: &str) -> MigrationItem {
        MigrationItem {
            task_id,
            execution_order: order,
            object_type: ObjectKind::Table,
            object_name: name.to_string(),
            schema_name: "app".to_string(),
            status: ItemStatus::Pending,
            source_ddl: format!("CREATE TABLE app.{} (id INT)", name),
            target_ddl: format!("CREATE TABLE app.{} (id INTEGER)", name),
            conversion_notes: Vec::new(),
            confidence: Confidence::High,
            deferred: false,
            error_message: None,
            retry_count: 0,
            executed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{item, task};
    use super::*;
    use tempfile::TempDir;

    fn ledger_with_items(n: u32) -> (TaskLedger, Uuid) {
        let mut ledger = TaskLedger::new();
        let t = task();
        let id = t.id;
        ledger.create_task(t).unwrap();
        let items = (1..=n).map(|i| item(id, i, &format!("t{}", i))).collect();
        ledger.insert_items(id, items).unwrap();
        (ledger, id)
    }

    #[test]
    fn test_item_transitions() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Executing));
        assert!(Failed.can_transition_to(Skipped));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Executing));
        assert!(!Skipped.can_transition_to(Executing));
        assert!(!Completed.can_transition_to(Failed));
    }

    #[test]
    fn test_status_string_roundtrip() {
        for s in ["analyzing", "planning", "executing", "completed", "failed"] {
            assert_eq!(s.parse::<TaskStatus>().unwrap().as_str(), s);
        }
        for s in ["pending", "executing", "completed", "failed", "skipped"] {
            assert_eq!(s.parse::<ItemStatus>().unwrap().as_str(), s);
        }
        assert!("running".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_insert_items_recounts() {
        let (ledger, id) = ledger_with_items(3);
        let task = ledger.get_task(id).unwrap();
        assert_eq!(task.total_items, 3);
        assert_eq!(task.pending_items, 3);
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let (mut ledger, id) = ledger_with_items(2);
        let err = ledger.insert_items(id, vec![item(id, 2, "dup")]).unwrap_err();
        assert!(err.to_string().contains("Duplicate execution order"));
    }

    #[test]
    fn test_update_item_enforces_monotonic_status() {
        let (mut ledger, id) = ledger_with_items(1);
        let mut it = ledger.get_item(id, 1).unwrap();
        it.status = ItemStatus::Completed;
        assert!(matches!(
            ledger.update_item(it.clone()),
            Err(MigrateError::InvalidTransition { .. })
        ));

        it.status = ItemStatus::Executing;
        ledger.update_item(it.clone()).unwrap();
        it.status = ItemStatus::Completed;
        let task = ledger.update_item(it.clone()).unwrap();
        assert_eq!(task.completed_items, 1);

        it.target_ddl = "changed".into();
        assert!(ledger.update_item(it).is_err());
    }

    #[test]
    fn test_aggregate_invariant_holds_after_updates() {
        let (mut ledger, id) = ledger_with_items(5);
        for (order, end) in [(1, ItemStatus::Completed), (2, ItemStatus::Failed)] {
            let mut it = ledger.get_item(id, order).unwrap();
            it.status = ItemStatus::Executing;
            ledger.update_item(it.clone()).unwrap();
            it.status = end;
            ledger.update_item(it).unwrap();
        }
        let mut it = ledger.get_item(id, 3).unwrap();
        it.status = ItemStatus::Executing;
        let t = ledger.update_item(it).unwrap();

        assert_eq!(
            t.total_items,
            t.pending_items + t.executing_items + t.completed_items + t.failed_items + t.skipped_items
        );
        assert_eq!((t.completed_items, t.failed_items, t.executing_items, t.pending_items), (1, 1, 1, 2));
    }

    #[test]
    fn test_begin_execution_rejects_busy_task() {
        let (mut ledger, id) = ledger_with_items(1);
        ledger.set_task_status(id, TaskStatus::Planning, None).unwrap();
        ledger.begin_execution(id).unwrap();
        assert!(matches!(ledger.begin_execution(id), Err(MigrateError::TaskBusy(_))));
        assert!(matches!(ledger.delete_task(id), Err(MigrateError::TaskBusy(_))));
    }

    #[test]
    fn test_recover_interrupted_fails_in_flight_items() {
        let (mut ledger, id) = ledger_with_items(3);
        ledger.set_task_status(id, TaskStatus::Planning, None).unwrap();
        ledger.begin_execution(id).unwrap();
        let mut it = ledger.get_item(id, 1).unwrap();
        it.status = ItemStatus::Executing;
        ledger.update_item(it).unwrap();

        assert_eq!(ledger.recover_interrupted(), vec![id]);
        let t = ledger.get_task(id).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!((t.executing_items, t.failed_items, t.pending_items), (0, 1, 2));
        assert!(ledger.recover_interrupted().is_empty());

        // the task can be claimed again
        ledger.begin_execution(id).unwrap();
    }

    #[test]
    fn test_begin_execution_fails_orphaned_items() {
        let (mut ledger, id) = ledger_with_items(2);
        let mut it = ledger.get_item(id, 2).unwrap();
        it.status = ItemStatus::Executing;
        ledger.update_item(it).unwrap();
        ledger.set_task_status(id, TaskStatus::Failed, None).unwrap();

        let t = ledger.begin_execution(id).unwrap();
        assert_eq!(t.executing_items, 0);
        let it = ledger.get_item(id, 2).unwrap();
        assert_eq!(it.status, ItemStatus::Failed);
        assert!(it.error_message.unwrap().contains("interrupted"));
    }

    #[test]
    fn test_begin_execution_rejects_unplanned_task() {
        let (mut ledger, id) = ledger_with_items(0);
        assert!(ledger.begin_execution(id).is_err());
    }

    #[test]
    fn test_delete_cascades_items() {
        let (mut ledger, id) = ledger_with_items(2);
        ledger.set_task_status(id, TaskStatus::Planning, None).unwrap();
        ledger.delete_task(id).unwrap();
        assert!(matches!(ledger.get_items(id), Err(MigrateError::TaskNotFound(_))));
    }

    #[test]
    fn test_outcome_label() {
        let mut t = task();
        t.status = TaskStatus::Failed;
        t.total_items = 10;
        t.completed_items = 9;
        t.failed_items = 1;
        assert_eq!(t.outcome_label(), "completed with errors, 1 item failed");
        t.pending_items = 3;
        assert_eq!(t.outcome_label(), "failed");
    }

    #[test]
    fn test_ledger_save_load() {
        let (mut ledger, id) = ledger_with_items(2);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        ledger.save(&path).unwrap();

        let loaded = TaskLedger::load(&path).unwrap();
        assert_eq!(loaded.ledger_id, ledger.ledger_id);
        assert_eq!(loaded.get_items(id).unwrap().len(), 2);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"ledger_id\""), "Ledger should be JSON");
        assert!(content.contains('\n'), "JSON should be pretty-printed");
    }

    #[test]
    fn test_ledger_tamper_detected() {
        let (mut ledger, _) = ledger_with_items(1);
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tasks.json");
        ledger.save(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, content.replace("\"pending\"", "\"completed\"")).unwrap();

        let err = TaskLedger::load(&path).unwrap_err();
        assert!(err.to_string().contains("HMAC mismatch"));
    }
}
