//! Scripted adapter shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::core::{DatabaseAdapter, DdlOutcome, Dialect, ObjectDescriptor};
use crate::error::{MigrateError, Result};

pub struct MockAdapter {
    name: String,
    dialect: Dialect,
    objects: Mutex<Vec<ObjectDescriptor>>,
    /// (substring, remaining failures, message)
    failures: Mutex<Vec<(String, u32, String)>>,
    attempts: Mutex<Vec<String>>,
    offline: AtomicBool,
    /// Disconnect when a statement containing this text is attempted.
    drop_on: Mutex<Option<String>>,
    gate: Mutex<Option<Arc<Notify>>>,
    pub started: Arc<Notify>,
}

impl MockAdapter {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            name: "mock".to_string(),
            dialect,
            objects: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            drop_on: Mutex::new(None),
            gate: Mutex::new(None),
            started: Arc::new(Notify::new()),
        }
    }

    pub fn with_objects(self, objects: Vec<ObjectDescriptor>) -> Self {
        *self.objects.lock().unwrap() = objects;
        self
    }

    /// Reject statements containing `needle` the next `times` attempts.
    pub fn fail_on(self, needle: &str, times: u32, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .push((needle.to_string(), times, message.to_string()));
        self
    }

    pub fn disconnect_on(self, needle: &str) -> Self {
        *self.drop_on.lock().unwrap() = Some(needle.to_string());
        self
    }

    /// Hold the first DDL call until the returned notify is signalled.
    pub fn gated(self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        (self, gate)
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_objects(&self, objects: Vec<ObjectDescriptor>) {
        *self.objects.lock().unwrap() = objects;
    }

    /// Every statement passed to `execute_ddl`, in call order.
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DatabaseAdapter for MockAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn introspect(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::connection("mock", "connection refused"));
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|d| schema.map_or(true, |s| d.schema == s))
            .cloned()
            .collect())
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<DdlOutcome> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            self.started.notify_one();
            gate.notified().await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(MigrateError::connection("mock", "connection reset"));
        }
        let dropped = self
            .drop_on
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|n| ddl.contains(n.as_str()));
        if dropped {
            self.set_offline(true);
            return Err(MigrateError::connection("mock", "connection reset"));
        }
        self.attempts.lock().unwrap().push(ddl.to_string());

        let mut failures = self.failures.lock().unwrap();
        if let Some(f) = failures
            .iter_mut()
            .find(|(needle, remaining, _)| *remaining > 0 && ddl.contains(needle.as_str()))
        {
            f.1 -= 1;
            return Ok(DdlOutcome::Failed(f.2.clone()));
        }
        Ok(DdlOutcome::Applied)
    }

    async fn close(&self) {}
}
