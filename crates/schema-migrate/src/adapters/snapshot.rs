//! Schema snapshot files.
//!
//! A snapshot is a YAML or JSON document listing object descriptors. As a
//! source it is introspected like a live database; as a target every applied
//! statement is appended to an optional script file and the created object
//! is recorded back into the snapshot.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ConnectionConfig;
use crate::core::{DatabaseAdapter, DdlOutcome, Dialect, ObjectDescriptor};
use crate::error::{MigrateError, Result};

use super::ddl::DdlParser;

/// On-disk snapshot document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,

    #[serde(default)]
    pub objects: Vec<ObjectDescriptor>,
}

impl Snapshot {
    fn is_json(path: &Path) -> bool {
        path.extension()
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false)
    }

    /// Load a snapshot, `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        let snapshot = if Self::is_json(path) {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        Ok(Some(snapshot))
    }

    /// Write atomically (temp file + rename), in the format the extension names.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = if Self::is_json(path) {
            serde_json::to_string_pretty(self)?
        } else {
            serde_yaml::to_string(self)?
        };
        let temp = path.with_extension("tmp");
        std::fs::write(&temp, content)?;
        std::fs::rename(&temp, path)?;
        Ok(())
    }
}

/// Adapter over a snapshot file.
#[derive(Debug)]
pub struct SnapshotAdapter {
    id: String,
    dialect: Dialect,
    path: PathBuf,
    script: Option<PathBuf>,
    default_schema: String,
    snapshot: Mutex<Snapshot>,
    parser: DdlParser,
}

impl SnapshotAdapter {
    /// Open the snapshot a connection points at. A missing file is an empty
    /// database.
    pub fn from_config(id: &str, conn: &ConnectionConfig) -> Result<Self> {
        let path = conn.path.clone().ok_or_else(|| {
            MigrateError::Config(format!("connections.{}.path is required for snapshot connections", id))
        })?;
        let snapshot = Snapshot::load(&path)?.unwrap_or_default();
        let dialect = conn.dialect.or(snapshot.dialect).ok_or_else(|| {
            MigrateError::Config(format!(
                "connections.{}.dialect is required: snapshot {} does not name one",
                id,
                path.display()
            ))
        })?;

        debug!("Snapshot '{}' holds {} objects ({})", id, snapshot.objects.len(), dialect);

        Ok(Self {
            id: id.to_string(),
            dialect,
            path,
            script: conn.script.clone(),
            default_schema: conn.schema.clone().unwrap_or_default(),
            snapshot: Mutex::new(Snapshot {
                dialect: Some(dialect),
                objects: snapshot.objects,
            }),
            parser: DdlParser::new()?,
        })
    }

    fn append_script(&self, ddl: &str) -> Result<()> {
        let Some(script) = &self.script else {
            return Ok(());
        };
        let mut file = OpenOptions::new().create(true).append(true).open(script)?;
        writeln!(file, "{};", ddl.trim_end().trim_end_matches(';'))?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdapter for SnapshotAdapter {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn name(&self) -> &str {
        "snapshot"
    }

    async fn introspect(&self, schema: Option<&str>) -> Result<Vec<ObjectDescriptor>> {
        let snapshot = self.snapshot.lock().await;
        Ok(snapshot
            .objects
            .iter()
            .filter(|o| schema.map_or(true, |s| o.schema.eq_ignore_ascii_case(s)))
            .cloned()
            .collect())
    }

    async fn execute_ddl(&self, ddl: &str) -> Result<DdlOutcome> {
        let mut snapshot = self.snapshot.lock().await;

        let Some((created, tolerant)) = self.parser.created_object(ddl, &self.default_schema) else {
            self.append_script(ddl)?;
            return Ok(DdlOutcome::Applied);
        };

        let existing = snapshot.objects.iter().position(|o| {
            o.kind == created.kind
                && o.schema.eq_ignore_ascii_case(&created.schema)
                && o.name.eq_ignore_ascii_case(&created.name)
        });
        if existing.is_some() && !tolerant {
            return Ok(DdlOutcome::Failed(format!(
                "{} {} already exists",
                created.kind,
                created.qualified_name()
            )));
        }

        let mut updated = snapshot.clone();
        let descriptor = ObjectDescriptor::new(created.kind, &created.schema, &created.name, ddl);
        match existing {
            Some(i) => updated.objects[i] = descriptor,
            None => updated.objects.push(descriptor),
        }
        updated.save(&self.path)?;
        *snapshot = updated;
        self.append_script(ddl)?;

        info!("{}: applied {} {}", self.id, created.kind, created.qualified_name());
        Ok(DdlOutcome::Applied)
    }

    async fn close(&self) {}
}
