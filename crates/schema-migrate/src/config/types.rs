//! Configuration type definitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::convert::Severity;
use crate::core::{Dialect, ObjectKind};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named database connections, referenced by id from plans.
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,

    /// Execution policy defaults.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Task store settings.
    #[serde(default)]
    pub state: StateConfig,

    /// Extra conversion rules, applied after the built-in ones.
    #[serde(default)]
    pub rules: Vec<RuleSetConfig>,
}

/// Kind of adapter backing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdapterType {
    /// PostgreSQL (and wire-compatible GaussDB) via deadpool-postgres.
    Postgres,
    /// MySQL via sqlx (requires the `mysql` feature).
    Mysql,
    /// Schema snapshot file; DDL is written to a script instead of executed.
    Snapshot,
}

impl std::fmt::Display for AdapterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AdapterType::Postgres => "postgres",
            AdapterType::Mysql => "mysql",
            AdapterType::Snapshot => "snapshot",
        };
        f.write_str(s)
    }
}

/// One database connection.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Adapter type.
    pub r#type: AdapterType,

    /// Dialect override (e.g. `gaussdb` for a GaussDB server reached over the
    /// PostgreSQL protocol). Defaults from the adapter type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<Dialect>,

    /// Database host.
    #[serde(default)]
    pub host: String,

    /// Database port (default depends on type).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database name.
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Default schema for introspection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// SSL mode (default: "disable").
    #[serde(default = "default_disable")]
    pub ssl_mode: String,

    /// Connection pool size (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Snapshot file with the object list (snapshot type only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// File receiving applied DDL (snapshot type only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Dialect implied by the adapter type, unless overridden.
    ///
    /// Snapshot connections have no implied dialect; they read it from the
    /// snapshot file when not configured.
    pub fn resolved_dialect(&self) -> Option<Dialect> {
        self.dialect.or(match self.r#type {
            AdapterType::Postgres => Some(Dialect::Postgres),
            AdapterType::Mysql => Some(Dialect::Mysql),
            AdapterType::Snapshot => None,
        })
    }

    /// Port, falling back to the engine default.
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(match self.r#type {
            AdapterType::Postgres => 5432,
            AdapterType::Mysql => 3306,
            AdapterType::Snapshot => 0,
        })
    }
}

// Custom Debug that keeps the password out of logs.
impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("type", &self.r#type)
            .field("dialect", &self.dialect)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .field("ssl_mode", &self.ssl_mode)
            .field("max_connections", &self.max_connections)
            .field("path", &self.path)
            .field("script", &self.script)
            .finish()
    }
}

/// Execution policy defaults for `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Retry a failed item immediately (default: false).
    #[serde(default)]
    pub auto_retry: bool,

    /// Upper bound on `retry_count` for automatic retries (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Halt the run at the first failed item (default: false).
    #[serde(default)]
    pub stop_on_failure: bool,

    /// Mark items that exhausted their retries as skipped (default: false).
    #[serde(default)]
    pub skip_failed: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            auto_retry: false,
            max_retries: default_max_retries(),
            stop_on_failure: false,
            skip_failed: false,
        }
    }
}

/// Task store settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// JSON ledger file. Tasks are kept in memory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A set of conversion rules for one dialect pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub source: Dialect,
    pub target: Dialect,

    /// Object kinds the rules apply to. Empty means all kinds.
    #[serde(default)]
    pub kinds: Vec<ObjectKind>,

    pub rules: Vec<RuleConfig>,
}

/// One regex rewrite and/or note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Rule name for notes and logs (default: the pattern).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Regular expression matched against the definition.
    pub pattern: String,

    /// Replacement text (`$1` style groups). Absent means note only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,

    /// Note attached when the pattern matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,

    /// Severity of the note (default: info).
    #[serde(default)]
    pub severity: Severity,

    /// Match case-insensitively (default: true).
    #[serde(default = "default_true")]
    pub case_insensitive: bool,
}

// Default value functions
fn default_disable() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_true() -> bool {
    true
}
