//! Error types for the schema migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A source or target connection could not be reached.
    #[error("Connection '{connection}' failed: {message}")]
    Connection { connection: String, message: String },

    /// Adapter-level failure that is not a lost connection.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Schema introspection failed after the connection was established.
    #[error("Introspection failed: {0}")]
    Introspection(String),

    /// Dependency graph contains a cycle that no foreign key deferral can break.
    #[error("Dependency cycle cannot be broken: {}", objects.join(" -> "))]
    Cycle { objects: Vec<String> },

    /// Migration task does not exist in the store.
    #[error("Migration task {0} not found")]
    TaskNotFound(String),

    /// Migration item does not exist in the task.
    #[error("Migration item #{order} not found in task {task_id}")]
    ItemNotFound { task_id: String, order: u32 },

    /// Another executor already holds the task.
    #[error("Migration task {0} is already executing")]
    TaskBusy(String),

    /// An item or task status change that the state machine forbids.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Task store error
    #[error("State store error: {0}")]
    State(String),

    /// Conversion rule could not be compiled.
    #[error("Conversion rule error: {0}")]
    Rule(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// PostgreSQL driver error
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MySQL driver error
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// Execution was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Connection error for the named connection.
    pub fn connection(connection: impl Into<String>, message: impl std::fmt::Display) -> Self {
        MigrateError::Connection {
            connection: connection.into(),
            message: message.to_string(),
        }
    }

    /// Create an InvalidTransition error.
    pub fn transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        MigrateError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True for errors that mean a database could not be reached.
    pub fn is_connectivity(&self) -> bool {
        match self {
            MigrateError::Connection { .. } => true,
            #[cfg(feature = "postgres")]
            MigrateError::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Rule(_) => 1,
            MigrateError::Connection { .. } | MigrateError::Introspection(_) => 2,
            #[cfg(feature = "postgres")]
            MigrateError::Postgres(_) => 2,
            #[cfg(feature = "mysql")]
            MigrateError::Mysql(_) => 2,
            MigrateError::Cycle { .. } => 3,
            MigrateError::TaskNotFound(_)
            | MigrateError::ItemNotFound { .. }
            | MigrateError::TaskBusy(_)
            | MigrateError::InvalidTransition { .. }
            | MigrateError::State(_)
            | MigrateError::Json(_) => 4,
            MigrateError::Adapter(_) => 5,
            MigrateError::Cancelled => 6,
            MigrateError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
