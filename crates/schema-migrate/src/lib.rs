//! # schema-migrate
//!
//! Cross-database schema migration library.
//!
//! This library moves schema objects (tables, indexes, views, routines,
//! triggers, sequences) from one database engine to another with support for:
//!
//! - **Dependency ordering** with automatic deferral of foreign keys in cycles
//! - **Rule-based DDL conversion** between dialects, with confidence notes
//! - **Resumable execution** via an HMAC-protected JSON task ledger
//! - **Retry and skip** of individual failed objects
//! - **Verification** of the target schema against the plan
//!
//! ## Example
//!
//! ```rust,no_run
//! use schema_migrate::{Config, ExecuteOptions, Orchestrator, PlanRequest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> schema_migrate::Result<()> {
//!     let config = Config::load("migrate.yaml")?;
//!     let orchestrator = Orchestrator::new(config)?;
//!
//!     let plan = orchestrator
//!         .create_migration_plan(&PlanRequest::new("legacy", "warehouse"))
//!         .await?;
//!     let summary = orchestrator
//!         .execute_migration_batch(plan.id, &ExecuteOptions::default(), CancellationToken::new())
//!         .await?;
//!     println!("{}: {}", summary.task_id, summary.outcome);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod analyzer;
pub mod config;
pub mod convert;
pub mod core;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod resolver;
pub mod state;
pub mod verify;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use analyzer::{ObjectSummary, SchemaAnalyzer};
pub use config::{Config, ConnectionConfig, MigrationConfig};
pub use convert::{Confidence, ConversionEngine};
pub use core::{AdapterCatalog, DatabaseAdapter, DdlOutcome, Dialect, ObjectDescriptor, ObjectKind};
pub use error::{MigrateError, Result};
pub use executor::{ExecuteOptions, ExecutionSummary, ProgressEvent};
pub use orchestrator::{HealthStatus, MigrationPlan, Orchestrator};
pub use planner::PlanRequest;
pub use report::{MigrationReport, ReportFormat};
pub use state::{ItemStatus, MigrationItem, MigrationTask, TaskStatus, TaskStore};
pub use verify::ComparisonReport;
