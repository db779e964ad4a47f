//! Core abstractions shared across the migration pipeline.
//!
//! - [`schema`]: object descriptors, object kinds and dialects
//! - [`traits`]: the [`DatabaseAdapter`] capability implemented per engine
//! - [`catalog`]: connection registry for dependency injection
//!
//! The analyzer, planner, executor and comparer only see adapters through
//! [`DatabaseAdapter`], so engines can be added without touching them and
//! tests can substitute in-memory implementations.

pub mod catalog;
pub mod schema;
pub mod traits;

pub use catalog::AdapterCatalog;
pub use schema::{Dialect, ForeignKeyRef, ObjectDescriptor, ObjectKind, ObjectRef, Reference};
pub use traits::{DatabaseAdapter, DdlOutcome};
