//! Database adapters.
//!
//! - [`SnapshotAdapter`]: schema snapshot file, always available
//! - [`PostgresAdapter`]: PostgreSQL and GaussDB (`postgres` feature)
//! - [`MysqlAdapter`]: MySQL and MariaDB (`mysql` feature)

mod ddl;
mod snapshot;

#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;

pub use ddl::{split_qualified, DdlParser};
pub use snapshot::{Snapshot, SnapshotAdapter};

#[cfg(feature = "mysql")]
pub use mysql::MysqlAdapter;
#[cfg(feature = "postgres")]
pub use postgres::PostgresAdapter;
