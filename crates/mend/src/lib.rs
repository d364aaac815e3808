//! Self-healing table reconciliation for Postgres.
//!
//! Applications declare the tables they expect with [`TableSchema`]. Every
//! time a connection is handed out, mend reads the live definition of those
//! tables, works out what differs, and issues the DDL needed to converge:
//!
//! 1. create the table if it is missing,
//! 2. drop columns nobody declares anymore,
//! 3. add declared columns that are missing,
//! 4. fix type, nullability, keys and generated values on the rest.
//!
//! There is no migration history. Each pass starts from a fresh inspection,
//! so a pass that fails halfway is simply finished by the next one.
//!
//! ```ignore
//! use mend::{ColumnSpec, ReconcilingPool, Schema, SqlType, TableSchema};
//!
//! let mut schema = Schema::new();
//! schema.register(
//!     TableSchema::new("user")
//!         .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
//!         .column(ColumnSpec::new("email", SqlType::Varchar(255)).not_null().unique()),
//! )?;
//!
//! let pool = ReconcilingPool::from_config(&Config::from_env()?, schema)?;
//! // The table is reconciled before the connection comes back.
//! let conn = pool.get().await?;
//! ```
//!
//! The pieces can also be driven one at a time: [`inspect`] reads the live
//! table, [`diff`] computes the actions, [`reconcile`] applies them.

mod backend;
pub mod config;
mod diff;
mod error;
mod introspect;
mod pg;
pub mod pool;
mod reconcile;
pub mod schema;
mod traced;

pub use backend::{BoxFuture, SchemaBackend};
pub use config::Config;
pub use diff::{Action, TableDiff, diff};
pub use error::{Error, Result};
pub use introspect::{Observed, RawColumn, column_from_raw, describe_table, inspect};
pub use pg::PgBackend;
pub use pool::{ConnectionProvider, ReconcilingPool};
pub use reconcile::{
    ActionReport, Outcome, ReconciliationReport, reconcile, reconcile_schema, reconcile_table,
};
pub use schema::TableRef;
pub use traced::{Connection, ConnectionExt, TracedConn};

pub use mend_db_schema::{ColumnSpec, Generated, KeyRole, Schema, SchemaError, SqlType, TableSchema};

/// Quote an identifier for Postgres.
///
/// Embedded double quotes are doubled.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal for Postgres.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
