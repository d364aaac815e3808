use crate::reconcile::ReconciliationReport;
use mend_db_schema::SchemaError;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("failed to acquire connection: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("failed to create pool: {0}")]
    CreatePool(#[from] deadpool_postgres::CreatePoolError),

    #[error("failed to inspect table {table}: {source}")]
    InspectionFailed {
        table: String,
        #[source]
        source: BoxError,
    },

    /// The connection went away mid-pass. `report` holds what was attempted.
    #[error("connection lost while reconciling {table} after {attempted} of {planned} actions: {source}")]
    ConnectionLost {
        table: String,
        attempted: usize,
        planned: usize,
        report: Box<ReconciliationReport>,
        #[source]
        source: BoxError,
    },

    #[error("invalid schema: {0}")]
    InvalidSchema(#[from] SchemaError),
}

/// Result type for mend operations.
pub type Result<T> = std::result::Result<T, Error>;
