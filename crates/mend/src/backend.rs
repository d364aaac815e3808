//! The seam between the reconciler and a live database.

use crate::Action;
use mend_db_schema::TableSchema;
use std::future::Future;
use std::pin::Pin;

/// A boxed, sendable future, as returned by [`SchemaBackend`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can describe a table and apply reconciliation actions to it.
///
/// [`PgBackend`](crate::PgBackend) is the Postgres implementation. Tests use
/// in-memory implementations to drive the reconciler without a server.
pub trait SchemaBackend: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current definition of `table`, or `None` if it does not exist.
    fn describe<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, Self::Error>>;

    /// Apply a single action to `table`. An action either fully applies or
    /// leaves the table as it was.
    fn apply<'a>(&'a self, table: &'a str, action: &'a Action)
    -> BoxFuture<'a, Result<(), Self::Error>>;

    /// Whether the underlying connection is gone, so that further actions
    /// cannot succeed.
    fn is_closed(&self) -> bool {
        false
    }
}
