use crate::backend::{BoxFuture, SchemaBackend};
use crate::introspect::describe_table;
use crate::schema::TableRef;
use crate::{Action, Connection, ConnectionExt};
use mend_db_schema::TableSchema;

/// Postgres implementation of [`SchemaBackend`] over any [`Connection`].
///
/// Tables are looked up and altered inside `namespace` (`public` unless
/// configured otherwise).
pub struct PgBackend<'a, C: Connection> {
    conn: &'a C,
    namespace: String,
}

impl<'a, C: Connection> PgBackend<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self::with_namespace(conn, "public")
    }

    pub fn with_namespace(conn: &'a C, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn table_ref(&self, table: &str) -> TableRef {
        TableRef::new(&self.namespace, table)
    }
}

impl<C: Connection> SchemaBackend for PgBackend<'_, C> {
    type Error = tokio_postgres::Error;

    fn describe<'a>(
        &'a self,
        table: &'a str,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, Self::Error>> {
        Box::pin(async move { describe_table(self.conn, &self.table_ref(table)).await })
    }

    fn apply<'a>(
        &'a self,
        table: &'a str,
        action: &'a Action,
    ) -> BoxFuture<'a, Result<(), Self::Error>> {
        Box::pin(async move {
            // one batch per action: Postgres runs it as a single implicit
            // transaction, so a failing statement undoes the whole action
            let sql = action.to_sql(&self.table_ref(table)).join("\n");
            self.conn.traced().batch_execute(&sql).await
        })
    }

    fn is_closed(&self) -> bool {
        self.conn.is_closed()
    }
}
