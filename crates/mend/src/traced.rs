//! Statement logging for everything mend and its callers send to Postgres.

use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, Error, Row};
use tracing::Instrument;

/// Anything that hands out a live [`Client`]: a bare client, or a pooled
/// `deadpool_postgres::Object`.
pub trait Connection: Send + Sync {
    fn client(&self) -> &Client;

    /// Whether the connection to the server has been closed.
    fn is_closed(&self) -> bool {
        self.client().is_closed()
    }
}

impl Connection for Client {
    fn client(&self) -> &Client {
        self
    }
}

impl Connection for deadpool_postgres::Object {
    fn client(&self) -> &Client {
        self
    }
}

/// Borrowed connection that wraps each statement in a `tracing` debug span.
///
/// ```ignore
/// use mend::ConnectionExt;
///
/// let rows = conn.traced().query("SELECT id FROM guarantees", &[]).await?;
/// ```
pub struct TracedConn<'a, C: Connection + ?Sized> {
    conn: &'a C,
}

impl<'a, C: Connection + ?Sized> TracedConn<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Returns the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<u64, Error> {
        let span = tracing::debug_span!(
            "db.execute",
            sql = %sql,
            params = params.len(),
            affected = tracing::field::Empty,
        );
        let affected = self
            .conn
            .client()
            .execute(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("affected", affected);
        Ok(affected)
    }

    /// Semicolon-separated statements without parameters. Postgres runs the
    /// whole batch as one implicit transaction.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), Error> {
        let span = tracing::debug_span!("db.batch", sql = %sql);
        self.conn.client().batch_execute(sql).instrument(span).await
    }

    pub async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let rows = self
            .conn
            .client()
            .query(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", rows.len());
        Ok(rows)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Row>, Error> {
        let span = tracing::debug_span!(
            "db.query",
            sql = %sql,
            params = params.len(),
            rows = tracing::field::Empty,
        );
        let row = self
            .conn
            .client()
            .query_opt(sql, params)
            .instrument(span.clone())
            .await?;
        span.record("rows", row.iter().len());
        Ok(row)
    }

    /// Fails unless exactly one row comes back.
    pub async fn query_one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row, Error> {
        let span = tracing::debug_span!("db.query", sql = %sql, params = params.len(), rows = 1u64);
        self.conn.client().query_one(sql, params).instrument(span).await
    }
}

/// Adds [`traced`](ConnectionExt::traced) to every [`Connection`].
pub trait ConnectionExt: Connection {
    fn traced(&self) -> TracedConn<'_, Self> {
        TracedConn::new(self)
    }
}

impl<C: Connection + ?Sized> ConnectionExt for C {}
