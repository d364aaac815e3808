//! Guarantee records on top of a reconciled connection.

use crate::record::{Guarantee, NewGuarantee, generate_anti_fake_code};
use crate::schema::TABLE;
use crate::{Error, Result};
use mend::{Connection, ConnectionExt, TableRef};
use std::future::Future;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

/// How many codes are drawn before giving up on finding a free one.
const CODE_ATTEMPTS: usize = 8;

/// Result of [`GuaranteeStore::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: i32,
    pub anti_fake_code: String,
}

pub struct GuaranteeStore<'a, C: Connection> {
    conn: &'a C,
    table: String,
}

impl<'a, C: Connection> GuaranteeStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self::with_namespace(conn, "public")
    }

    pub fn with_namespace(conn: &'a C, namespace: &str) -> Self {
        Self {
            conn,
            table: TableRef::new(namespace, TABLE).qualified(),
        }
    }

    /// Newest first.
    pub async fn list(&self, limit: i64) -> Result<Vec<Guarantee>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY created_at DESC NULLS LAST, id DESC LIMIT $1",
            Guarantee::COLUMNS,
            self.table
        );
        let rows = self.conn.traced().query(&sql, &[&limit]).await?;
        Ok(rows
            .iter()
            .map(Guarantee::from_row)
            .collect::<std::result::Result<_, _>>()?)
    }

    pub async fn get(&self, id: i32) -> Result<Option<Guarantee>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1",
            Guarantee::COLUMNS,
            self.table
        );
        self.fetch_one(&sql, &[&id]).await
    }

    pub async fn get_by_number(&self, number: &str) -> Result<Option<Guarantee>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE guarantee_number = $1",
            Guarantee::COLUMNS,
            self.table
        );
        self.fetch_one(&sql, &[&number]).await
    }

    /// The public lookup: `None` unless both the number and the code match.
    pub async fn verify(&self, number: &str, anti_fake_code: &str) -> Result<Option<Guarantee>> {
        if number.trim().is_empty() {
            return Err(Error::MissingField("guarantee_number"));
        }
        if anti_fake_code.trim().is_empty() {
            return Err(Error::MissingField("anti_fake_code"));
        }
        let sql = format!(
            "SELECT {} FROM {} WHERE guarantee_number = $1 AND anti_fake_code = $2",
            Guarantee::COLUMNS,
            self.table
        );
        self.fetch_one(&sql, &[&number.trim(), &anti_fake_code.trim()])
            .await
    }

    /// Insert a guarantee, generating its anti-fake code when none is given.
    pub async fn create(&self, new: &NewGuarantee) -> Result<Created> {
        new.validate()?;
        if self.number_exists(&new.guarantee_number).await? {
            return Err(Error::DuplicateNumber(new.guarantee_number.clone()));
        }

        let code = match new.given_code() {
            Some(code) => code.to_string(),
            None => self.fresh_code().await?,
        };

        let sql = format!(
            "INSERT INTO {} (guarantee_number, anti_fake_code, beneficiary, applicant, \
             project_name, guarantee_amount, expiry_date, guarantor) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
            self.table
        );
        let row = self
            .conn
            .traced()
            .query_one(
                &sql,
                &[
                    &new.guarantee_number,
                    &code,
                    &new.beneficiary,
                    &new.applicant,
                    &new.project_name,
                    &new.guarantee_amount,
                    &new.expiry_date,
                    &new.guarantor,
                ],
            )
            .await
            .map_err(|e| duplicate_or(e, &new.guarantee_number))?;

        let id: i32 = row.try_get(0)?;
        tracing::info!(id, number = %new.guarantee_number, "guarantee created");
        Ok(Created {
            id,
            anti_fake_code: code,
        })
    }

    /// Replace the guarantee currently numbered `number`. The number itself
    /// may change; the anti-fake code is kept when `update` carries none.
    pub async fn update_by_number(&self, number: &str, update: &NewGuarantee) -> Result<()> {
        update.validate()?;
        if update.guarantee_number != number && self.number_exists(&update.guarantee_number).await? {
            return Err(Error::DuplicateNumber(update.guarantee_number.clone()));
        }
        if self.update_where("guarantee_number", &number, update).await? == 0 {
            return Err(Error::NotFound(number.to_string()));
        }
        Ok(())
    }

    /// Replace the guarantee with the given id, as [`update_by_number`](Self::update_by_number) does.
    pub async fn update(&self, id: i32, update: &NewGuarantee) -> Result<()> {
        update.validate()?;
        if self.update_where("id", &id, update).await? == 0 {
            return Err(Error::NotFound(format!("#{id}")));
        }
        Ok(())
    }

    pub async fn delete_by_number(&self, number: &str) -> Result<()> {
        if self.delete_where("guarantee_number", &number).await? == 0 {
            return Err(Error::NotFound(number.to_string()));
        }
        tracing::info!(number, "guarantee deleted");
        Ok(())
    }

    pub async fn delete(&self, id: i32) -> Result<()> {
        if self.delete_where("id", &id).await? == 0 {
            return Err(Error::NotFound(format!("#{id}")));
        }
        tracing::info!(id, "guarantee deleted");
        Ok(())
    }

    async fn update_where(
        &self,
        column: &str,
        key: &(dyn ToSql + Sync),
        update: &NewGuarantee,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET guarantee_number = $1, anti_fake_code = COALESCE($2, anti_fake_code), \
             beneficiary = $3, applicant = $4, project_name = $5, guarantee_amount = $6, \
             expiry_date = $7, guarantor = $8 WHERE {column} = $9",
            self.table
        );
        let code = update.given_code();
        self.conn
            .traced()
            .execute(
                &sql,
                &[
                    &update.guarantee_number,
                    &code,
                    &update.beneficiary,
                    &update.applicant,
                    &update.project_name,
                    &update.guarantee_amount,
                    &update.expiry_date,
                    &update.guarantor,
                    key,
                ],
            )
            .await
            .map_err(|e| duplicate_or(e, &update.guarantee_number))
    }

    async fn delete_where(&self, column: &str, key: &(dyn ToSql + Sync)) -> Result<u64> {
        let sql = format!("DELETE FROM {} WHERE {column} = $1", self.table);
        Ok(self.conn.traced().execute(&sql, &[key]).await?)
    }

    async fn fetch_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<Guarantee>> {
        match self.conn.traced().query_opt(sql, params).await? {
            Some(row) => Ok(Some(Guarantee::from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn number_exists(&self, number: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE guarantee_number = $1)",
            self.table
        );
        let row = self.conn.traced().query_one(&sql, &[&number]).await?;
        Ok(row.try_get(0)?)
    }

    async fn fresh_code(&self) -> Result<String> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE anti_fake_code = $1)",
            self.table
        );
        let sql = sql.as_str();
        first_free_code(
            || generate_anti_fake_code(&mut rand::thread_rng()),
            |code| async move {
                let row = self.conn.traced().query_one(sql, &[&code]).await?;
                Ok::<_, Error>(row.try_get::<_, bool>(0)?)
            },
        )
        .await
    }
}

/// Draw codes until `taken` reports one as free, at most [`CODE_ATTEMPTS`] times.
async fn first_free_code<D, T, F>(mut draw: D, mut taken: T) -> Result<String>
where
    D: FnMut() -> String,
    T: FnMut(String) -> F,
    F: Future<Output = Result<bool>>,
{
    for attempt in 1..=CODE_ATTEMPTS {
        let code = draw();
        if !taken(code.clone()).await? {
            return Ok(code);
        }
        tracing::debug!(attempt, "anti-fake code collision, drawing again");
    }
    Err(Error::NoFreeCode(CODE_ATTEMPTS))
}

fn duplicate_or(e: tokio_postgres::Error, number: &str) -> Error {
    let on_number = e.as_db_error().is_some_and(|db| {
        *db.code() == SqlState::UNIQUE_VIOLATION
            && db.constraint().is_some_and(|c| c.contains("guarantee_number"))
    });
    if on_number {
        // another writer got there first
        Error::DuplicateNumber(number.to_string())
    } else {
        Error::Postgres(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_first_free_code_skips_taken() {
        let mut codes = ["aaaaaa", "bbbbbb", "cccccc"].into_iter();
        let checked = RefCell::new(Vec::new());
        let code = first_free_code(
            || codes.next().unwrap().to_string(),
            |code| {
                checked.borrow_mut().push(code.clone());
                async move { Ok::<_, Error>(code != "cccccc") }
            },
        )
        .await
        .unwrap();
        assert_eq!(code, "cccccc");
        assert_eq!(checked.into_inner(), vec!["aaaaaa", "bbbbbb", "cccccc"]);
    }

    #[tokio::test]
    async fn test_first_free_code_checks_every_draw() {
        let mut draws = 0;
        let err = first_free_code(
            || {
                draws += 1;
                format!("code{draws:02}")
            },
            |_| async { Ok::<_, Error>(true) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::NoFreeCode(CODE_ATTEMPTS)));
        assert_eq!(draws, CODE_ATTEMPTS);
    }
}
