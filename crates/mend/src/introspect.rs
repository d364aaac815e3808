//! Read the live definition of a table.
//!
//! Columns come from `information_schema.columns`, key roles from single
//! column `PRIMARY KEY` / `UNIQUE` constraints, and on-update behaviour from
//! the presence of the conventionally named trigger. All catalog values are
//! cast to plain `text` / `int4` so they decode without the information_schema
//! domain types.

use crate::schema::TableRef;
use crate::{Connection, ConnectionExt, Error, SchemaBackend};
use indexmap::IndexMap;
use mend_db_schema::{ColumnSpec, Generated, KeyRole, SqlType, TableSchema};

/// What the database reports for a table.
#[derive(Debug, Clone, PartialEq)]
pub enum Observed {
    NotFound,
    Found(TableSchema),
}

impl Observed {
    pub fn table(&self) -> Option<&TableSchema> {
        match self {
            Observed::NotFound => None,
            Observed::Found(table) => Some(table),
        }
    }
}

/// Read the current definition of `table` through `backend`.
pub async fn inspect<B: SchemaBackend>(backend: &B, table: &str) -> Result<Observed, Error> {
    match backend.describe(table).await {
        Ok(Some(live)) => Ok(Observed::Found(live)),
        Ok(None) => Ok(Observed::NotFound),
        Err(e) => Err(Error::InspectionFailed {
            table: table.to_string(),
            source: Box::new(e),
        }),
    }
}

/// One row of `information_schema.columns`, as far as mend cares.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawColumn {
    pub name: String,
    pub data_type: String,
    pub char_max_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_identity: bool,
}

/// Strip trailing `::type` casts and surrounding parentheses from a default
/// expression, lowercased.
fn bare_default(expr: &str) -> String {
    let mut expr = expr.trim().to_ascii_lowercase();
    loop {
        let cast = expr.rfind("::").filter(|&idx| {
            let suffix = &expr[idx..];
            !suffix.contains('\'') && suffix.matches('(').count() == suffix.matches(')').count()
        });
        if let Some(idx) = cast {
            expr = expr[..idx].trim_end().to_string();
        } else if expr.starts_with('(') && expr.ends_with(')') {
            expr = expr[1..expr.len() - 1].trim().to_string();
        } else {
            return expr;
        }
    }
}

fn is_now_default(expr: &str) -> bool {
    let bare = bare_default(expr);
    matches!(
        bare.as_str(),
        "current_timestamp" | "now()" | "localtimestamp" | "transaction_timestamp()"
    ) || bare.starts_with("current_timestamp(")
}

/// Build a column spec from its catalog row.
///
/// `has_on_update_trigger` tells whether the refresh trigger for this column
/// exists; it only matters for columns defaulting to the current time.
pub fn column_from_raw(raw: &RawColumn, key: KeyRole, has_on_update_trigger: bool) -> ColumnSpec {
    let sql_type = SqlType::from_information_schema(
        &raw.data_type,
        raw.char_max_length,
        raw.numeric_precision,
        raw.numeric_scale,
    );

    let default = raw.column_default.as_deref();
    let generated = if raw.is_identity || default.is_some_and(|d| d.trim_start().starts_with("nextval(")) {
        Generated::Identity
    } else if default.is_some_and(is_now_default) {
        if has_on_update_trigger {
            Generated::DefaultNowOnUpdate
        } else {
            Generated::DefaultNow
        }
    } else {
        Generated::None
    };

    ColumnSpec {
        name: raw.name.clone(),
        sql_type,
        nullable: raw.is_nullable,
        key,
        generated,
        renamed_from: Vec::new(),
    }
}

const TABLE_EXISTS_SQL: &str = r#"
SELECT EXISTS (
    SELECT 1 FROM information_schema.tables
    WHERE table_schema::text = $1 AND table_name::text = $2
)
"#;

const COLUMNS_SQL: &str = r#"
SELECT
    column_name::text,
    data_type::text,
    character_maximum_length::int4,
    numeric_precision::int4,
    numeric_scale::int4,
    is_nullable::text,
    column_default::text,
    is_identity::text
FROM information_schema.columns
WHERE table_schema::text = $1 AND table_name::text = $2
ORDER BY ordinal_position
"#;

// Only keys made of exactly one column describe a column's own role.
const KEYS_SQL: &str = r#"
SELECT
    kcu.column_name::text,
    tc.constraint_type::text
FROM information_schema.table_constraints tc
JOIN information_schema.key_column_usage kcu
    ON tc.constraint_name = kcu.constraint_name
    AND tc.table_schema = kcu.table_schema
    AND tc.table_name = kcu.table_name
WHERE tc.table_schema::text = $1
    AND tc.table_name::text = $2
    AND tc.constraint_type IN ('PRIMARY KEY', 'UNIQUE')
    AND (
        SELECT COUNT(*) FROM information_schema.key_column_usage k2
        WHERE k2.constraint_name = tc.constraint_name
            AND k2.table_schema = tc.table_schema
            AND k2.table_name = tc.table_name
    ) = 1
"#;

const TRIGGERS_SQL: &str = r#"
SELECT DISTINCT trigger_name::text
FROM information_schema.triggers
WHERE event_object_schema::text = $1 AND event_object_table::text = $2
"#;

/// Query the catalog for the definition of `table_ref`.
///
/// Returns `Ok(None)` when the table does not exist.
pub async fn describe_table<C: Connection>(
    conn: &C,
    table_ref: &TableRef,
) -> Result<Option<TableSchema>, tokio_postgres::Error> {
    let conn = conn.traced();
    let params: [&(dyn tokio_postgres::types::ToSql + Sync); 2] =
        [&table_ref.namespace, &table_ref.name];

    let exists: bool = conn.query_one(TABLE_EXISTS_SQL, &params).await?.get(0);
    if !exists {
        return Ok(None);
    }

    let mut keys: IndexMap<String, KeyRole> = IndexMap::new();
    for row in conn.query(KEYS_SQL, &params).await? {
        let column: String = row.get(0);
        let role = match row.get::<_, String>(1).as_str() {
            "PRIMARY KEY" => KeyRole::Primary,
            _ => KeyRole::Unique,
        };
        let entry = keys.entry(column).or_default();
        // primary wins over unique
        if *entry != KeyRole::Primary {
            *entry = role;
        }
    }

    let triggers: Vec<String> = conn
        .query(TRIGGERS_SQL, &params)
        .await?
        .iter()
        .map(|row| row.get(0))
        .collect();

    let mut table = TableSchema::new(&table_ref.name);
    for row in conn.query(COLUMNS_SQL, &params).await? {
        let raw = RawColumn {
            name: row.get(0),
            data_type: row.get(1),
            char_max_length: row.get(2),
            numeric_precision: row.get(3),
            numeric_scale: row.get(4),
            is_nullable: row.get::<_, String>(5) == "YES",
            column_default: row.get(6),
            is_identity: row.get::<_, Option<String>>(7).as_deref() == Some("YES"),
        };
        let key = keys.get(&raw.name).copied().unwrap_or_default();
        let has_trigger = triggers.contains(&table_ref.on_update_trigger(&raw.name));
        table.columns.push(column_from_raw(&raw, key, has_trigger));
    }

    Ok(Some(table))
}
