//! DDL building blocks shared by the action renderers.
//!
//! Everything here produces PostgreSQL statements without a trailing newline;
//! callers join them into a batch.

use crate::{quote_ident, quote_literal};
use mend_db_schema::{ColumnSpec, Generated, KeyRole, TableSchema};

/// A table name together with the namespace it lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub namespace: String,
    pub name: String,
}

impl TableRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `"namespace"."name"`
    pub fn qualified(&self) -> String {
        format!("{}.{}", quote_ident(&self.namespace), quote_ident(&self.name))
    }

    /// Name Postgres gives an inline primary key: `<table>_pkey`.
    pub fn primary_key_constraint(&self) -> String {
        format!("{}_pkey", self.name)
    }

    /// Name Postgres gives an inline unique constraint: `<table>_<column>_key`.
    pub fn unique_constraint(&self, column: &str) -> String {
        format!("{}_{}_key", self.name, column)
    }

    /// Name of the trigger (and its function) that refreshes an on-update
    /// timestamp column.
    pub fn on_update_trigger(&self, column: &str) -> String {
        format!("{}_{}_on_update", self.name, column)
    }

    fn on_update_function(&self, column: &str) -> String {
        format!(
            "{}.{}",
            quote_ident(&self.namespace),
            quote_ident(&self.on_update_trigger(column))
        )
    }

    pub(crate) fn alter(&self) -> String {
        format!("ALTER TABLE {}", self.qualified())
    }
}

/// The default expression a column carries because of how it is generated.
fn generated_default(col: &ColumnSpec) -> Option<&'static str> {
    if col.generated.has_default_now() {
        Some("CURRENT_TIMESTAMP")
    } else {
        None
    }
}

/// Column definition as used in `CREATE TABLE` and `ADD COLUMN`.
///
/// Primary keys are declared inline, so Postgres names the constraint
/// `<table>_pkey`; unique columns likewise get `<table>_<column>_key`.
pub fn column_definition(col: &ColumnSpec) -> String {
    column_definition_with_default(col, generated_default(col))
}

pub(crate) fn column_definition_with_default(col: &ColumnSpec, default: Option<&str>) -> String {
    let mut def = format!("{} {}", quote_ident(&col.name), col.sql_type.to_sql());

    if col.generated == Generated::Identity {
        def.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    }

    // PRIMARY KEY already implies NOT NULL
    if !col.nullable && col.key != KeyRole::Primary {
        def.push_str(" NOT NULL");
    }

    if let Some(default) = default {
        def.push_str(&format!(" DEFAULT {}", default));
    }

    match col.key {
        KeyRole::Primary => def.push_str(" PRIMARY KEY"),
        KeyRole::Unique => def.push_str(" UNIQUE"),
        KeyRole::None => {}
    }

    def
}

/// `CREATE TABLE` plus the triggers for on-update columns.
pub fn create_table_sql(table_ref: &TableRef, table: &TableSchema) -> Vec<String> {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|col| format!("    {}", column_definition(col)))
        .collect();

    let mut statements = vec![format!(
        "CREATE TABLE {} (\n{}\n);",
        table_ref.qualified(),
        columns.join(",\n")
    )];

    for col in &table.columns {
        if col.generated == Generated::DefaultNowOnUpdate {
            statements.extend(on_update_trigger_sql(table_ref, &col.name));
        }
    }

    statements
}

/// Function and trigger that set `column` to the current time on every update.
pub fn on_update_trigger_sql(table_ref: &TableRef, column: &str) -> Vec<String> {
    let function = table_ref.on_update_function(column);
    let trigger = quote_ident(&table_ref.on_update_trigger(column));
    vec![
        format!(
            "CREATE OR REPLACE FUNCTION {}() RETURNS trigger LANGUAGE plpgsql AS $$\n\
             BEGIN\n    \
                 NEW.{} := CURRENT_TIMESTAMP;\n    \
                 RETURN NEW;\n\
             END;\n\
             $$;",
            function,
            quote_ident(column)
        ),
        format!(
            "DROP TRIGGER IF EXISTS {} ON {};",
            trigger,
            table_ref.qualified()
        ),
        format!(
            "CREATE TRIGGER {} BEFORE UPDATE ON {} FOR EACH ROW EXECUTE FUNCTION {}();",
            trigger,
            table_ref.qualified(),
            function
        ),
    ]
}

/// Remove the on-update trigger of `column` and its function.
pub fn drop_on_update_trigger_sql(table_ref: &TableRef, column: &str) -> Vec<String> {
    vec![
        format!(
            "DROP TRIGGER IF EXISTS {} ON {};",
            quote_ident(&table_ref.on_update_trigger(column)),
            table_ref.qualified()
        ),
        format!(
            "DROP FUNCTION IF EXISTS {}();",
            table_ref.on_update_function(column)
        ),
    ]
}

/// Drop the constraint that makes `column` a key with the given role,
/// whatever it happens to be called.
///
/// Tables created outside mend may use their own constraint names, so the
/// name is looked up in `pg_constraint` rather than assumed. Only a
/// constraint led by `column` is dropped; a key held by another column is
/// left alone.
pub fn drop_key_sql(table_ref: &TableRef, column: &str, role: KeyRole) -> Option<String> {
    let contype = match role {
        KeyRole::None => return None,
        KeyRole::Primary => "c.contype = 'p'",
        KeyRole::Unique => "c.contype = 'u' AND array_length(c.conkey, 1) = 1",
    };
    Some(drop_constraints_sql(
        table_ref,
        &format!("{contype} AND a.attname = {}", quote_literal(column)),
    ))
}

/// Drop the table's primary key, whichever column holds it.
pub fn drop_primary_key_sql(table_ref: &TableRef) -> String {
    drop_constraints_sql(table_ref, "c.contype = 'p'")
}

fn drop_constraints_sql(table_ref: &TableRef, filter: &str) -> String {
    let table = quote_literal(&table_ref.qualified());
    format!(
        "DO $$\n\
         DECLARE con name;\n\
         BEGIN\n    \
             FOR con IN\n        \
                 SELECT c.conname FROM pg_constraint c\n        \
                 JOIN pg_attribute a ON a.attrelid = c.conrelid AND a.attnum = c.conkey[1]\n        \
                 WHERE c.conrelid = {table}::regclass AND {filter}\n    \
             LOOP\n        \
                 EXECUTE format('ALTER TABLE %s DROP CONSTRAINT %I', {table}::regclass, con);\n    \
             END LOOP;\n\
         END $$;",
    )
}
