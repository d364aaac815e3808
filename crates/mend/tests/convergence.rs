//! Reconciliation converges and is idempotent, checked against an in-memory
//! table that applies actions the way Postgres would.

use mend::{
    Action, BoxFuture, ColumnSpec, Generated, KeyRole, Observed, SchemaBackend, SqlType,
    TableRef, TableSchema, diff, reconcile_table,
};
use proptest::prelude::*;
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct MemoryError(String);

#[derive(Default)]
struct MemoryBackend {
    table: Mutex<Option<TableSchema>>,
}

impl MemoryBackend {
    fn with_table(table: Option<TableSchema>) -> Self {
        Self {
            table: Mutex::new(table),
        }
    }

    fn snapshot(&self) -> Option<TableSchema> {
        self.table.lock().unwrap().clone()
    }
}

fn stored(col: &ColumnSpec) -> ColumnSpec {
    let mut col = col.clone();
    col.renamed_from.clear();
    col
}

/// Run the constraint drops an action renders. The scope of each drop is
/// read back from its catalog filter: with a column name it only hits that
/// column's key, without one it hits whichever column holds the role.
fn release_keys(live: &mut TableSchema, action: &Action) {
    let table = TableRef::new("public", &live.name);
    for stmt in action.to_sql(&table) {
        if !stmt.contains("DROP CONSTRAINT") {
            continue;
        }
        let role = if stmt.contains("c.contype = 'p'") {
            KeyRole::Primary
        } else {
            KeyRole::Unique
        };
        let column = stmt
            .split("a.attname = '")
            .nth(1)
            .and_then(|rest| rest.split('\'').next());
        for col in &mut live.columns {
            if col.key == role && column.is_none_or(|name| name == col.name) {
                col.key = KeyRole::None;
            }
        }
    }
}

fn apply(table: &mut Option<TableSchema>, action: &Action) -> Result<(), MemoryError> {
    let err = |msg: String| Err(MemoryError(msg));

    if let Action::CreateTable(expected) = action {
        if table.is_some() {
            return err(format!("relation \"{}\" already exists", expected.name));
        }
        let mut created = TableSchema::new(&expected.name);
        created.columns = expected.columns.iter().map(stored).collect();
        *table = Some(created);
        return Ok(());
    }

    let Some(live) = table.as_mut() else {
        return err("relation does not exist".into());
    };

    match action {
        Action::CreateTable(_) => unreachable!(),
        Action::RenameColumn { from, to } => {
            if live.contains(to) {
                return err(format!("column \"{to}\" already exists"));
            }
            match live.columns.iter_mut().find(|c| c.name == from.name) {
                Some(col) => col.name = to.clone(),
                None => return err(format!("column \"{}\" does not exist", from.name)),
            }
        }
        Action::DropColumn(col) => {
            let Some(pos) = live.position(&col.name) else {
                return err(format!("column \"{}\" does not exist", col.name));
            };
            live.columns.remove(pos);
        }
        Action::AddColumn { column, .. } => {
            if live.contains(&column.name) {
                return err(format!("column \"{}\" already exists", column.name));
            }
            release_keys(live, action);
            // no AFTER in Postgres: appended
            live.columns.push(stored(column));
        }
        Action::ModifyColumn { from, to } => {
            release_keys(live, action);
            if to.key == KeyRole::Primary
                && live
                    .columns
                    .iter()
                    .any(|c| c.name != to.name && c.key == KeyRole::Primary)
            {
                return err("multiple primary keys are not allowed".into());
            }
            let Some(col) = live.columns.iter_mut().find(|c| c.name == to.name) else {
                return err(format!("column \"{}\" does not exist", to.name));
            };
            // only what differs is touched, as the rendered ALTERs do
            if from.sql_type != to.sql_type {
                col.sql_type = to.sql_type.clone();
            }
            if from.nullable != to.nullable {
                col.nullable = to.nullable;
            }
            if from.generated != to.generated {
                col.generated = to.generated;
            }
            if from.key != to.key && to.key != KeyRole::None {
                col.key = to.key;
            }
        }
    }
    Ok(())
}

impl SchemaBackend for MemoryBackend {
    type Error = MemoryError;

    fn describe<'a>(
        &'a self,
        _table: &'a str,
    ) -> BoxFuture<'a, Result<Option<TableSchema>, MemoryError>> {
        Box::pin(async move { Ok(self.snapshot()) })
    }

    fn apply<'a>(
        &'a self,
        _table: &'a str,
        action: &'a Action,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move { apply(&mut self.table.lock().unwrap(), action) })
    }
}

const NAMES: &[&str] = &[
    "id",
    "guarantee_number",
    "anti_fake_code",
    "beneficiary",
    "applicant",
    "guarantee_amount",
    "expiry_date",
    "guarantee_period",
    "guarantor",
    "legacy_field",
    "created_at",
    "updated_at",
];

fn sql_type() -> impl Strategy<Value = SqlType> {
    prop_oneof![
        Just(SqlType::Integer),
        Just(SqlType::BigInt),
        Just(SqlType::Text),
        (1u32..300).prop_map(SqlType::Varchar),
        Just(SqlType::Decimal {
            precision: 15,
            scale: 2
        }),
        Just(SqlType::Date),
        Just(SqlType::Timestamp),
    ]
}

fn generated() -> impl Strategy<Value = Generated> {
    prop_oneof![
        4 => Just(Generated::None),
        1 => Just(Generated::Identity),
        1 => Just(Generated::DefaultNow),
        1 => Just(Generated::DefaultNowOnUpdate),
    ]
}

fn key() -> impl Strategy<Value = KeyRole> {
    prop_oneof![
        4 => Just(KeyRole::None),
        1 => Just(KeyRole::Primary),
        1 => Just(KeyRole::Unique),
    ]
}

/// A table that passes validation: one primary key at most, generated
/// values on compatible types.
fn table() -> impl Strategy<Value = TableSchema> {
    proptest::sample::subsequence(NAMES, 1..NAMES.len())
        .prop_flat_map(|names| {
            let n = names.len();
            let column = (sql_type(), any::<bool>(), key(), generated());
            (Just(names), proptest::collection::vec(column, n))
        })
        .prop_map(|(names, shapes)| {
            let mut table = TableSchema::new("guarantees");
            let mut has_primary = false;
            for (name, (sql_type, nullable, key, generated)) in names.into_iter().zip(shapes) {
                let mut col = ColumnSpec::new(name, sql_type);
                col.nullable = nullable;
                col.generated = generated;
                col.key = key;
                match generated {
                    Generated::Identity => {
                        col.sql_type = SqlType::Integer;
                        col.nullable = false;
                    }
                    Generated::DefaultNow | Generated::DefaultNowOnUpdate => {
                        col.sql_type = SqlType::Timestamp;
                    }
                    Generated::None => {}
                }
                if col.key == KeyRole::Primary {
                    if has_primary {
                        col.key = KeyRole::Unique;
                    } else {
                        has_primary = true;
                        col.nullable = false;
                    }
                }
                table.columns.push(col);
            }
            table
        })
}

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(fut)
}

fn expected_with_rename(mut expected: TableSchema) -> TableSchema {
    if let Some(col) = expected.columns.iter_mut().find(|c| c.name == "expiry_date") {
        if !col.renamed_from.iter().any(|a| a == "guarantee_period") {
            col.renamed_from.push("guarantee_period".into());
        }
    }
    if expected.contains("guarantee_period") {
        // would collide with the alias
        expected.columns.retain(|c| c.name != "guarantee_period");
    }
    expected
}

proptest! {
    #[test]
    fn reconciling_converges(expected in table(), observed in proptest::option::of(table())) {
        let expected = expected_with_rename(expected);
        prop_assume!(!expected.columns.is_empty());
        prop_assert_eq!(expected.validate(), Ok(()));

        let backend = MemoryBackend::with_table(observed);
        let report = block_on(reconcile_table(&backend, &expected)).unwrap();
        prop_assert!(report.is_clean(), "{}", report);

        // same name set, every column in its expected shape
        let live = backend.snapshot().unwrap();
        let mut live_names: Vec<_> = live.column_names().collect();
        let mut expected_names: Vec<_> = expected.column_names().collect();
        live_names.sort();
        expected_names.sort();
        prop_assert_eq!(live_names, expected_names);
        for col in &expected.columns {
            let got = live.get(&col.name).unwrap();
            prop_assert!(col.same_shape(got), "{} vs {}", col, got);
        }

        // idempotent
        let again = diff(&expected, &Observed::Found(live));
        prop_assert!(again.is_empty(), "{}", again);
        let second = block_on(reconcile_table(&backend, &expected)).unwrap();
        prop_assert!(second.actions.is_empty());
    }
}

#[test]
fn legacy_table_converges_in_one_pass() {
    let expected = TableSchema::new("guarantees")
        .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
        .column(
            ColumnSpec::new("guarantee_number", SqlType::Varchar(255))
                .not_null()
                .unique(),
        )
        .column(
            ColumnSpec::new("expiry_date", SqlType::Date)
                .not_null()
                .renamed_from("guarantee_period"),
        )
        .column(ColumnSpec::new("guarantor", SqlType::Varchar(255)).not_null());

    let legacy = TableSchema::new("guarantees")
        .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
        .column(ColumnSpec::new("guarantee_number", SqlType::Varchar(255)).not_null())
        .column(ColumnSpec::new("guarantee_period", SqlType::Date).not_null())
        .column(ColumnSpec::new("legacy_field", SqlType::Text))
        .column(ColumnSpec::new("guarantor", SqlType::Varchar(100)));

    let backend = MemoryBackend::with_table(Some(legacy));
    let report = block_on(reconcile_table(&backend, &expected)).unwrap();
    let applied: Vec<String> = report.actions.iter().map(|r| r.action.to_string()).collect();
    assert_eq!(
        applied,
        vec![
            "~ rename guarantee_period -> expiry_date",
            "- legacy_field",
            "~ guarantee_number: varchar(255) NOT NULL -> varchar(255) NOT NULL UNIQUE",
            "~ guarantor: varchar(100) -> varchar(255) NOT NULL",
        ]
    );
    assert!(report.is_clean());

    let again = block_on(reconcile_table(&backend, &expected)).unwrap();
    assert!(again.actions.is_empty());
}

#[test]
fn primary_key_moves_to_added_column() {
    let expected = TableSchema::new("guarantees")
        .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
        .column(
            ColumnSpec::new("guarantee_number", SqlType::Varchar(255))
                .not_null()
                .unique(),
        )
        .column(ColumnSpec::new("guarantor", SqlType::Varchar(255)).not_null());

    let live = TableSchema::new("guarantees")
        .column(
            ColumnSpec::new("guarantee_number", SqlType::Varchar(255))
                .not_null()
                .primary_key(),
        )
        .column(ColumnSpec::new("guarantor", SqlType::Varchar(255)).not_null());

    let backend = MemoryBackend::with_table(Some(live));
    let report = block_on(reconcile_table(&backend, &expected)).unwrap();
    assert!(report.is_clean(), "{report}");

    let live = backend.snapshot().unwrap();
    assert_eq!(live.get("id").unwrap().key, KeyRole::Primary);
    assert_eq!(live.get("guarantee_number").unwrap().key, KeyRole::Unique);

    let again = block_on(reconcile_table(&backend, &expected)).unwrap();
    assert!(again.actions.is_empty(), "{again}");
}
