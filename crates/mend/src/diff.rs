//! Compare an expected table against what the database reports.
//!
//! [`diff`] walks a fixed sequence of rules and produces the actions needed to
//! bring the live table in line:
//!
//! 1. a missing table is created whole, and nothing else happens;
//! 2. columns whose former name (`renamed_from`) is still in the table are
//!    renamed;
//! 3. columns nobody declares anymore are dropped;
//! 4. declared columns that are missing are added;
//! 5. surviving columns whose shape differs are modified.
//!
//! Drops run before adds and modifies, so a column being removed never holds
//! a key or a name that a later action needs. Among modifies, the ones that
//! release a key go first.
//!
//! ```text
//! guarantees:
//!   - legacy_field
//!   + expiry_date: date NOT NULL (after project_name)
//!   ~ guarantor: varchar(100) -> varchar(255) NOT NULL
//! ```

use crate::Observed;
use crate::quote_ident;
use crate::schema::{self, TableRef};
use mend_db_schema::{ColumnSpec, Generated, KeyRole, TableSchema};
use std::collections::HashSet;

/// One step towards the expected table.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Create the table with all expected columns.
    CreateTable(TableSchema),
    /// Rename a column to the name it is now declared under. `from` is the
    /// observed column, under its old name.
    RenameColumn { from: ColumnSpec, to: String },
    /// Drop a column nobody declares. Carries the observed column.
    DropColumn(ColumnSpec),
    /// Add a missing column. `after` is the expected column preceding it.
    AddColumn {
        column: ColumnSpec,
        after: Option<String>,
    },
    /// Bring a surviving column from its observed shape to the expected one.
    ModifyColumn { from: ColumnSpec, to: ColumnSpec },
}

impl Action {
    /// The column this action is about, if any.
    pub fn column_name(&self) -> Option<&str> {
        match self {
            Action::CreateTable(_) => None,
            Action::RenameColumn { to, .. } => Some(to),
            Action::DropColumn(col) => Some(&col.name),
            Action::AddColumn { column, .. } => Some(&column.name),
            Action::ModifyColumn { to, .. } => Some(&to.name),
        }
    }

    /// Rank used to order modifies: primary key releases, then other key
    /// releases, then everything else.
    fn release_rank(&self) -> u8 {
        match self {
            Action::ModifyColumn { from, to } if from.key != to.key => match from.key {
                KeyRole::Primary => 0,
                KeyRole::Unique => 1,
                KeyRole::None => 2,
            },
            _ => 2,
        }
    }

    /// Render this action as PostgreSQL statements, in execution order.
    pub fn to_sql(&self, table: &TableRef) -> Vec<String> {
        match self {
            Action::CreateTable(expected) => schema::create_table_sql(table, expected),
            Action::RenameColumn { from, to } => rename_column_sql(table, from, to),
            Action::DropColumn(col) => {
                let mut stmts = Vec::new();
                if col.generated == Generated::DefaultNowOnUpdate {
                    stmts.extend(schema::drop_on_update_trigger_sql(table, &col.name));
                }
                stmts.push(format!(
                    "{} DROP COLUMN {};",
                    table.alter(),
                    quote_ident(&col.name)
                ));
                stmts
            }
            Action::AddColumn { column, .. } => add_column_sql(table, column),
            Action::ModifyColumn { from, to } => modify_column_sql(table, from, to),
        }
    }
}

/// The on-update trigger is bound to the old column name, so it is
/// reinstalled under the new one in the same batch.
fn rename_column_sql(table: &TableRef, from: &ColumnSpec, to: &str) -> Vec<String> {
    let on_update = from.generated == Generated::DefaultNowOnUpdate;
    let mut stmts = Vec::new();
    if on_update {
        stmts.extend(schema::drop_on_update_trigger_sql(table, &from.name));
    }
    stmts.push(format!(
        "{} RENAME COLUMN {} TO {};",
        table.alter(),
        quote_ident(&from.name),
        quote_ident(to)
    ));
    if on_update {
        stmts.extend(schema::on_update_trigger_sql(table, to));
    }
    stmts
}

fn add_column_sql(table: &TableRef, column: &ColumnSpec) -> Vec<String> {
    let alter = table.alter();
    let mut stmts = Vec::new();

    if column.key == KeyRole::Primary {
        stmts.push(schema::drop_primary_key_sql(table));
    }

    // Existing rows need a value for a NOT NULL column; hand them a zero
    // value and take the default away again.
    let fill = if !column.nullable && !column.generated.is_auto_generated() {
        column.sql_type.fill_value()
    } else {
        None
    };

    match fill {
        Some(fill) => {
            stmts.push(format!(
                "{alter} ADD COLUMN {};",
                schema::column_definition_with_default(column, Some(fill))
            ));
            stmts.push(format!(
                "{alter} ALTER COLUMN {} DROP DEFAULT;",
                quote_ident(&column.name)
            ));
        }
        None => stmts.push(format!(
            "{alter} ADD COLUMN {};",
            schema::column_definition(column)
        )),
    }

    if column.generated == Generated::DefaultNowOnUpdate {
        stmts.extend(schema::on_update_trigger_sql(table, &column.name));
    }

    stmts
}

fn modify_column_sql(table: &TableRef, from: &ColumnSpec, to: &ColumnSpec) -> Vec<String> {
    let alter = table.alter();
    let col = quote_ident(&to.name);
    let mut stmts = Vec::new();

    if from.key != to.key {
        stmts.extend(schema::drop_key_sql(table, &to.name, from.key));
    }

    let regenerate = from.generated != to.generated;
    if regenerate {
        if from.generated == Generated::Identity {
            stmts.push(format!("{alter} ALTER COLUMN {col} DROP IDENTITY IF EXISTS;"));
            // serial columns carry a nextval() default instead
            stmts.push(format!("{alter} ALTER COLUMN {col} DROP DEFAULT;"));
        }
        if from.generated.has_default_now() && !to.generated.has_default_now() {
            stmts.push(format!("{alter} ALTER COLUMN {col} DROP DEFAULT;"));
        }
        if from.generated == Generated::DefaultNowOnUpdate
            && to.generated != Generated::DefaultNowOnUpdate
        {
            stmts.extend(schema::drop_on_update_trigger_sql(table, &to.name));
        }
    }

    if from.sql_type != to.sql_type {
        let ty = to.sql_type.to_sql();
        stmts.push(format!(
            "{alter} ALTER COLUMN {col} TYPE {ty} USING {col}::{ty};"
        ));
    }

    if from.nullable != to.nullable {
        if to.nullable {
            stmts.push(format!("{alter} ALTER COLUMN {col} DROP NOT NULL;"));
        } else {
            let fill = match to.generated {
                Generated::Identity => None,
                Generated::DefaultNow | Generated::DefaultNowOnUpdate => Some("CURRENT_TIMESTAMP"),
                Generated::None => to.sql_type.fill_value(),
            };
            if let Some(fill) = fill {
                stmts.push(format!(
                    "UPDATE {} SET {col} = {fill} WHERE {col} IS NULL;",
                    table.qualified()
                ));
            }
            stmts.push(format!("{alter} ALTER COLUMN {col} SET NOT NULL;"));
        }
    }

    if regenerate {
        if to.generated == Generated::Identity {
            stmts.push(format!(
                "{alter} ALTER COLUMN {col} ADD GENERATED BY DEFAULT AS IDENTITY;"
            ));
            // start the sequence past the values already in the table
            stmts.push(format!(
                "SELECT setval(pg_get_serial_sequence({}, {}), COALESCE(MAX({col}), 0) + 1, false) FROM {};",
                crate::quote_literal(&table.qualified()),
                crate::quote_literal(&to.name),
                table.qualified()
            ));
        }
        if to.generated.has_default_now() && !from.generated.has_default_now() {
            stmts.push(format!(
                "{alter} ALTER COLUMN {col} SET DEFAULT CURRENT_TIMESTAMP;"
            ));
        }
        if to.generated == Generated::DefaultNowOnUpdate
            && from.generated != Generated::DefaultNowOnUpdate
        {
            stmts.extend(schema::on_update_trigger_sql(table, &to.name));
        }
    }

    if from.key != to.key {
        match to.key {
            KeyRole::Primary => stmts.push(format!(
                "{alter} ADD CONSTRAINT {} PRIMARY KEY ({col});",
                quote_ident(&table.primary_key_constraint())
            )),
            KeyRole::Unique => stmts.push(format!(
                "{alter} ADD CONSTRAINT {} UNIQUE ({col});",
                quote_ident(&table.unique_constraint(&to.name))
            )),
            KeyRole::None => {}
        }
    }

    stmts
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::CreateTable(t) => write!(f, "+ table {}", t.name),
            Action::RenameColumn { from, to } => write!(f, "~ rename {} -> {}", from.name, to),
            Action::DropColumn(col) => write!(f, "- {}", col.name),
            Action::AddColumn { column, after } => {
                let position = match after {
                    Some(prev) => format!("after {}", prev),
                    None => "first".to_string(),
                };
                write!(f, "+ {}: {} ({})", column.name, column.shape(), position)
            }
            Action::ModifyColumn { from, to } => {
                write!(f, "~ {}: {} -> {}", to.name, from.shape(), to.shape())
            }
        }
    }
}

/// The actions needed for one table, in the order they must run.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDiff {
    /// Table name.
    pub table: String,
    /// Actions, in execution order.
    pub actions: Vec<Action>,
}

impl TableDiff {
    /// Returns true if the live table already matches.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Render the whole diff as a SQL script, one commented block per action.
    pub fn to_sql(&self, namespace: &str) -> String {
        let table = TableRef::new(namespace, &self.table);
        let mut sql = format!("-- Table: {}\n", self.table);
        for action in &self.actions {
            sql.push_str(&format!("-- {}\n", action));
            for stmt in action.to_sql(&table) {
                sql.push_str(&stmt);
                sql.push('\n');
            }
        }
        sql
    }
}

impl std::fmt::Display for TableDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}:", self.table)?;
        for action in &self.actions {
            writeln!(f, "  {}", action)?;
        }
        Ok(())
    }
}

/// Compute the actions that turn `observed` into `expected`.
pub fn diff(expected: &TableSchema, observed: &Observed) -> TableDiff {
    let live = match observed {
        Observed::NotFound => {
            return TableDiff {
                table: expected.name.clone(),
                actions: vec![Action::CreateTable(expected.clone())],
            };
        }
        Observed::Found(live) => live,
    };

    let mut actions = Vec::new();

    // Renames: (expected column, observed column under its former name)
    let mut renamed: Vec<(&ColumnSpec, &ColumnSpec)> = Vec::new();
    let mut claimed: HashSet<&str> = HashSet::new();
    for exp in &expected.columns {
        if live.contains(&exp.name) {
            continue;
        }
        let former = exp.renamed_from.iter().find_map(|alias| {
            if expected.contains(alias) || claimed.contains(alias.as_str()) {
                return None;
            }
            live.get(alias)
        });
        if let Some(old) = former {
            claimed.insert(old.name.as_str());
            renamed.push((exp, old));
            actions.push(Action::RenameColumn {
                from: old.clone(),
                to: exp.name.clone(),
            });
        }
    }
    let renamed_to: HashSet<&str> = renamed.iter().map(|(exp, _)| exp.name.as_str()).collect();

    for col in &live.columns {
        if !expected.contains(&col.name) && !claimed.contains(col.name.as_str()) {
            actions.push(Action::DropColumn(col.clone()));
        }
    }

    for (i, exp) in expected.columns.iter().enumerate() {
        if live.contains(&exp.name) || renamed_to.contains(exp.name.as_str()) {
            continue;
        }
        let after = i
            .checked_sub(1)
            .map(|prev| expected.columns[prev].name.clone());
        actions.push(Action::AddColumn {
            column: exp.clone(),
            after,
        });
    }

    let mut modifies = Vec::new();
    for exp in &expected.columns {
        let current = match live.get(&exp.name) {
            Some(col) => col.clone(),
            None => match renamed.iter().find(|(e, _)| e.name == exp.name) {
                Some((_, old)) => old.renamed(&exp.name),
                None => continue,
            },
        };
        if !exp.same_shape(&current) {
            modifies.push(Action::ModifyColumn {
                from: current,
                to: exp.clone(),
            });
        }
    }
    modifies.sort_by_key(Action::release_rank);
    actions.extend(modifies);

    TableDiff {
        table: expected.name.clone(),
        actions,
    }
}
