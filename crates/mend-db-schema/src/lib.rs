//! Table descriptor types for mend.
//!
//! This crate contains the schema types shared between the application
//! (which declares the tables it expects) and `mend` (which inspects the
//! live database and reconciles it against those declarations).
//!
//! ## Example
//!
//! ```
//! use mend_db_schema::{ColumnSpec, SqlType, TableSchema};
//!
//! let table = TableSchema::new("user")
//!     .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
//!     .column(ColumnSpec::new("email", SqlType::Varchar(255)).not_null().unique())
//!     .column(ColumnSpec::new("bio", SqlType::Text));
//!
//! assert!(table.validate().is_ok());
//! assert_eq!(table.columns[1].to_string(), "email varchar(255) NOT NULL UNIQUE");
//! ```

use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

/// Errors raised while building or validating a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown column type: {0}")]
    UnknownType(String),

    #[error("table name must not be empty")]
    EmptyTableName,

    #[error("table {table}: column {column} is declared more than once")]
    DuplicateColumn { table: String, column: String },

    #[error("table {table}: more than one primary key column ({first}, {second})")]
    MultiplePrimaryKeys {
        table: String,
        first: String,
        second: String,
    },

    #[error("table {table}: primary key column {column} cannot be nullable")]
    NullablePrimaryKey { table: String, column: String },

    #[error("table {table}: column {column} is {generated} but has type {sql_type}")]
    IncompatibleGenerated {
        table: String,
        column: String,
        generated: Generated,
        sql_type: SqlType,
    },

    #[error("table {table}: identity column {column} cannot be nullable")]
    NullableIdentity { table: String, column: String },

    #[error("table {table}: column {column} lists former name {alias}, which is also a declared column")]
    AliasCollision {
        table: String,
        column: String,
        alias: String,
    },

    #[error("table {0} is registered more than once")]
    DuplicateTable(String),
}

/// Column types understood by the reconciler.
///
/// `Display` produces the canonical lowercase form (`varchar(255)`,
/// `decimal(15,2)`), [`SqlType::to_sql`] the Postgres DDL spelling.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// SMALLINT (2 bytes)
    SmallInt,
    /// INTEGER (4 bytes)
    Integer,
    /// BIGINT (8 bytes)
    BigInt,
    /// REAL (4 bytes floating point)
    Real,
    /// DOUBLE PRECISION (8 bytes floating point)
    DoublePrecision,
    /// NUMERIC(precision, scale)
    Decimal { precision: u32, scale: u32 },
    /// BOOLEAN
    Boolean,
    /// TEXT
    Text,
    /// VARCHAR(n)
    Varchar(u32),
    /// CHAR(n)
    Char(u32),
    /// DATE
    Date,
    /// TIME
    Time,
    /// TIMESTAMP (without time zone)
    Timestamp,
    /// TIMESTAMPTZ
    Timestamptz,
    /// Anything else, kept verbatim as reported by the database.
    Other(String),
}

impl SqlType {
    /// The Postgres spelling of this type, for use in DDL.
    pub fn to_sql(&self) -> String {
        match self {
            SqlType::SmallInt => "SMALLINT".to_string(),
            SqlType::Integer => "INTEGER".to_string(),
            SqlType::BigInt => "BIGINT".to_string(),
            SqlType::Real => "REAL".to_string(),
            SqlType::DoublePrecision => "DOUBLE PRECISION".to_string(),
            SqlType::Decimal { precision, scale } => format!("NUMERIC({precision},{scale})"),
            SqlType::Boolean => "BOOLEAN".to_string(),
            SqlType::Text => "TEXT".to_string(),
            SqlType::Varchar(len) => format!("VARCHAR({len})"),
            SqlType::Char(len) => format!("CHAR({len})"),
            SqlType::Date => "DATE".to_string(),
            SqlType::Time => "TIME".to_string(),
            SqlType::Timestamp => "TIMESTAMP".to_string(),
            SqlType::Timestamptz => "TIMESTAMPTZ".to_string(),
            SqlType::Other(name) => name.clone(),
        }
    }

    /// Build a type from the columns of `information_schema.columns`.
    ///
    /// Unknown `data_type` values (and parameterised types reported without
    /// their parameters) come back as [`SqlType::Other`].
    pub fn from_information_schema(
        data_type: &str,
        char_max_length: Option<i32>,
        numeric_precision: Option<i32>,
        numeric_scale: Option<i32>,
    ) -> SqlType {
        let length = char_max_length.and_then(|l| u32::try_from(l).ok());
        match data_type {
            "smallint" => SqlType::SmallInt,
            "integer" => SqlType::Integer,
            "bigint" => SqlType::BigInt,
            "real" => SqlType::Real,
            "double precision" => SqlType::DoublePrecision,
            "boolean" => SqlType::Boolean,
            "text" => SqlType::Text,
            "date" => SqlType::Date,
            "time without time zone" => SqlType::Time,
            "timestamp without time zone" => SqlType::Timestamp,
            "timestamp with time zone" => SqlType::Timestamptz,
            "character varying" => match length {
                Some(len) => SqlType::Varchar(len),
                None => SqlType::Other(data_type.to_string()),
            },
            "character" => match length {
                Some(len) => SqlType::Char(len),
                None => SqlType::Other(data_type.to_string()),
            },
            "numeric" => match (numeric_precision, numeric_scale) {
                (Some(p), Some(s)) if p >= 0 && s >= 0 => SqlType::Decimal {
                    precision: p as u32,
                    scale: s as u32,
                },
                _ => SqlType::Other(data_type.to_string()),
            },
            other => SqlType::Other(other.to_string()),
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, SqlType::SmallInt | SqlType::Integer | SqlType::BigInt)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            SqlType::Date | SqlType::Time | SqlType::Timestamp | SqlType::Timestamptz
        )
    }

    /// SQL literal used to fill existing rows when a column becomes NOT NULL.
    ///
    /// Returns `None` for types without an obvious zero value.
    pub fn fill_value(&self) -> Option<&'static str> {
        match self {
            SqlType::SmallInt
            | SqlType::Integer
            | SqlType::BigInt
            | SqlType::Real
            | SqlType::DoublePrecision
            | SqlType::Decimal { .. } => Some("0"),
            SqlType::Boolean => Some("false"),
            SqlType::Text | SqlType::Varchar(_) | SqlType::Char(_) => Some("''"),
            SqlType::Date | SqlType::Timestamp | SqlType::Timestamptz => Some("'epoch'"),
            SqlType::Time => Some("'00:00'"),
            SqlType::Other(_) => None,
        }
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlType::SmallInt => write!(f, "smallint"),
            SqlType::Integer => write!(f, "integer"),
            SqlType::BigInt => write!(f, "bigint"),
            SqlType::Real => write!(f, "real"),
            SqlType::DoublePrecision => write!(f, "double precision"),
            SqlType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            SqlType::Boolean => write!(f, "boolean"),
            SqlType::Text => write!(f, "text"),
            SqlType::Varchar(len) => write!(f, "varchar({len})"),
            SqlType::Char(len) => write!(f, "char({len})"),
            SqlType::Date => write!(f, "date"),
            SqlType::Time => write!(f, "time"),
            SqlType::Timestamp => write!(f, "timestamp"),
            SqlType::Timestamptz => write!(f, "timestamptz"),
            SqlType::Other(name) => write!(f, "{name}"),
        }
    }
}

impl FromStr for SqlType {
    type Err = SchemaError;

    /// Parse a canonical type string, or one of the common aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let unknown = || SchemaError::UnknownType(s.trim().to_string());

        let (base, args) = match normalized.split_once('(') {
            Some((base, rest)) => {
                let args = rest.strip_suffix(')').ok_or_else(unknown)?;
                let args: Vec<u32> = args
                    .split(',')
                    .map(|a| a.trim().parse::<u32>().map_err(|_| unknown()))
                    .collect::<Result<_, _>>()?;
                (base.trim().to_string(), args)
            }
            None => (normalized, Vec::new()),
        };

        let ty = match (base.as_str(), args.as_slice()) {
            ("smallint" | "int2", []) => SqlType::SmallInt,
            ("integer" | "int" | "int4", []) => SqlType::Integer,
            ("bigint" | "int8", []) => SqlType::BigInt,
            ("real" | "float4", []) => SqlType::Real,
            ("double precision" | "float8", []) => SqlType::DoublePrecision,
            ("decimal" | "numeric", [precision, scale]) => SqlType::Decimal {
                precision: *precision,
                scale: *scale,
            },
            ("decimal" | "numeric", [precision]) => SqlType::Decimal {
                precision: *precision,
                scale: 0,
            },
            ("boolean" | "bool", []) => SqlType::Boolean,
            ("text", []) => SqlType::Text,
            ("varchar" | "character varying", [len]) => SqlType::Varchar(*len),
            ("char" | "character", [len]) => SqlType::Char(*len),
            ("date", []) => SqlType::Date,
            ("time" | "time without time zone", []) => SqlType::Time,
            ("timestamp" | "timestamp without time zone", []) => SqlType::Timestamp,
            ("timestamptz" | "timestamp with time zone", []) => SqlType::Timestamptz,
            _ => return Err(unknown()),
        };
        Ok(ty)
    }
}

/// The key a column carries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyRole {
    #[default]
    None,
    Primary,
    Unique,
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyRole::None => write!(f, "no key"),
            KeyRole::Primary => write!(f, "PRIMARY KEY"),
            KeyRole::Unique => write!(f, "UNIQUE"),
        }
    }
}

/// How the database fills a column on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Generated {
    #[default]
    None,
    /// `GENERATED BY DEFAULT AS IDENTITY` (or a legacy `serial` default).
    Identity,
    /// `DEFAULT CURRENT_TIMESTAMP`
    DefaultNow,
    /// `DEFAULT CURRENT_TIMESTAMP`, refreshed by a trigger on every update.
    DefaultNowOnUpdate,
}

impl Generated {
    pub fn is_auto_generated(&self) -> bool {
        !matches!(self, Generated::None)
    }

    /// Whether the column carries a `CURRENT_TIMESTAMP` default.
    pub fn has_default_now(&self) -> bool {
        matches!(self, Generated::DefaultNow | Generated::DefaultNowOnUpdate)
    }
}

impl fmt::Display for Generated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Generated::None => write!(f, "not generated"),
            Generated::Identity => write!(f, "identity"),
            Generated::DefaultNow => write!(f, "default now"),
            Generated::DefaultNowOnUpdate => write!(f, "default now on update"),
        }
    }
}

/// A single column, either expected or observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Column type
    pub sql_type: SqlType,
    /// Whether the column allows NULL
    pub nullable: bool,
    /// Key carried by this column alone
    pub key: KeyRole,
    /// Database-side value generation
    pub generated: Generated,
    /// Names this column used to have. Only meaningful on expected columns.
    pub renamed_from: Vec<String>,
}

impl ColumnSpec {
    /// A nullable column with no key and no generated value.
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
            key: KeyRole::None,
            generated: Generated::None,
            renamed_from: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Primary key. Implies NOT NULL.
    pub fn primary_key(mut self) -> Self {
        self.key = KeyRole::Primary;
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.key = KeyRole::Unique;
        self
    }

    pub fn identity(mut self) -> Self {
        self.generated = Generated::Identity;
        self
    }

    pub fn default_now(mut self) -> Self {
        self.generated = Generated::DefaultNow;
        self
    }

    pub fn default_now_on_update(mut self) -> Self {
        self.generated = Generated::DefaultNowOnUpdate;
        self
    }

    pub fn renamed_from(mut self, former: impl Into<String>) -> Self {
        self.renamed_from.push(former.into());
        self
    }

    /// Whether `other` has the same shape: type, nullability, key and
    /// generation. Names and rename aliases are not compared.
    pub fn same_shape(&self, other: &ColumnSpec) -> bool {
        self.sql_type == other.sql_type
            && self.nullable == other.nullable
            && self.key == other.key
            && self.generated == other.generated
    }

    /// Copy of this column under another name.
    pub fn renamed(&self, name: impl Into<String>) -> ColumnSpec {
        ColumnSpec {
            name: name.into(),
            ..self.clone()
        }
    }
}

impl ColumnSpec {
    /// Everything but the name, e.g. `varchar(255) NOT NULL UNIQUE`.
    pub fn shape(&self) -> String {
        let mut shape = self.sql_type.to_string();
        if !self.nullable {
            shape.push_str(" NOT NULL");
        }
        if self.key != KeyRole::None {
            shape.push_str(&format!(" {}", self.key));
        }
        if self.generated.is_auto_generated() {
            shape.push_str(&format!(" ({})", self.generated));
        }
        shape
    }
}

impl fmt::Display for ColumnSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.shape())
    }
}

/// An ordered column list, keyed by table name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name
    pub name: String,
    /// Columns, in ordinal order
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Append a column.
    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Ordinal position of a column (0-based).
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn primary_key(&self) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.key == KeyRole::Primary)
    }

    /// Check the descriptor for contradictions the database would reject.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.name.trim().is_empty() {
            return Err(SchemaError::EmptyTableName);
        }

        let mut seen = std::collections::HashSet::new();
        let mut primary: Option<&str> = None;

        for col in &self.columns {
            if !seen.insert(col.name.as_str()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }

            if col.key == KeyRole::Primary {
                if col.nullable {
                    return Err(SchemaError::NullablePrimaryKey {
                        table: self.name.clone(),
                        column: col.name.clone(),
                    });
                }
                if let Some(first) = primary {
                    return Err(SchemaError::MultiplePrimaryKeys {
                        table: self.name.clone(),
                        first: first.to_string(),
                        second: col.name.clone(),
                    });
                }
                primary = Some(col.name.as_str());
            }

            if col.generated == Generated::Identity && col.nullable {
                return Err(SchemaError::NullableIdentity {
                    table: self.name.clone(),
                    column: col.name.clone(),
                });
            }

            let compatible = match col.generated {
                Generated::None => true,
                Generated::Identity => col.sql_type.is_integer(),
                Generated::DefaultNow | Generated::DefaultNowOnUpdate => {
                    col.sql_type.is_temporal()
                }
            };
            if !compatible {
                return Err(SchemaError::IncompatibleGenerated {
                    table: self.name.clone(),
                    column: col.name.clone(),
                    generated: col.generated,
                    sql_type: col.sql_type.clone(),
                });
            }
        }

        for col in &self.columns {
            if let Some(alias) = col.renamed_from.iter().find(|a| self.contains(a)) {
                return Err(SchemaError::AliasCollision {
                    table: self.name.clone(),
                    column: col.name.clone(),
                    alias: alias.clone(),
                });
            }
        }

        Ok(())
    }
}

/// The set of tables an application expects.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    /// Tables in the schema, indexed by name
    pub tables: IndexMap<String, TableSchema>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table after validating it.
    pub fn register(&mut self, table: TableSchema) -> Result<(), SchemaError> {
        table.validate()?;
        if self.tables.contains_key(&table.name) {
            return Err(SchemaError::DuplicateTable(table.name));
        }
        self.tables.insert(table.name.clone(), table);
        Ok(())
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Iterate over all tables.
    pub fn iter_tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}
