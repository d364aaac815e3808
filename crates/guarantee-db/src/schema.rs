//! The `guarantees` table as the application expects it.

use mend::{ColumnSpec, Schema, SchemaError, SqlType, TableSchema};

pub const TABLE: &str = "guarantees";

fn text(name: &str) -> ColumnSpec {
    ColumnSpec::new(name, SqlType::Varchar(255)).not_null()
}

/// Expected definition of `guarantees`.
///
/// `expiry_date` replaced `guarantee_period`; tables still carrying the old
/// name get the column renamed in place.
pub fn guarantees() -> TableSchema {
    TableSchema::new(TABLE)
        .column(ColumnSpec::new("id", SqlType::Integer).primary_key().identity())
        .column(text("guarantee_number").unique())
        .column(text("anti_fake_code").unique())
        .column(text("beneficiary"))
        .column(text("applicant"))
        .column(text("project_name"))
        .column(
            ColumnSpec::new(
                "guarantee_amount",
                SqlType::Decimal {
                    precision: 15,
                    scale: 2,
                },
            )
            .not_null(),
        )
        .column(
            ColumnSpec::new("expiry_date", SqlType::Date)
                .not_null()
                .renamed_from("guarantee_period"),
        )
        .column(text("guarantor"))
        .column(ColumnSpec::new("created_at", SqlType::Timestamp).default_now())
        .column(ColumnSpec::new("updated_at", SqlType::Timestamp).default_now_on_update())
}

/// Every table the application reconciles.
pub fn schema() -> Result<Schema, SchemaError> {
    let mut schema = Schema::new();
    schema.register(guarantees())?;
    Ok(schema)
}
