//! CLI command implementations.

pub mod demo;
pub mod inspect;

use rowsync_protocol::{ColumnType, Columns, Value};
use rowsync_store::TableSchema;

/// Table the demo edits.
pub const CUSTOMER: &str = "Customer";

/// Schema of the demo table.
pub fn customer_schema() -> TableSchema {
    TableSchema::new(CUSTOMER, "Id")
        .column("FirstName", ColumnType::Text)
        .column("LastName", ColumnType::Text)
}

/// Builds the columns of a customer row.
pub fn customer(first: &str, last: &str) -> Columns {
    let mut columns = Columns::new();
    columns.insert("FirstName".into(), Value::from(first));
    columns.insert("LastName".into(), Value::from(last));
    columns
}
