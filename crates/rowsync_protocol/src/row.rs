//! Rows and row identity.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value mapping, kept in canonical (sorted) order.
pub type Columns = BTreeMap<String, Value>;

/// Primary key of a row.
///
/// Keys are opaque to the engine; they only need to be comparable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    /// Integer key.
    Integer(i64),
    /// Text key.
    Text(String),
}

impl From<i64> for RowKey {
    fn from(i: i64) -> Self {
        RowKey::Integer(i)
    }
}

impl From<&str> for RowKey {
    fn from(s: &str) -> Self {
        RowKey::Text(s.to_string())
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Integer(i) => write!(f, "{i}"),
            RowKey::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Identity of a row across stores: table name plus primary key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId {
    /// Logical table name.
    pub table: String,
    /// Primary key within the table.
    pub key: RowKey,
}

impl RowId {
    /// Creates a row identity.
    pub fn new(table: impl Into<String>, key: impl Into<RowKey>) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.key)
    }
}

/// A table row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Logical table name.
    pub table: String,
    /// Primary key.
    pub key: RowKey,
    /// Column values.
    pub columns: Columns,
}

impl Row {
    /// Creates a row.
    pub fn new(table: impl Into<String>, key: impl Into<RowKey>, columns: Columns) -> Self {
        Self {
            table: table.into(),
            key: key.into(),
            columns,
        }
    }

    /// Returns the row's identity.
    pub fn id(&self) -> RowId {
        RowId {
            table: self.table.clone(),
            key: self.key.clone(),
        }
    }

    /// Returns a column value.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Builder-style column setter.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.columns.insert(column.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_integers_before_text() {
        assert!(RowKey::Integer(99) < RowKey::Text("a".into()));
        assert!(RowKey::Integer(1) < RowKey::Integer(2));
    }

    #[test]
    fn row_builder() {
        let row = Row::new("Customer", 1, Columns::new())
            .with("FirstName", "John")
            .with("LastName", "Doe");
        assert_eq!(row.get("LastName"), Some(&Value::from("Doe")));
        assert_eq!(row.id(), RowId::new("Customer", 1));
        assert_eq!(row.id().to_string(), "Customer/1");
    }
}
