//! Table schemas.
//!
//! Schemas are minimal: a table has a key column and a set of
//! typed columns. A row may only carry declared columns, and a non-nullable
//! column must be present with a non-null value.

use rowsync_protocol::{ColumnType, Columns, Value};
use serde::{Deserialize, Serialize};

/// A declared column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub ty: ColumnType,
    /// Whether null (or absence) is allowed.
    pub nullable: bool,
}

/// Schema of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Name of the primary key column. The key itself is carried as the
    /// row's [`RowKey`](rowsync_protocol::RowKey), not as a column.
    pub key_column: String,
    /// Declared columns.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Creates a schema with no columns.
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
            columns: Vec::new(),
        }
    }

    /// Adds a non-nullable column.
    #[must_use]
    pub fn column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
            nullable: false,
        });
        self
    }

    /// Adds a nullable column.
    #[must_use]
    pub fn nullable_column(mut self, name: impl Into<String>, ty: ColumnType) -> Self {
        self.columns.push(ColumnDef {
            name: name.into(),
            ty,
            nullable: true,
        });
        self
    }

    /// Looks up a column definition.
    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Checks a row's columns against the schema.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self, columns: &Columns) -> Result<(), String> {
        for (name, value) in columns {
            let def = self
                .column_def(name)
                .ok_or_else(|| format!("unknown column {name}"))?;
            match value.column_type() {
                None if !def.nullable => {
                    return Err(format!("column {name} is not nullable"));
                }
                Some(ty) if ty != def.ty => {
                    return Err(format!(
                        "column {name} expects {:?}, got {:?}",
                        def.ty, ty
                    ));
                }
                _ => {}
            }
        }

        for def in self.columns.iter().filter(|c| !c.nullable) {
            if columns.get(&def.name).map_or(true, Value::is_null) {
                return Err(format!("missing required column {}", def.name));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> TableSchema {
        TableSchema::new("Customer", "Id")
            .column("FirstName", ColumnType::Text)
            .column("LastName", ColumnType::Text)
            .nullable_column("Notes", ColumnType::Text)
    }

    fn columns(pairs: &[(&str, Value)]) -> Columns {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_row() {
        let row = columns(&[
            ("FirstName", Value::from("John")),
            ("LastName", Value::from("Doe")),
        ]);
        assert!(customer().validate(&row).is_ok());
    }

    #[test]
    fn nullable_column_accepts_null() {
        let row = columns(&[
            ("FirstName", Value::from("John")),
            ("LastName", Value::from("Doe")),
            ("Notes", Value::Null),
        ]);
        assert!(customer().validate(&row).is_ok());
    }

    #[test]
    fn missing_required_column() {
        let row = columns(&[("FirstName", Value::from("John"))]);
        let err = customer().validate(&row).unwrap_err();
        assert!(err.contains("LastName"));
    }

    #[test]
    fn wrong_type() {
        let row = columns(&[
            ("FirstName", Value::from("John")),
            ("LastName", Value::from(3)),
        ]);
        assert!(customer().validate(&row).is_err());
    }

    #[test]
    fn unknown_column() {
        let row = columns(&[
            ("FirstName", Value::from("John")),
            ("LastName", Value::from("Doe")),
            ("Age", Value::from(40)),
        ]);
        let err = customer().validate(&row).unwrap_err();
        assert_eq!(err, "unknown column Age");
    }
}
