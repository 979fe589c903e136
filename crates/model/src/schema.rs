use crate::core::{data_type::DataType, identifiers::TableRef};
use serde::{Deserialize, Serialize};

/// PostgreSQL system column holding a row's physical location. Unique within a table
/// while the table is not rewritten.
pub const ROW_LOCATOR: &str = "ctid";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Full type as reported by the catalog, modifiers included (e.g. `numeric(10,2)`).
    pub type_name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub default: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, type_name: &str, nullable: bool) -> Self {
        ColumnDefinition {
            name: name.to_string(),
            type_name: type_name.to_string(),
            data_type: DataType::from_postgres_type(type_name),
            nullable,
            default: None,
        }
    }

    pub fn with_default(mut self, default: &str) -> Self {
        self.default = Some(default.to_string());
        self
    }

    /// Default expression safe to copy to another database. Sequence-backed defaults
    /// are dropped since the sequence only exists on the source.
    pub fn portable_default(&self) -> Option<&str> {
        self.default
            .as_deref()
            .filter(|expr| !expr.trim_start().to_ascii_lowercase().starts_with("nextval("))
    }
}

/// Captured structure of a table. Column order is the order of every row moved for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub table: TableRef,
    pub columns: Vec<ColumnDefinition>,
    pub primary_key: Vec<String>,
    /// Planner estimate, not an exact count.
    pub approx_row_count: i64,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Columns defining a total row order: the primary key, else every orderable
    /// column in ordinal order followed by the physical row locator, which breaks ties
    /// between rows equal on every orderable column.
    pub fn order_key(&self) -> Vec<String> {
        if self.has_primary_key() {
            return self.primary_key.clone();
        }

        self.columns
            .iter()
            .filter(|c| c.data_type.is_orderable())
            .map(|c| c.name.clone())
            .chain(std::iter::once(ROW_LOCATOR.to_string()))
            .collect()
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// Same columns, bound to another table.
    pub fn retarget(&self, table: TableRef) -> TableSchema {
        TableSchema {
            table,
            ..self.clone()
        }
    }
}
