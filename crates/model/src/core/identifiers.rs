use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, sync::Arc};

/// Identifier of a single transfer run, used to correlate log lines and reports.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Arc<str>);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    pub fn generate() -> Self {
        Self::new(format!("run-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A schema-qualified table name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Name of the partition object `<table>_<ordinal>` living under `schema`.
    pub fn partition(&self, schema: &str, ordinal: u32) -> TableRef {
        TableRef::new(schema, format!("{}_{}", self.name, ordinal))
    }

    /// Returns the ordinal if `candidate` is named like a partition of this table.
    pub fn partition_ordinal(&self, candidate: &str) -> Option<u32> {
        let suffix = candidate.strip_prefix(&self.name)?.strip_prefix('_')?;
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        suffix.parse().ok()
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

impl FromStr for TableRef {
    type Err = String;

    /// Parses `schema.table`, or a bare `table` in the `public` schema.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once('.') {
            Some((schema, name)) if !schema.is_empty() && !name.is_empty() => {
                Ok(TableRef::new(schema, name))
            }
            None if !s.is_empty() => Ok(TableRef::new("public", s)),
            _ => Err(format!("invalid table reference '{s}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_names_follow_table_ordinal_pattern() {
        let table = TableRef::new("public", "orders");
        let part = table.partition("etl_internal", 3);
        assert_eq!(part, TableRef::new("etl_internal", "orders_3"));
        assert_eq!(table.partition_ordinal("orders_3"), Some(3));
        assert_eq!(table.partition_ordinal("orders_"), None);
        assert_eq!(table.partition_ordinal("orders_3a"), None);
        assert_eq!(table.partition_ordinal("orders_archive_1"), None);
        assert_eq!(table.partition_ordinal("customers_1"), None);
    }

    #[test]
    fn parses_qualified_and_bare_names() {
        assert_eq!(
            "ETL.orders".parse::<TableRef>().unwrap(),
            TableRef::new("ETL", "orders")
        );
        assert_eq!(
            "orders".parse::<TableRef>().unwrap(),
            TableRef::new("public", "orders")
        );
        assert!(".orders".parse::<TableRef>().is_err());
        assert!("".parse::<TableRef>().is_err());
    }

    #[test]
    fn run_id_serializes_as_a_plain_string() {
        let id = RunId::new("run-42");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"run-42\"");
        assert_eq!(serde_json::from_str::<RunId>(&json).unwrap(), id);
    }
}
