use crate::core::data_type::DataType;
use serde::{Deserialize, Serialize};

/// Lower bound on a watermark column for incremental extraction, in the column's
/// text form. Resolved once per run so every statement of the run sees the same rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatermarkBound {
    /// Strictly greater than the value.
    After(String),
    /// Greater than or equal to the value.
    Since(String),
}

/// Row predicate applied on every read of an incremental job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub data_type: DataType,
    pub bound: WatermarkBound,
}

impl RowFilter {
    pub fn after(column: &str, data_type: DataType, value: &str) -> Self {
        RowFilter {
            column: column.to_string(),
            data_type,
            bound: WatermarkBound::After(value.to_string()),
        }
    }

    pub fn since(column: &str, data_type: DataType, value: &str) -> Self {
        RowFilter {
            column: column.to_string(),
            data_type,
            bound: WatermarkBound::Since(value.to_string()),
        }
    }

    pub fn value(&self) -> &str {
        match &self.bound {
            WatermarkBound::After(v) | WatermarkBound::Since(v) => v,
        }
    }
}
