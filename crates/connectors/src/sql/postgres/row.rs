use crate::sql::base::error::DbError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use model::{
    core::{data_type::DataType, value::Value},
    records::row::Row,
    schema::ColumnDefinition,
};
use tokio_postgres::{Row as PgRow, types::FromSql};

/// Decodes a row selected with the projection built by `query::select_batch`.
pub(crate) fn decode_row(row: &PgRow, columns: &[ColumnDefinition]) -> Result<Row, DbError> {
    columns
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_value(row, idx, column))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_value(row: &PgRow, idx: usize, column: &ColumnDefinition) -> Result<Value, DbError> {
    if column.data_type == DataType::Numeric {
        return numeric_cell(row, idx, column);
    }
    if !column.data_type.is_native() {
        return cell::<String>(row, idx, column, Value::Literal);
    }

    match column.data_type {
        DataType::Boolean => cell::<bool>(row, idx, column, Value::Boolean),
        DataType::SmallInt => cell::<i16>(row, idx, column, Value::SmallInt),
        DataType::Int => cell::<i32>(row, idx, column, Value::Int),
        DataType::BigInt => cell::<i64>(row, idx, column, Value::BigInt),
        DataType::Real => cell::<f32>(row, idx, column, Value::Real),
        DataType::Double => cell::<f64>(row, idx, column, Value::Double),
        DataType::Char | DataType::VarChar | DataType::Text => {
            cell::<String>(row, idx, column, Value::Text)
        }
        DataType::Bytea => cell::<Vec<u8>>(row, idx, column, Value::Bytes),
        DataType::Uuid => cell::<uuid::Uuid>(row, idx, column, Value::Uuid),
        DataType::Json | DataType::Jsonb => {
            cell::<serde_json::Value>(row, idx, column, Value::Json)
        }
        DataType::Date => cell::<NaiveDate>(row, idx, column, Value::Date),
        DataType::Time => cell::<NaiveTime>(row, idx, column, Value::Time),
        DataType::Timestamp => cell::<NaiveDateTime>(row, idx, column, Value::Timestamp),
        DataType::TimestampTz => cell::<DateTime<Utc>>(row, idx, column, Value::TimestampTz),
        _ => cell::<String>(row, idx, column, Value::Literal),
    }
}

/// numeric is selected as text; NaN and the infinities stay literals.
fn numeric_cell(row: &PgRow, idx: usize, column: &ColumnDefinition) -> Result<Value, DbError> {
    match cell::<String>(row, idx, column, Value::Literal)? {
        Value::Literal(raw) => {
            Value::parse(&DataType::Numeric, &raw).map_err(|message| DbError::Decode {
                column: column.name.clone(),
                message,
            })
        }
        other => Ok(other),
    }
}

fn cell<'r, T: FromSql<'r>>(
    row: &'r PgRow,
    idx: usize,
    column: &ColumnDefinition,
    wrap: fn(T) -> Value,
) -> Result<Value, DbError> {
    row.try_get::<_, Option<T>>(idx)
        .map(|value| value.map_or(Value::Null, wrap))
        .map_err(|e| DbError::Decode {
            column: column.name.clone(),
            message: e.to_string(),
        })
}
