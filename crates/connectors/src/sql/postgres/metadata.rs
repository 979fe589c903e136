use crate::sql::base::error::DbError;
use model::{
    core::{data_type::DataType, identifiers::TableRef},
    schema::{ColumnDefinition, TableSchema},
};
use tokio_postgres::{Client, Row as PgRow};

const QUERY_TABLE_ESTIMATE_SQL: &str = include_str!("sql/table_estimate.sql");
const QUERY_TABLE_COLUMNS_SQL: &str = include_str!("sql/table_columns.sql");
const QUERY_TABLE_PRIMARY_KEY_SQL: &str = include_str!("sql/table_primary_key.sql");
pub(crate) const QUERY_LIST_TABLES_SQL: &str = include_str!("sql/list_tables.sql");

/// Reads the catalog description of `table`, or `None` if no such table exists.
pub(crate) async fn table_schema(
    client: &Client,
    table: &TableRef,
) -> Result<Option<TableSchema>, DbError> {
    let params: [&(dyn tokio_postgres::types::ToSql + Sync); 2] = [&table.schema, &table.name];

    let Some(estimate) = client.query_opt(QUERY_TABLE_ESTIMATE_SQL, &params).await? else {
        return Ok(None);
    };
    let approx_row_count: i64 = estimate.try_get("estimate")?;

    let columns = client
        .query(QUERY_TABLE_COLUMNS_SQL, &params)
        .await?
        .iter()
        .map(column_from_row)
        .collect::<Result<Vec<_>, _>>()?;

    let primary_key = client
        .query(QUERY_TABLE_PRIMARY_KEY_SQL, &params)
        .await?
        .iter()
        .map(|row| row.try_get::<_, String>("column_name"))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(TableSchema {
        table: table.clone(),
        columns,
        primary_key,
        approx_row_count,
    }))
}

fn column_from_row(row: &PgRow) -> Result<ColumnDefinition, DbError> {
    let type_name: String = row.try_get("type_name")?;
    Ok(ColumnDefinition {
        name: row.try_get("column_name")?,
        data_type: DataType::from_postgres_type(&type_name),
        type_name,
        nullable: row.try_get("nullable")?,
        default: row.try_get("column_default")?,
    })
}
