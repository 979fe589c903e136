//! SQL text generation for PostgreSQL. Pure functions, no I/O.

use crate::sql::base::requests::{FetchRequest, MaterializeRequest};
use model::{
    core::{identifiers::TableRef, value::Value},
    filter::{RowFilter, WatermarkBound},
    schema::{ColumnDefinition, TableSchema},
};

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn qualified(table: &TableRef) -> String {
    format!("{}.{}", quote_ident(&table.schema), quote_ident(&table.name))
}

fn column_list<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Predicate selecting the rows an incremental run moves.
pub fn filter_predicate(filter: &RowFilter) -> String {
    let column = quote_ident(&filter.column);
    match &filter.bound {
        WatermarkBound::After(value) => format!(
            "{column} > CAST({} AS {})",
            quote_literal(value),
            filter.data_type.postgres_name()
        ),
        WatermarkBound::Since(value) => format!(
            "{column} >= CAST({} AS {})",
            quote_literal(value),
            filter.data_type.postgres_name()
        ),
    }
}

/// Row-value comparison selecting the rows ordered after `key`.
fn seek_predicate(schema: &TableSchema, order_by: &[String], key: &[Value]) -> String {
    let bounds = order_by
        .iter()
        .zip(key)
        .map(|(name, value)| {
            let type_name = schema
                .column(name)
                .map_or("text".into(), |c| c.data_type.postgres_name());
            format!("CAST({} AS {type_name})", quote_literal(&value.to_string()))
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "({}) > ({bounds})",
        column_list(order_by.iter().map(String::as_str))
    )
}

fn where_clause(predicates: impl IntoIterator<Item = String>) -> String {
    let predicates: Vec<String> = predicates.into_iter().collect();
    if predicates.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", predicates.join(" AND "))
    }
}

fn order_clause(order_by: &[String]) -> String {
    if order_by.is_empty() {
        String::new()
    } else {
        format!(
            " ORDER BY {}",
            column_list(order_by.iter().map(String::as_str))
        )
    }
}

pub fn count_rows(table: &TableRef, filter: Option<&RowFilter>) -> String {
    format!(
        "SELECT COUNT(*)::int8 FROM {}{}",
        qualified(table),
        where_clause(filter.map(filter_predicate))
    )
}

/// Columns the driver cannot decode are read as their text representation. Pages
/// continuing after a known key seek past it; others skip `offset` rows.
pub fn select_batch(request: &FetchRequest<'_>) -> String {
    let projection = request
        .schema
        .columns
        .iter()
        .map(|c| {
            let ident = quote_ident(&c.name);
            if c.data_type.is_native() {
                ident
            } else {
                format!("{ident}::text AS {ident}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let predicates = request.filter.map(filter_predicate).into_iter().chain(
        request
            .after
            .map(|key| seek_predicate(request.schema, request.order_by, key)),
    );
    let offset = match request.after {
        Some(_) => String::new(),
        None => format!(" OFFSET {}", request.offset),
    };

    format!(
        "SELECT {projection} FROM {}{}{} LIMIT {}{offset}",
        qualified(request.table),
        where_clause(predicates),
        order_clause(request.order_by),
        request.limit,
    )
}

pub fn materialize_range(request: &MaterializeRequest<'_>) -> String {
    format!(
        "CREATE TABLE {} AS SELECT * FROM {}{}{} LIMIT {} OFFSET {}",
        qualified(request.destination),
        qualified(request.source),
        where_clause(request.filter.map(filter_predicate)),
        order_clause(request.order_by),
        request.limit,
        request.offset
    )
}

pub fn create_schema(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema))
}

/// Column-for-column DDL. Keys and constraints other than NOT NULL are not copied.
pub fn create_table(schema: &TableSchema) -> String {
    let columns = schema
        .columns
        .iter()
        .map(column_ddl)
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE {} ({columns})", qualified(&schema.table))
}

fn column_ddl(column: &ColumnDefinition) -> String {
    let mut ddl = format!("{} {}", quote_ident(&column.name), column.type_name);
    if !column.nullable {
        ddl.push_str(" NOT NULL");
    }
    if let Some(default) = column.portable_default() {
        ddl.push_str(" DEFAULT ");
        ddl.push_str(default);
    }
    ddl
}

pub fn drop_table(table: &TableRef) -> String {
    format!("DROP TABLE IF EXISTS {}", qualified(table))
}

pub fn truncate_table(table: &TableRef) -> String {
    format!("TRUNCATE TABLE {}", qualified(table))
}

pub fn copy_from_stdin(table: &TableRef, columns: &[ColumnDefinition]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN",
        qualified(table),
        column_list(columns.iter().map(|c| c.name.as_str()))
    )
}
