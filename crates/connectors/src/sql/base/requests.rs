use model::{
    core::{identifiers::TableRef, value::Value},
    filter::RowFilter,
    schema::TableSchema,
};

/// One ordered page of rows from `table`, decoded with the columns of `schema`.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub table: &'a TableRef,
    pub schema: &'a TableSchema,
    pub order_by: &'a [String],
    pub filter: Option<&'a RowFilter>,
    /// Order-key values of the last row already read. When set the page starts right
    /// after that row and `offset` only numbers the page.
    pub after: Option<&'a [Value]>,
    pub offset: u64,
    pub limit: u64,
}

/// Copies one ordered range of `source` into a new table `destination`.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeRequest<'a> {
    pub source: &'a TableRef,
    pub destination: &'a TableRef,
    pub order_by: &'a [String],
    pub filter: Option<&'a RowFilter>,
    pub offset: u64,
    pub limit: u64,
}
