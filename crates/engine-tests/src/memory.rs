//! In-memory store implementing the connector traits, with scripted faults.

use async_trait::async_trait;
use connectors::sql::base::{
    adapter::{SqlAdapter, SqlSession},
    error::DbError,
    requests::{FetchRequest, MaterializeRequest},
};
use model::{
    core::{identifiers::TableRef, value::Value},
    filter::{RowFilter, WatermarkBound},
    records::row::Row,
    schema::{ColumnDefinition, ROW_LOCATOR, TableSchema},
};
use std::{
    borrow::Borrow,
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering},
    },
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Session,
    TableSchema,
    ListTables,
    CountRows,
    CreateSchema,
    CreateTable,
    DropTable,
    TruncateTable,
    Materialize,
    Fetch,
    Write,
}

/// What a matching call does instead of (or before) running normally.
#[derive(Clone)]
pub enum FaultAction {
    Fail(fn() -> DbError),
    /// Cancels the token, then lets the call run.
    Cancel(CancellationToken),
    Panic,
}

/// A scripted fault. Matches calls by operation, table name and read offset.
#[derive(Clone)]
pub struct Fault {
    op: Op,
    table: Option<String>,
    offset: Option<u64>,
    skip: usize,
    times: usize,
    action: FaultAction,
}

impl Fault {
    pub fn fail(op: Op, error: fn() -> DbError) -> Self {
        Fault {
            op,
            table: None,
            offset: None,
            skip: 0,
            times: 1,
            action: FaultAction::Fail(error),
        }
    }

    pub fn cancel(op: Op, token: CancellationToken) -> Self {
        Fault {
            action: FaultAction::Cancel(token),
            ..Fault::fail(op, || DbError::Unknown("unused".into()))
        }
    }

    pub fn panic(op: Op) -> Self {
        Fault {
            action: FaultAction::Panic,
            ..Fault::fail(op, || DbError::Unknown("unused".into()))
        }
    }

    /// Only calls on the table with this (unqualified) name.
    pub fn on_table(mut self, name: &str) -> Self {
        self.table = Some(name.to_string());
        self
    }

    /// Only reads starting at this row offset.
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Lets the first `n` matching calls through.
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn times(mut self, n: usize) -> Self {
        self.times = n;
        self
    }

    pub fn always(self) -> Self {
        self.times(usize::MAX)
    }

    fn matches(&self, op: Op, table: Option<&str>, offset: Option<u64>) -> bool {
        self.op == op
            && self.table.as_deref().is_none_or(|t| Some(t) == table)
            && self.offset.is_none_or(|o| Some(o) == offset)
    }
}

/// One call made against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: Option<String>,
    pub offset: Option<u64>,
    /// Row filter a read was issued with.
    pub filter: Option<RowFilter>,
    pub rows: usize,
    pub failed: bool,
}

struct MemTable {
    schema: TableSchema,
    rows: Vec<Row>,
}

struct StoreInner {
    name: &'static str,
    max_connections: usize,
    reachable: AtomicBool,
    open_sessions: AtomicUsize,
    peak_sessions: AtomicUsize,
    schemas: Mutex<BTreeSet<String>>,
    tables: Mutex<HashMap<TableRef, MemTable>>,
    faults: Mutex<Vec<Fault>>,
    calls: Mutex<Vec<Call>>,
    /// Statements that sorted rows. Rows tied on the whole order key come back in a
    /// different order on every other one, as a real planner is free to do.
    selects: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StoreInner {
    /// Logs the call and applies the first matching fault. Returns the call's position
    /// in the log.
    fn intercept(
        &self,
        op: Op,
        table: Option<&str>,
        offset: Option<u64>,
    ) -> Result<usize, DbError> {
        let mut action = None;
        {
            let mut faults = lock(&self.faults);
            if let Some(fault) = faults
                .iter_mut()
                .find(|f| f.times > 0 && f.matches(op, table, offset))
            {
                if fault.skip > 0 {
                    fault.skip -= 1;
                } else {
                    fault.times -= 1;
                    action = Some(fault.action.clone());
                }
            }
        }

        let error = match action {
            Some(FaultAction::Fail(error)) => Some(error()),
            Some(FaultAction::Cancel(token)) => {
                token.cancel();
                None
            }
            Some(FaultAction::Panic) => panic!("scripted panic in {op:?}"),
            None => None,
        };

        let mut calls = lock(&self.calls);
        calls.push(Call {
            op,
            table: table.map(str::to_string),
            offset,
            filter: None,
            rows: 0,
            failed: error.is_some(),
        });
        match error {
            Some(error) => Err(error),
            None => Ok(calls.len() - 1),
        }
    }

    fn record_rows(&self, call: usize, rows: usize) {
        if let Some(entry) = lock(&self.calls).get_mut(call) {
            entry.rows = rows;
        }
    }

    fn record_filter(&self, call: usize, filter: Option<&RowFilter>) {
        if let Some(entry) = lock(&self.calls).get_mut(call) {
            entry.filter = filter.cloned();
        }
    }

    fn missing(table: &TableRef) -> DbError {
        DbError::server("42P01", format!("relation \"{table}\" does not exist"))
    }

    /// Rows of `table` passing `filter`, in `order_by` order. The row locator orders
    /// rows by insertion.
    fn select(
        &self,
        table: &TableRef,
        order_by: &[String],
        filter: Option<&RowFilter>,
    ) -> Result<(TableSchema, Vec<Row>), DbError> {
        let tables = lock(&self.tables);
        let stored = tables.get(table).ok_or_else(|| Self::missing(table))?;

        let mut rows: Vec<Row> = stored
            .rows
            .iter()
            .filter(|row| filter.is_none_or(|f| passes(f, &stored.schema, row)))
            .cloned()
            .collect();

        let keys = key_positions(&stored.schema, order_by);
        let by_locator = order_by.iter().any(|c| c == ROW_LOCATOR);
        if !by_locator && self.selects.fetch_add(1, AtomicOrdering::SeqCst) % 2 == 1 {
            rows.reverse();
        }
        rows.sort_by(|a, b| {
            let right: Vec<&Value> = keys.iter().map(|&k| b.get(k)).collect();
            compare_keys(a, &keys, right.as_slice())
        });

        Ok((stored.schema.clone(), rows))
    }
}

fn key_positions(schema: &TableSchema, order_by: &[String]) -> Vec<usize> {
    order_by
        .iter()
        .filter_map(|c| schema.column_index(c))
        .collect()
}

/// Orders `row` against key values given in `keys` order.
fn compare_keys<V: Borrow<Value>>(row: &Row, keys: &[usize], other: &[V]) -> Ordering {
    keys.iter()
        .zip(other)
        .map(|(&k, v)| row.get(k).compare(v.borrow()).unwrap_or(Ordering::Equal))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn passes(filter: &RowFilter, schema: &TableSchema, row: &Row) -> bool {
    let Some(index) = schema.column_index(&filter.column) else {
        return false;
    };
    let value = row.get(index);

    let Ok(bound) = Value::parse(&filter.data_type, filter.value()) else {
        return false;
    };
    if value.is_null() {
        return false;
    }
    match &filter.bound {
        WatermarkBound::After(_) => value.compare(&bound) == Some(Ordering::Greater),
        WatermarkBound::Since(_) => matches!(
            value.compare(&bound),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

/// A pooled in-memory database. Clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    pub fn new(name: &'static str, max_connections: usize) -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                name,
                max_connections,
                reachable: AtomicBool::new(true),
                open_sessions: AtomicUsize::new(0),
                peak_sessions: AtomicUsize::new(0),
                schemas: Mutex::new(BTreeSet::from(["public".to_string()])),
                tables: Mutex::new(HashMap::new()),
                faults: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                selects: AtomicUsize::new(0),
            }),
        }
    }

    pub fn adapter(&self) -> Arc<dyn SqlAdapter> {
        Arc::new(self.clone())
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, AtomicOrdering::SeqCst);
    }

    pub fn inject(&self, fault: Fault) {
        lock(&self.inner.faults).push(fault);
    }

    pub fn create(&self, schema: TableSchema, rows: Vec<Row>) {
        lock(&self.inner.schemas).insert(schema.table.schema.clone());
        lock(&self.inner.tables).insert(schema.table.clone(), MemTable { schema, rows });
    }

    /// Appends rows to an existing table, as a concurrent writer would.
    pub fn insert(&self, table: &TableRef, rows: Vec<Row>) {
        if let Some(stored) = lock(&self.inner.tables).get_mut(table) {
            stored.rows.extend(rows);
        }
    }

    pub fn rows(&self, table: &TableRef) -> Option<Vec<Row>> {
        lock(&self.inner.tables).get(table).map(|t| t.rows.clone())
    }

    pub fn schema_of(&self, table: &TableRef) -> Option<TableSchema> {
        lock(&self.inner.tables).get(table).map(|t| t.schema.clone())
    }

    pub fn tables_in(&self, schema: &str) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.inner.tables)
            .keys()
            .filter(|t| t.schema == schema)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn has_schema(&self, schema: &str) -> bool {
        lock(&self.inner.schemas).contains(schema)
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.inner.calls).clone()
    }

    /// Calls of `op` on `table`, optionally at one read offset.
    pub fn calls_to(&self, op: Op, table: &str, offset: Option<u64>) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op && c.table.as_deref() == Some(table))
            .filter(|c| offset.is_none() || c.offset == offset)
            .collect()
    }

    /// Highest number of sessions that were open at the same time.
    pub fn peak_sessions(&self) -> usize {
        self.inner.peak_sessions.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl SqlAdapter for MemoryStore {
    async fn session(&self) -> Result<Box<dyn SqlSession>, DbError> {
        let inner = &self.inner;
        inner.intercept(Op::Session, None, None)?;
        if !inner.reachable.load(AtomicOrdering::SeqCst) {
            return Err(DbError::ConnectionClosed);
        }

        let open = inner.open_sessions.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        if open > inner.max_connections {
            inner.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
            return Err(DbError::PoolTimeout);
        }
        inner.peak_sessions.fetch_max(open, AtomicOrdering::SeqCst);

        Ok(Box::new(MemorySession {
            inner: self.inner.clone(),
        }))
    }

    async fn test_connection(&self) -> bool {
        self.inner.reachable.load(AtomicOrdering::SeqCst)
    }

    async fn get_row_count(&self, table: &TableRef) -> Result<i64, DbError> {
        let tables = lock(&self.inner.tables);
        let stored = tables.get(table).ok_or_else(|| StoreInner::missing(table))?;
        Ok(stored.rows.len() as i64)
    }

    fn max_connections(&self) -> usize {
        self.inner.max_connections
    }
}

pub struct MemorySession {
    inner: Arc<StoreInner>,
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.inner.open_sessions.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl SqlSession for MemorySession {
    async fn table_schema(&self, table: &TableRef) -> Result<Option<TableSchema>, DbError> {
        self.inner.intercept(Op::TableSchema, Some(&table.name), None)?;
        Ok(lock(&self.inner.tables).get(table).map(|t| t.schema.clone()))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<String>, DbError> {
        self.inner.intercept(Op::ListTables, None, None)?;
        let mut names: Vec<String> = lock(&self.inner.tables)
            .keys()
            .filter(|t| t.schema == schema)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn count_rows(
        &self,
        table: &TableRef,
        filter: Option<&RowFilter>,
    ) -> Result<u64, DbError> {
        let call = self.inner.intercept(Op::CountRows, Some(&table.name), None)?;
        self.inner.record_filter(call, filter);
        let (_, rows) = self.inner.select(table, &[], filter)?;
        Ok(rows.len() as u64)
    }

    async fn create_schema(&self, schema: &str) -> Result<(), DbError> {
        self.inner.intercept(Op::CreateSchema, None, None)?;
        lock(&self.inner.schemas).insert(schema.to_string());
        Ok(())
    }

    async fn create_table(&self, schema: &TableSchema) -> Result<(), DbError> {
        let table = &schema.table;
        self.inner.intercept(Op::CreateTable, Some(&table.name), None)?;
        if !lock(&self.inner.schemas).contains(&table.schema) {
            return Err(DbError::server(
                "3F000",
                format!("schema \"{}\" does not exist", table.schema),
            ));
        }

        let mut tables = lock(&self.inner.tables);
        if tables.contains_key(table) {
            return Err(DbError::server(
                "42P07",
                format!("relation \"{table}\" already exists"),
            ));
        }
        tables.insert(
            table.clone(),
            MemTable {
                schema: schema.clone(),
                rows: Vec::new(),
            },
        );
        Ok(())
    }

    async fn drop_table(&self, table: &TableRef) -> Result<(), DbError> {
        self.inner.intercept(Op::DropTable, Some(&table.name), None)?;
        lock(&self.inner.tables).remove(table);
        Ok(())
    }

    async fn truncate_table(&self, table: &TableRef) -> Result<(), DbError> {
        self.inner.intercept(Op::TruncateTable, Some(&table.name), None)?;
        let mut tables = lock(&self.inner.tables);
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| StoreInner::missing(table))?;
        stored.rows.clear();
        Ok(())
    }

    async fn materialize_range(&self, request: &MaterializeRequest<'_>) -> Result<u64, DbError> {
        let destination = request.destination;
        let call = self
            .inner
            .intercept(Op::Materialize, Some(&destination.name), Some(request.offset))?;
        self.inner.record_filter(call, request.filter);

        let (schema, rows) = self
            .inner
            .select(request.source, request.order_by, request.filter)?;
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .collect();
        let created = rows.len();

        let mut tables = lock(&self.inner.tables);
        if tables.contains_key(destination) {
            return Err(DbError::server(
                "42P07",
                format!("relation \"{destination}\" already exists"),
            ));
        }
        tables.insert(
            destination.clone(),
            MemTable {
                schema: schema.retarget(destination.clone()),
                rows,
            },
        );
        drop(tables);

        self.inner.record_rows(call, created);
        Ok(created as u64)
    }

    async fn fetch_rows(&self, request: &FetchRequest<'_>) -> Result<Vec<Row>, DbError> {
        let call = self
            .inner
            .intercept(Op::Fetch, Some(&request.table.name), Some(request.offset))?;
        self.inner.record_filter(call, request.filter);

        let (schema, rows) = self
            .inner
            .select(request.table, request.order_by, request.filter)?;
        let page: Vec<Row> = match request.after {
            Some(last) => {
                let keys = key_positions(&schema, request.order_by);
                rows.into_iter()
                    .filter(|row| compare_keys(row, &keys, last).is_gt())
                    .take(request.limit as usize)
                    .collect()
            }
            None => rows
                .into_iter()
                .skip(request.offset as usize)
                .take(request.limit as usize)
                .collect(),
        };

        self.inner.record_rows(call, page.len());
        Ok(page)
    }

    async fn write_rows(
        &self,
        table: &TableRef,
        columns: &[ColumnDefinition],
        rows: &[Row],
    ) -> Result<u64, DbError> {
        let call = self.inner.intercept(Op::Write, Some(&table.name), None)?;

        let mut tables = lock(&self.inner.tables);
        let stored = tables
            .get_mut(table)
            .ok_or_else(|| StoreInner::missing(table))?;
        if columns.len() != stored.schema.columns.len() {
            return Err(DbError::server(
                "42703",
                format!("column count mismatch writing {table}"),
            ));
        }
        stored.rows.extend_from_slice(rows);
        drop(tables);

        self.inner.record_rows(call, rows.len());
        Ok(rows.len() as u64)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.inner.name)
            .field("max_connections", &self.inner.max_connections)
            .finish()
    }
}
