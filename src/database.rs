//! The database handle capability set
//!
//! [`Database`] is the seam between the statement cache and a concrete
//! driver. Anything that can prepare statements and run queries, either from
//! raw SQL text or from a previously prepared handle, implements it: the
//! PostgreSQL driver, test doubles, and the cache itself.
//!
//! Every operation has a cancellable counterpart that takes a
//! [`CancellationToken`]. The default implementations race the plain
//! operation against the token; drivers that can abort work on the server
//! override them.

use std::future::Future;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::row::{Row, Value};

/// Outcome of a statement that does not return rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows inserted, updated or deleted
    pub rows_affected: u64,
}

impl ExecuteResult {
    /// Create a result for the given number of affected rows
    pub fn new(rows_affected: u64) -> Self {
        Self { rows_affected }
    }
}

/// Rows returned by a query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Column names, in select-list order
    pub columns: Vec<String>,
    /// Rows returned
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Create a query result from columns and rows
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Create an empty query result
    pub fn empty() -> Self {
        Self::default()
    }

    /// Get the number of columns
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Get the number of rows
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Check if the result is empty
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get the first row, if any
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Find a column index by name (case-insensitive)
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Iterate over the rows
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }
}

impl IntoIterator for QueryResult {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a QueryResult {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Result of a single-row query.
///
/// Execution errors are not returned directly: they are carried in
/// [`SingleRow::Failed`] and surface when the row is consumed. The statement
/// cache returns [`SingleRow::Absent`] when the statement itself could not be
/// prepared.
#[derive(Debug)]
pub enum SingleRow {
    /// The first row of the result
    Row(Row),
    /// The query ran and returned no rows
    NoRows,
    /// The query failed; the error is reported on consumption
    Failed(Error),
    /// No statement was available to run
    Absent,
}

impl SingleRow {
    /// Build a single-row result from the outcome of a row-returning query
    pub fn from_rows(result: Result<Vec<Row>>) -> Self {
        match result {
            Ok(rows) => rows.into_iter().next().map_or(SingleRow::NoRows, SingleRow::Row),
            Err(e) => SingleRow::Failed(e),
        }
    }

    /// Check if this is the absent marker
    pub fn is_absent(&self) -> bool {
        matches!(self, SingleRow::Absent)
    }

    /// Borrow the row, if one was returned
    pub fn row(&self) -> Option<&Row> {
        match self {
            SingleRow::Row(row) => Some(row),
            _ => None,
        }
    }

    /// Consume into the row, treating an empty or absent result as [`Error::NoRows`]
    pub fn into_row(self) -> Result<Row> {
        match self {
            SingleRow::Row(row) => Ok(row),
            SingleRow::NoRows | SingleRow::Absent => Err(Error::NoRows),
            SingleRow::Failed(e) => Err(e),
        }
    }

    /// Consume into an optional row; only a failed query is an error
    pub fn into_optional(self) -> Result<Option<Row>> {
        match self {
            SingleRow::Row(row) => Ok(Some(row)),
            SingleRow::NoRows | SingleRow::Absent => Ok(None),
            SingleRow::Failed(e) => Err(e),
        }
    }
}

/// Run `fut` until it completes or `cancel` fires.
///
/// A token that is already cancelled wins over a future that is ready at the
/// same time. On cancellation the future is dropped and [`Error::Cancelled`]
/// is returned.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

/// A database handle that can prepare statements and run queries.
///
/// Implementations must be safe to share between tasks. Raw-text operations
/// (`execute`, `query`, `query_row`) are the driver's own uncached paths;
/// `*_statement` operations run a handle obtained from [`Database::prepare`].
#[async_trait]
pub trait Database: Send + Sync {
    /// Prepared statement handle produced by this database
    type Statement: Send + Sync;

    /// Prepare `sql` for repeated execution
    async fn prepare(&self, sql: &str) -> Result<Self::Statement>;

    /// Prepare `sql`, aborting if `cancel` fires
    async fn prepare_cancellable(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Statement> {
        cancellable(cancel, self.prepare(sql)).await
    }

    /// Execute `sql` with `params`, returning the number of affected rows
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult>;

    /// Cancellable form of [`Database::execute`]
    async fn execute_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        cancellable(cancel, self.execute(sql, params)).await
    }

    /// Run `sql` with `params` and collect the returned rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Cancellable form of [`Database::query`]
    async fn query_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        cancellable(cancel, self.query(sql, params)).await
    }

    /// Run `sql` with `params` and keep only the first row
    async fn query_row(&self, sql: &str, params: &[Value]) -> SingleRow;

    /// Cancellable form of [`Database::query_row`]
    async fn query_row_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => SingleRow::Failed(Error::Cancelled),
            row = self.query_row(sql, params) => row,
        }
    }

    /// Execute a prepared statement
    async fn execute_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<ExecuteResult>;

    /// Cancellable form of [`Database::execute_statement`]
    async fn execute_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        cancellable(cancel, self.execute_statement(statement, params)).await
    }

    /// Run a prepared statement and collect the returned rows
    async fn query_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<QueryResult>;

    /// Cancellable form of [`Database::query_statement`]
    async fn query_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        cancellable(cancel, self.query_statement(statement, params)).await
    }

    /// Run a prepared statement and keep only the first row
    async fn query_row_statement(&self, statement: &Self::Statement, params: &[Value])
        -> SingleRow;

    /// Cancellable form of [`Database::query_row_statement`]
    async fn query_row_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => SingleRow::Failed(Error::Cancelled),
            row = self.query_row_statement(statement, params) => row,
        }
    }
}
