//! Opt-in caching wrapper
//!
//! [`CachingWrapper`] leaves the wrapped handle's own behavior untouched: its
//! [`Database`] implementation forwards every call, uncached. Cached execution
//! is requested per call through the `prepared_*` methods.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::database::{Database, ExecuteResult, QueryResult, SingleRow};
use crate::error::Result;
use crate::row::Value;
use crate::statement_cache::StatementCache;

/// A database handle with explicitly cached `prepared_*` variants
///
/// ```rust,ignore
/// let db = CachingWrapper::new(conn);
///
/// // Prepared once, reused on every call
/// db.prepared_execute("UPDATE jobs SET state = $1 WHERE id = $2", &["done".into(), 7.into()]).await?;
///
/// // One-off statement, straight to the driver
/// db.execute("VACUUM jobs", &[]).await?;
/// ```
#[derive(Debug)]
pub struct CachingWrapper<D: Database> {
    cache: StatementCache<D>,
}

impl<D: Database> CachingWrapper<D> {
    /// Wrap `db` with an empty statement cache
    pub fn new(db: D) -> Self {
        Self {
            cache: StatementCache::new(db),
        }
    }

    /// The statement cache backing the `prepared_*` methods
    pub fn cache(&self) -> &StatementCache<D> {
        &self.cache
    }

    /// Borrow the underlying database handle
    pub fn inner(&self) -> &D {
        self.cache.inner()
    }

    /// Drop the wrapper and its cache, returning the underlying handle
    pub fn into_inner(self) -> D {
        self.cache.into_inner()
    }

    /// [`Database::execute`] through the statement cache
    pub async fn prepared_execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        self.cache.execute(sql, params).await
    }

    /// [`Database::query`] through the statement cache
    pub async fn prepared_query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.cache.query(sql, params).await
    }

    /// [`Database::query_row`] through the statement cache
    ///
    /// Returns [`SingleRow::Absent`] when the statement cannot be prepared.
    pub async fn prepared_query_row(&self, sql: &str, params: &[Value]) -> SingleRow {
        self.cache.query_row(sql, params).await
    }

    /// [`Database::execute_cancellable`] through the statement cache
    pub async fn prepared_execute_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.cache.execute_cancellable(sql, params, cancel).await
    }

    /// [`Database::query_cancellable`] through the statement cache
    pub async fn prepared_query_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.cache.query_cancellable(sql, params, cancel).await
    }

    /// [`Database::query_row_cancellable`] through the statement cache
    pub async fn prepared_query_row_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        self.cache.query_row_cancellable(sql, params, cancel).await
    }
}

#[async_trait]
impl<D: Database> Database for CachingWrapper<D> {
    type Statement = D::Statement;

    async fn prepare(&self, sql: &str) -> Result<Self::Statement> {
        self.inner().prepare(sql).await
    }

    async fn prepare_cancellable(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Statement> {
        self.inner().prepare_cancellable(sql, cancel).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        self.inner().execute(sql, params).await
    }

    async fn execute_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.inner().execute_cancellable(sql, params, cancel).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.inner().query(sql, params).await
    }

    async fn query_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.inner().query_cancellable(sql, params, cancel).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> SingleRow {
        self.inner().query_row(sql, params).await
    }

    async fn query_row_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        self.inner().query_row_cancellable(sql, params, cancel).await
    }

    async fn execute_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<ExecuteResult> {
        self.inner().execute_statement(statement, params).await
    }

    async fn execute_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.inner()
            .execute_statement_cancellable(statement, params, cancel)
            .await
    }

    async fn query_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<QueryResult> {
        self.inner().query_statement(statement, params).await
    }

    async fn query_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.inner()
            .query_statement_cancellable(statement, params, cancel)
            .await
    }

    async fn query_row_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> SingleRow {
        self.inner().query_row_statement(statement, params).await
    }

    async fn query_row_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        self.inner()
            .query_row_statement_cancellable(statement, params, cancel)
            .await
    }
}
