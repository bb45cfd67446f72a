//! Prepared statement caching
//!
//! This module provides a client-side cache of prepared statement handles,
//! keyed by the literal SQL text. The first request for a given text prepares
//! it on the underlying database; every later request reuses the stored
//! handle and skips the prepare round-trip.
//!
//! # Locking
//!
//! The registry sits behind a single async mutex that is held for the whole
//! check-then-prepare-then-insert sequence. Two callers missing on the same
//! text are therefore serialized: exactly one of them prepares, the other
//! wakes up to a hit and receives the same `Arc`. Prepares for different
//! texts are serialized too. Executing a handle happens after the lock is
//! released.
//!
//! # Growth
//!
//! Entries are never evicted. The cache assumes the application issues a
//! bounded set of query texts; SQL built with inlined literals should go to
//! the underlying handle directly.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::database::{Database, ExecuteResult, QueryResult, SingleRow};
use crate::error::Result;
use crate::row::Value;

/// The cache used as a drop-in [`Database`]: every operation goes through the
/// registry.
pub type CachingProxy<D> = StatementCache<D>;

/// Counters describing how the cache has been used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Prepare requests served from the registry
    pub hits: u64,
    /// Prepare requests that reached the underlying database
    pub misses: u64,
    /// Misses that inserted nothing: the prepare failed, was cancelled, or
    /// its future was dropped before completing
    pub failures: u64,
}

/// Counts a miss as failed unless it completes
struct PendingPrepare<'a> {
    failures: &'a AtomicU64,
    completed: bool,
}

impl<'a> PendingPrepare<'a> {
    fn new(failures: &'a AtomicU64) -> Self {
        PendingPrepare {
            failures,
            completed: false,
        }
    }

    fn complete(mut self) {
        self.completed = true;
    }
}

impl Drop for PendingPrepare<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Client-side prepared statement cache over a [`Database`]
///
/// `StatementCache` implements [`Database`] itself, so it can stand in for the
/// handle it wraps. `execute`, `query` and `query_row` prepare through the
/// cache and then run the cached handle on the inner database.
///
/// # Example
///
/// ```rust,ignore
/// use stmtcache::{Config, Database, PgConnection, StatementCache};
///
/// let conn = PgConnection::connect(&Config::new("localhost", 5432, "app", "app", "secret")).await?;
/// let cache = StatementCache::new(conn);
///
/// // First call: prepares on the server
/// cache.query("SELECT name FROM users WHERE id = $1", &[1.into()]).await?;
///
/// // Second call: reuses the prepared statement, no prepare round-trip
/// cache.query("SELECT name FROM users WHERE id = $1", &[2.into()]).await?;
/// ```
pub struct StatementCache<D: Database> {
    /// The wrapped database handle
    db: D,
    /// SQL text to prepared handle
    registry: Mutex<IndexMap<String, Arc<D::Statement>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    failures: AtomicU64,
}

impl<D: Database> StatementCache<D> {
    /// Create an empty cache that owns `db`
    pub fn new(db: D) -> Self {
        Self {
            db,
            registry: Mutex::new(IndexMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Borrow the underlying database handle
    ///
    /// Calls made directly on the handle bypass the cache.
    pub fn inner(&self) -> &D {
        &self.db
    }

    /// Drop the cache and return the underlying database handle
    pub fn into_inner(self) -> D {
        self.db
    }

    /// Get the current number of cached statements
    pub async fn len(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.registry.lock().await.is_empty()
    }

    /// Check if a statement for `sql` has been cached
    pub async fn contains(&self, sql: &str) -> bool {
        self.registry.lock().await.contains_key(sql)
    }

    /// Cached SQL texts, in the order they were first prepared
    pub async fn queries(&self) -> Vec<String> {
        self.registry.lock().await.keys().cloned().collect()
    }

    /// Snapshot of the hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Look `sql` up and prepare it on a miss, all under the registry lock
    ///
    /// A hit never looks at `cancel`. If the prepare fails, or the future is
    /// dropped mid-prepare, nothing is inserted.
    async fn get_or_prepare(
        &self,
        sql: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Arc<D::Statement>> {
        let mut registry = self.registry.lock().await;

        if let Some(statement) = registry.get(sql) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(sql = sql, "Statement cache hit");
            return Ok(Arc::clone(statement));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(sql = sql, "Statement cache miss");

        let pending = PendingPrepare::new(&self.failures);
        let prepared = match cancel {
            Some(token) => self.db.prepare_cancellable(sql, token).await,
            None => self.db.prepare(sql).await,
        };

        let statement = match prepared {
            Ok(statement) => {
                pending.complete();
                Arc::new(statement)
            }
            Err(e) => {
                tracing::debug!(sql = sql, error = %e, "Prepare failed, nothing cached");
                return Err(e);
            }
        };

        registry.insert(sql.to_string(), Arc::clone(&statement));
        tracing::trace!(sql = sql, cached = registry.len(), "Adding statement to cache");
        Ok(statement)
    }
}

impl<D: Database> fmt::Debug for StatementCache<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<D: Database> Database for StatementCache<D> {
    type Statement = Arc<D::Statement>;

    async fn prepare(&self, sql: &str) -> Result<Self::Statement> {
        self.get_or_prepare(sql, None).await
    }

    async fn prepare_cancellable(
        &self,
        sql: &str,
        cancel: &CancellationToken,
    ) -> Result<Self::Statement> {
        self.get_or_prepare(sql, Some(cancel)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let statement = self.get_or_prepare(sql, None).await?;
        self.db.execute_statement(&statement, params).await
    }

    async fn execute_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        let statement = self.get_or_prepare(sql, Some(cancel)).await?;
        self.db
            .execute_statement_cancellable(&statement, params, cancel)
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let statement = self.get_or_prepare(sql, None).await?;
        self.db.query_statement(&statement, params).await
    }

    async fn query_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let statement = self.get_or_prepare(sql, Some(cancel)).await?;
        self.db
            .query_statement_cancellable(&statement, params, cancel)
            .await
    }

    /// Returns [`SingleRow::Absent`] when the statement cannot be prepared.
    async fn query_row(&self, sql: &str, params: &[Value]) -> SingleRow {
        match self.get_or_prepare(sql, None).await {
            Ok(statement) => self.db.query_row_statement(&statement, params).await,
            Err(e) => {
                tracing::debug!(sql = sql, error = %e, "Single-row query has no statement");
                SingleRow::Absent
            }
        }
    }

    /// Returns [`SingleRow::Absent`] when the statement cannot be prepared,
    /// including when preparation was cancelled.
    async fn query_row_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        match self.get_or_prepare(sql, Some(cancel)).await {
            Ok(statement) => {
                self.db
                    .query_row_statement_cancellable(&statement, params, cancel)
                    .await
            }
            Err(e) => {
                tracing::debug!(sql = sql, error = %e, "Single-row query has no statement");
                SingleRow::Absent
            }
        }
    }

    async fn execute_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<ExecuteResult> {
        self.db.execute_statement(statement, params).await
    }

    async fn execute_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.db
            .execute_statement_cancellable(statement, params, cancel)
            .await
    }

    async fn query_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> Result<QueryResult> {
        self.db.query_statement(statement, params).await
    }

    async fn query_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.db
            .query_statement_cancellable(statement, params, cancel)
            .await
    }

    async fn query_row_statement(
        &self,
        statement: &Self::Statement,
        params: &[Value],
    ) -> SingleRow {
        self.db.query_row_statement(statement, params).await
    }

    async fn query_row_statement_cancellable(
        &self,
        statement: &Self::Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        self.db
            .query_row_statement_cancellable(statement, params, cancel)
            .await
    }
}
