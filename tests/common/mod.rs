//! In-memory test double for the `Database` trait
//!
//! Every prepare is counted and gets a fresh id, so tests can tell whether a
//! statement handle was reused or recreated.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use stmtcache::{Database, Error, ExecuteResult, QueryResult, Result, Row, SingleRow, Value};
use tokio::sync::Notify;

/// Statement handle produced by [`StubDatabase`]
#[derive(Debug, PartialEq, Eq)]
pub struct StubStatement {
    /// SQL text the statement was prepared from
    pub sql: String,
    /// Sequence number of the prepare call that created it
    pub id: usize,
}

/// One execution of a statement, as seen by the stub
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub sql: String,
    pub statement_id: usize,
    pub params: Vec<Value>,
}

#[derive(Default)]
pub struct StubDatabase {
    prepare_calls: AtomicUsize,
    raw_calls: AtomicUsize,
    last_prepare_sql: Mutex<Option<String>>,
    failing: Mutex<HashSet<String>>,
    failing_execution: Mutex<HashSet<String>>,
    executions: Mutex<Vec<Execution>>,
    prepare_delay: Option<Duration>,
    prepare_gate: Option<Notify>,
    execute_gate: Option<Notify>,
    blocked_executions: AtomicUsize,
}

impl StubDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every prepare sleeps for `delay` before completing
    pub fn with_prepare_delay(mut self, delay: Duration) -> Self {
        self.prepare_delay = Some(delay);
        self
    }

    /// Every prepare waits until [`StubDatabase::open_gate`] is called
    pub fn with_prepare_gate(mut self) -> Self {
        self.prepare_gate = Some(Notify::new());
        self
    }

    /// Let one waiting (or the next) gated prepare through
    pub fn open_gate(&self) {
        if let Some(gate) = &self.prepare_gate {
            gate.notify_one();
        }
    }

    /// Every statement execution waits until [`StubDatabase::open_execute_gate`] is called
    pub fn with_execute_gate(mut self) -> Self {
        self.execute_gate = Some(Notify::new());
        self
    }

    /// Let one waiting (or the next) gated execution through
    pub fn open_execute_gate(&self) {
        if let Some(gate) = &self.execute_gate {
            gate.notify_one();
        }
    }

    /// Number of executions that have reached the execute gate
    pub fn blocked_executions(&self) -> usize {
        self.blocked_executions.load(Ordering::SeqCst)
    }

    async fn wait_execute_gate(&self) {
        if let Some(gate) = &self.execute_gate {
            self.blocked_executions.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
        }
    }

    /// Make prepares of `sql` fail until [`StubDatabase::recover`] is called
    pub fn fail_prepare(&self, sql: &str) {
        self.failing.lock().unwrap().insert(sql.to_string());
    }

    /// Make executions of statements prepared from `sql` fail
    pub fn fail_execution(&self, sql: &str) {
        self.failing_execution.lock().unwrap().insert(sql.to_string());
    }

    /// Let prepares of `sql` succeed again
    pub fn recover(&self, sql: &str) {
        self.failing.lock().unwrap().remove(sql);
    }

    pub fn prepare_count(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    /// Number of uncached raw-text operations
    pub fn raw_count(&self) -> usize {
        self.raw_calls.load(Ordering::SeqCst)
    }

    pub fn last_prepare_sql(&self) -> Option<String> {
        self.last_prepare_sql.lock().unwrap().clone()
    }

    pub fn executions(&self) -> Vec<Execution> {
        self.executions.lock().unwrap().clone()
    }

    fn record(&self, statement: &StubStatement, params: &[Value]) -> Result<()> {
        if self.failing_execution.lock().unwrap().contains(&statement.sql) {
            return Err(Error::database("57014", "canceling statement due to user request"));
        }
        self.executions.lock().unwrap().push(Execution {
            sql: statement.sql.clone(),
            statement_id: statement.id,
            params: params.to_vec(),
        });
        Ok(())
    }

    /// Echo the parameters back as a single row, named `p1`, `p2`, ...
    fn echo(statement: &StubStatement, params: &[Value]) -> QueryResult {
        if statement.sql.contains("WHERE FALSE") {
            return QueryResult::empty();
        }
        let names: Vec<String> = (1..=params.len()).map(|i| format!("p{}", i)).collect();
        let row = Row::with_names(params.to_vec(), names.clone());
        QueryResult::new(names, vec![row])
    }
}

#[async_trait]
impl Database for StubDatabase {
    type Statement = StubStatement;

    async fn prepare(&self, sql: &str) -> Result<StubStatement> {
        let id = self.prepare_calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_prepare_sql.lock().unwrap() = Some(sql.to_string());

        if let Some(delay) = self.prepare_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(gate) = &self.prepare_gate {
            gate.notified().await;
        }

        if self.failing.lock().unwrap().contains(sql) {
            return Err(Error::Sql(format!("syntax error at or near \"{}\"", sql)));
        }
        Ok(StubStatement {
            sql: sql.to_string(),
            id,
        })
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        let statement = self.prepare(sql).await?;
        self.execute_statement(&statement, params).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        let statement = self.prepare(sql).await?;
        self.query_statement(&statement, params).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> SingleRow {
        self.raw_calls.fetch_add(1, Ordering::SeqCst);
        match self.prepare(sql).await {
            Ok(statement) => self.query_row_statement(&statement, params).await,
            Err(e) => SingleRow::Failed(e),
        }
    }

    async fn execute_statement(
        &self,
        statement: &StubStatement,
        params: &[Value],
    ) -> Result<ExecuteResult> {
        self.wait_execute_gate().await;
        self.record(statement, params)?;
        Ok(ExecuteResult::new(params.len() as u64))
    }

    async fn query_statement(
        &self,
        statement: &StubStatement,
        params: &[Value],
    ) -> Result<QueryResult> {
        self.wait_execute_gate().await;
        self.record(statement, params)?;
        Ok(Self::echo(statement, params))
    }

    async fn query_row_statement(&self, statement: &StubStatement, params: &[Value]) -> SingleRow {
        SingleRow::from_rows(self.query_statement(statement, params).await.map(|r| r.rows))
    }
}
