//! PostgreSQL driver
//!
//! [`PgConnection`] implements [`Database`] on top of `tokio-postgres`. Its
//! raw-text operations prepare a fresh server-side statement on every call and
//! close it when the handle drops, which is exactly the round-trip a
//! [`StatementCache`](crate::StatementCache) in front of it saves.
//!
//! Cancelling an operation always abandons the caller's own request. The
//! server is asked to cancel only when no other request is in flight on the
//! connection, since a cancel request stops whatever the backend is running.

use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use postgres_types::{FromSql, IsNull, ToSql, Type};
use tokio_postgres::{CancelToken, Client, NoTls, Row as PgRow, Statement};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::database::{Database, ExecuteResult, QueryResult, SingleRow};
use crate::error::{Error, Result};
use crate::row::{Row, Value};

impl From<tokio_postgres::Error> for Error {
    fn from(error: tokio_postgres::Error) -> Self {
        if let Some(db_error) = error.as_db_error() {
            let mut message = db_error.message().to_string();
            if let Some(detail) = db_error.detail().filter(|d| !d.trim().is_empty()) {
                message.push_str(&format!(" (detail: {})", detail));
            }
            if let Some(hint) = db_error.hint().filter(|h| !h.trim().is_empty()) {
                message.push_str(&format!(" (hint: {})", hint));
            }
            return Error::database(db_error.code().code(), message);
        }
        if error.is_closed() {
            return Error::ConnectionClosed;
        }
        Error::Sql(error.to_string())
    }
}

/// Bind a [`Value`] to a parameter of the type PostgreSQL inferred for it.
///
/// Integers and floats are narrowed or widened to the declared column type so
/// the wire encoding has the width the server expects; everything else is
/// encoded by its natural Rust type.
impl ToSql for Value {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn StdError + Sync + Send>> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Boolean(v) => v.to_sql(ty, out),
            Value::Integer(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::OID => u32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                Type::TEXT | Type::VARCHAR => v.to_string().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::String(v) => v.as_str().to_sql(ty, out),
            Value::Bytes(v) => v.as_slice().to_sql(ty, out),
            Value::Json(v) => v.to_sql(ty, out),
            Value::Date(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => v.to_sql(ty, out),
            Value::TimestampTz(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// Raw column bytes for types without a dedicated mapping
struct RawColumn(Vec<u8>);

impl<'a> FromSql<'a> for RawColumn {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(RawColumn(raw.to_vec()))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn get_column<'a, T>(row: &'a PgRow, idx: usize, wrap: impl FnOnce(T) -> Value) -> Result<Value>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx)
        .map(|v| v.map_or(Value::Null, wrap))
        .map_err(|e| Error::DataConversion(format!("column {}: {}", idx, e)))
}

/// Convert one column of a PostgreSQL row to a [`Value`]
fn postgres_to_value(row: &PgRow, idx: usize) -> Result<Value> {
    let ty = row.columns()[idx].type_().clone();

    match ty {
        Type::BOOL => get_column(row, idx, Value::Boolean),
        Type::INT2 => get_column(row, idx, |v: i16| Value::Integer(v.into())),
        Type::INT4 => get_column(row, idx, |v: i32| Value::Integer(v.into())),
        Type::INT8 => get_column(row, idx, Value::Integer),
        Type::OID => get_column(row, idx, |v: u32| Value::Integer(v.into())),
        Type::FLOAT4 => get_column(row, idx, |v: f32| Value::Float(v.into())),
        Type::FLOAT8 => get_column(row, idx, Value::Float),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get_column(row, idx, Value::String)
        }
        Type::BYTEA => get_column(row, idx, Value::Bytes),
        Type::JSON | Type::JSONB => get_column(row, idx, Value::Json),
        Type::DATE => get_column(row, idx, Value::Date),
        Type::TIMESTAMP => get_column(row, idx, Value::Timestamp),
        Type::TIMESTAMPTZ => get_column(row, idx, Value::TimestampTz),
        _ => get_column(row, idx, |raw: RawColumn| match String::from_utf8(raw.0) {
            Ok(text) => Value::String(text),
            Err(e) => Value::Bytes(e.into_bytes()),
        }),
    }
}

fn convert_row(row: &PgRow, names: &[String]) -> Result<Row> {
    let values = (0..row.len())
        .map(|idx| postgres_to_value(row, idx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Row::with_names(values, names.to_vec()))
}

fn column_names(statement: &Statement) -> Vec<String> {
    statement
        .columns()
        .iter()
        .map(|c| c.name().to_string())
        .collect()
}

fn bind_params(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// PostgreSQL connection
///
/// The client is shared by every operation; `tokio-postgres` pipelines
/// concurrent requests over the single connection.
pub struct PgConnection {
    client: Client,
    cancel_token: CancelToken,
    in_flight: AtomicUsize,
}

/// Counts one client request as in flight until dropped
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PgConnection {
    /// Connect to a PostgreSQL database
    ///
    /// The connection task is spawned onto the current Tokio runtime.
    pub async fn connect(config: &Config) -> Result<Self> {
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connecting to PostgreSQL database"
        );

        let pg_config = config.to_pg_config();
        let (client, connection) =
            tokio::time::timeout(config.connect_timeout, pg_config.connect(NoTls))
                .await
                .map_err(|_| Error::ConnectionTimeout(config.connect_timeout))?
                .map_err(|e| Error::Connection(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection error");
            }
        });

        let cancel_token = client.cancel_token();
        tracing::info!(host = %config.host, port = config.port, "PostgreSQL connection established");

        Ok(Self {
            client,
            cancel_token,
            in_flight: AtomicUsize::new(0),
        })
    }

    /// Check whether the connection has been closed
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Number of client requests currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run `fut`, abandoning it if `cancel` fires
    ///
    /// The server-side cancel is only sent while no other caller has a request
    /// in flight, so it cannot hit another caller's query.
    async fn with_server_cancel<F, T>(&self, cancel: &CancellationToken, fut: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = fut => Some(result),
        };

        // `fut` and its in-flight guards are gone once the select completes
        match outcome {
            Some(result) => result,
            None => {
                let others = self.in_flight();
                if others == 0 {
                    tracing::debug!("Sending cancel request to PostgreSQL server");
                    if let Err(e) = self.cancel_token.cancel_query(NoTls).await {
                        tracing::warn!(error = %e, "Failed to cancel PostgreSQL query");
                    }
                } else {
                    tracing::debug!(
                        in_flight = others,
                        "Skipping server cancel, connection is shared with other requests"
                    );
                }
                Err(Error::Cancelled)
            }
        }
    }

    async fn fetch_rows(&self, statement: &Statement, params: &[Value]) -> Result<Vec<Row>> {
        let names = column_names(statement);
        let _guard = InFlightGuard::new(&self.in_flight);
        let rows = self.client.query(statement, &bind_params(params)).await?;
        rows.iter().map(|row| convert_row(row, &names)).collect()
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("closed", &self.client.is_closed())
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Database for PgConnection {
    type Statement = Statement;

    async fn prepare(&self, sql: &str) -> Result<Statement> {
        let _guard = InFlightGuard::new(&self.in_flight);
        Ok(self.client.prepare(sql).await?)
    }

    async fn prepare_cancellable(&self, sql: &str, cancel: &CancellationToken) -> Result<Statement> {
        self.with_server_cancel(cancel, self.prepare(sql)).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let statement = self.prepare(sql).await?;
        self.execute_statement(&statement, params).await
    }

    async fn execute_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.with_server_cancel(cancel, self.execute(sql, params)).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let statement = self.prepare(sql).await?;
        self.query_statement(&statement, params).await
    }

    async fn query_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.with_server_cancel(cancel, self.query(sql, params)).await
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> SingleRow {
        match self.prepare(sql).await {
            Ok(statement) => self.query_row_statement(&statement, params).await,
            Err(e) => SingleRow::Failed(e),
        }
    }

    async fn query_row_cancellable(
        &self,
        sql: &str,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        let fut = async {
            let statement = self.prepare(sql).await?;
            self.fetch_rows(&statement, params).await
        };
        SingleRow::from_rows(self.with_server_cancel(cancel, fut).await)
    }

    async fn execute_statement(
        &self,
        statement: &Statement,
        params: &[Value],
    ) -> Result<ExecuteResult> {
        let _guard = InFlightGuard::new(&self.in_flight);
        let rows_affected = self.client.execute(statement, &bind_params(params)).await?;
        Ok(ExecuteResult::new(rows_affected))
    }

    async fn execute_statement_cancellable(
        &self,
        statement: &Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<ExecuteResult> {
        self.with_server_cancel(cancel, self.execute_statement(statement, params))
            .await
    }

    async fn query_statement(&self, statement: &Statement, params: &[Value]) -> Result<QueryResult> {
        let rows = self.fetch_rows(statement, params).await?;
        Ok(QueryResult::new(column_names(statement), rows))
    }

    async fn query_statement_cancellable(
        &self,
        statement: &Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        self.with_server_cancel(cancel, self.query_statement(statement, params))
            .await
    }

    async fn query_row_statement(&self, statement: &Statement, params: &[Value]) -> SingleRow {
        SingleRow::from_rows(self.fetch_rows(statement, params).await)
    }

    async fn query_row_statement_cancellable(
        &self,
        statement: &Statement,
        params: &[Value],
        cancel: &CancellationToken,
    ) -> SingleRow {
        SingleRow::from_rows(
            self.with_server_cancel(cancel, self.fetch_rows(statement, params))
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: &Value, ty: &Type) -> Vec<u8> {
        let mut out = BytesMut::new();
        let is_null = value.to_sql_checked(ty, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::No));
        out.to_vec()
    }

    #[test]
    fn test_integer_narrowed_to_column_type() {
        assert_eq!(encode(&Value::Integer(7), &Type::INT2), 7i16.to_be_bytes());
        assert_eq!(encode(&Value::Integer(7), &Type::INT4), 7i32.to_be_bytes());
        assert_eq!(encode(&Value::Integer(7), &Type::INT8), 7i64.to_be_bytes());
    }

    #[test]
    fn test_integer_out_of_range() {
        let mut out = BytesMut::new();
        let result = Value::Integer(i64::MAX).to_sql_checked(&Type::INT4, &mut out);
        assert!(result.is_err());
    }

    #[test]
    fn test_float_widths() {
        assert_eq!(encode(&Value::Float(1.5), &Type::FLOAT4), 1.5f32.to_be_bytes());
        assert_eq!(encode(&Value::Float(1.5), &Type::FLOAT8), 1.5f64.to_be_bytes());
        assert_eq!(encode(&Value::Integer(2), &Type::FLOAT8), 2.0f64.to_be_bytes());
    }

    #[test]
    fn test_null_and_text() {
        let mut out = BytesMut::new();
        let is_null = Value::Null.to_sql_checked(&Type::INT4, &mut out).unwrap();
        assert!(matches!(is_null, IsNull::Yes));

        assert_eq!(encode(&Value::String("abc".into()), &Type::TEXT), b"abc");
        assert_eq!(encode(&Value::Integer(42), &Type::TEXT), b"42");
    }

    #[test]
    fn test_in_flight_guard_counts_until_dropped() {
        let counter = AtomicUsize::new(0);
        let outer = InFlightGuard::new(&counter);
        {
            let _inner = InFlightGuard::new(&counter);
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        drop(outer);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_bytes_and_bool() {
        assert_eq!(encode(&Value::Bytes(vec![0xde, 0xad]), &Type::BYTEA), [0xde, 0xad]);
        assert_eq!(encode(&Value::Boolean(true), &Type::BOOL), [1]);
    }
}
