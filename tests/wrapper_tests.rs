//! Tests for the opt-in caching wrapper
//!
//! The wrapper's `Database` methods must reach the driver uncached, while the
//! `prepared_*` family shares one statement cache.

mod common;

use common::StubDatabase;
use stmtcache::{CachingProxy, CachingWrapper, CancellationToken, Database, Value};

#[tokio::test]
async fn test_plain_operations_bypass_cache() {
    let db = CachingWrapper::new(StubDatabase::new());
    let sql = "SELECT 1";

    db.execute(sql, &[]).await.unwrap();
    db.execute(sql, &[]).await.unwrap();

    assert_eq!(db.inner().prepare_count(), 2);
    assert_eq!(db.inner().raw_count(), 2);
    assert!(db.cache().is_empty().await);
}

#[tokio::test]
async fn test_plain_prepare_is_uncached() {
    let db = CachingWrapper::new(StubDatabase::new());

    let first = db.prepare("SELECT 1").await.unwrap();
    let second = db.prepare("SELECT 1").await.unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(db.inner().prepare_count(), 2);
}

#[tokio::test]
async fn test_prepared_variants_share_cache() {
    let db = CachingWrapper::new(StubDatabase::new());
    let sql = "SELECT $1";

    db.prepared_execute(sql, &[1.into()]).await.unwrap();
    let rows = db.prepared_query(sql, &[2.into()]).await.unwrap();
    let row = db.prepared_query_row(sql, &[3.into()]).await.into_row().unwrap();

    assert_eq!(rows.rows[0].get_i64(0), Some(2));
    assert_eq!(row.get_i64(0), Some(3));
    assert_eq!(db.inner().prepare_count(), 1);
    assert_eq!(db.inner().raw_count(), 0);
    assert_eq!(db.cache().queries().await, vec![sql]);
}

#[tokio::test]
async fn test_mixing_cached_and_uncached() {
    let db = CachingWrapper::new(StubDatabase::new());
    let sql = "UPDATE t SET x = $1";

    db.prepared_execute(sql, &[1.into()]).await.unwrap();
    db.execute(sql, &[2.into()]).await.unwrap();
    db.prepared_execute(sql, &[3.into()]).await.unwrap();

    let executions = db.inner().executions();
    assert_eq!(db.inner().prepare_count(), 2);
    assert_eq!(executions[0].statement_id, executions[2].statement_id);
    assert_ne!(executions[0].statement_id, executions[1].statement_id);
    assert_eq!(executions[1].params, vec![Value::Integer(2)]);
}

#[tokio::test]
async fn test_prepared_query_row_absent_on_prepare_failure() {
    let db = CachingWrapper::new(StubDatabase::new());
    db.inner().fail_prepare("SELECT nope");

    assert!(db.prepared_query_row("SELECT nope", &[]).await.is_absent());
    assert!(db.prepared_query("SELECT nope", &[]).await.is_err());

    // The uncached single-row path reports the failure on consumption instead
    let row = db.query_row("SELECT nope", &[]).await;
    assert!(!row.is_absent());
    assert!(row.into_row().is_err());
}

#[tokio::test]
async fn test_prepared_cancellable_variants() {
    let db = CachingWrapper::new(StubDatabase::new());
    let token = CancellationToken::new();

    let result = db
        .prepared_execute_cancellable("INSERT INTO t VALUES ($1)", &[1.into()], &token)
        .await
        .unwrap();
    assert_eq!(result.rows_affected, 1);

    let rows = db
        .prepared_query_cancellable("SELECT $1", &[2.into()], &token)
        .await
        .unwrap();
    assert_eq!(rows.row_count(), 1);

    token.cancel();
    let row = db
        .prepared_query_row_cancellable("SELECT $1", &[3.into()], &token)
        .await;
    assert!(row.into_row().unwrap_err().is_cancelled());
    assert_eq!(db.inner().prepare_count(), 2);
}

#[tokio::test]
async fn test_into_inner() {
    let db = CachingWrapper::new(StubDatabase::new());
    db.prepared_execute("DELETE FROM t", &[]).await.unwrap();

    let stub = db.into_inner();
    assert_eq!(stub.executions().len(), 1);
}

#[tokio::test]
async fn test_proxy_is_the_cache() {
    let proxy: CachingProxy<StubDatabase> = CachingProxy::new(StubDatabase::new());

    proxy.execute("DELETE FROM t", &[]).await.unwrap();
    proxy.execute("DELETE FROM t", &[]).await.unwrap();

    assert_eq!(proxy.inner().prepare_count(), 1);
    assert_eq!(proxy.stats().hits, 1);
}
