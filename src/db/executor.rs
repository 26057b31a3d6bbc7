//! Query execution engine.
//!
//! This module provides query execution functionality with support for:
//! - Parameterized queries (always bound, never interpolated)
//! - Row and byte caps (enforced while streaming - rows past the cap are never read)
//! - Query timeouts (server-side `statement_timeout` plus a client-side backstop)
//!
//! Rows flow from a [`Session`] into a [`ResultBuilder`], which decides when to stop.

use crate::db::pool::ConnectionPool;
use crate::db::session::{Connector, Session};
use crate::error::{DbError, DbResult};
use crate::models::{
    AcceptedQuery, MAX_QUERY_TIMEOUT_SECS, QueryResult, ResultLimits, Truncation,
};
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// SQLSTATE for `query_canceled`, raised when `statement_timeout` fires.
const SQLSTATE_QUERY_CANCELED: &str = "57014";

/// Extra time the client waits past the server-side timeout before giving up on the
/// session itself.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(2);

/// Accumulates a result while enforcing [`ResultLimits`].
#[derive(Debug)]
pub struct ResultBuilder {
    limits: ResultLimits,
    columns: Vec<String>,
    rows: Vec<Vec<JsonValue>>,
    bytes: usize,
    truncation: Option<Truncation>,
}

impl ResultBuilder {
    pub fn new(limits: ResultLimits) -> Self {
        Self {
            limits,
            columns: Vec::new(),
            rows: Vec::new(),
            bytes: 0,
            truncation: None,
        }
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Set the column names, suffixing duplicates (`id`, `id_2`, ...) so every name
    /// is unique within the result.
    pub fn set_columns<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen: HashSet<String> = HashSet::new();
        self.columns = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                if seen.insert(name.clone()) {
                    return name;
                }
                let mut n = 2;
                loop {
                    let candidate = format!("{}_{}", name, n);
                    if seen.insert(candidate.clone()) {
                        return candidate;
                    }
                    n += 1;
                }
            })
            .collect();
    }

    /// Append one row. Returns `Break` once a cap is hit; the row that would cross
    /// the cap is not kept.
    pub fn push_row(&mut self, row: Vec<JsonValue>) -> ControlFlow<()> {
        if self.truncation.is_some() {
            return ControlFlow::Break(());
        }
        if self.rows.len() >= self.limits.max_rows {
            self.truncation = Some(Truncation::RowLimit(self.limits.max_rows));
            return ControlFlow::Break(());
        }

        // Serialized size plus one separator
        let size = serde_json::to_string(&row)
            .map(|s| s.len())
            .unwrap_or_default()
            + 1;
        if self.bytes + size > self.limits.max_bytes {
            self.truncation = Some(Truncation::ByteLimit(self.limits.max_bytes));
            return ControlFlow::Break(());
        }

        self.bytes += size;
        self.rows.push(row);
        ControlFlow::Continue(())
    }

    pub fn is_truncated(&self) -> bool {
        self.truncation.is_some()
    }

    pub fn finish(self, elapsed: Duration) -> QueryResult {
        QueryResult {
            columns: self.columns,
            rows: self.rows,
            truncated: self.truncation.is_some(),
            truncation: self.truncation,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Query executor that runs guarded statements on pooled sessions.
pub struct QueryExecutor<C: Connector> {
    pool: ConnectionPool<C>,
    limits: ResultLimits,
    default_timeout: Duration,
}

impl<C: Connector> QueryExecutor<C> {
    pub fn new(pool: ConnectionPool<C>, limits: ResultLimits, default_timeout: Duration) -> Self {
        Self {
            pool,
            limits,
            default_timeout,
        }
    }

    pub fn limits(&self) -> ResultLimits {
        self.limits
    }

    /// Resolve the timeout for one call: the requested value clamped to
    /// `[1, MAX_QUERY_TIMEOUT_SECS]`, or the configured default.
    pub fn effective_timeout(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            Some(secs) => Duration::from_secs(secs.clamp(1, MAX_QUERY_TIMEOUT_SECS)),
            None => self.default_timeout,
        }
    }

    /// Execute an accepted statement and return its (possibly truncated) result.
    ///
    /// The handle is always released: healthy after success or a SQL error, unhealthy
    /// after a connection-level failure or a timeout. When the client-side backstop
    /// fires, the server is asked to cancel the statement before the session goes.
    pub async fn execute(&self, query: &AcceptedQuery) -> DbResult<QueryResult> {
        let timeout = self.effective_timeout(query.request().timeout_secs);
        let mut handle = self.pool.acquire().await?;
        let handle_id = handle.id();

        debug!(
            handle_id,
            params = query.params().len(),
            timeout_secs = timeout.as_secs(),
            "Executing query"
        );

        let start = Instant::now();
        let mut builder = ResultBuilder::new(self.limits);
        let mut backstop_fired = false;
        let outcome = match handle.session() {
            Ok(session) => {
                let fetch = session.fetch(query.sql(), query.params(), timeout, &mut builder);
                match tokio::time::timeout(timeout + CLIENT_TIMEOUT_GRACE, fetch).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) if e.sql_state() == Some(SQLSTATE_QUERY_CANCELED) => {
                        Err(DbError::timeout("query", timeout))
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        backstop_fired = true;
                        Err(DbError::timeout("query", timeout))
                    }
                }
            }
            Err(e) => Err(e),
        };

        if backstop_fired {
            warn!(handle_id, "Server did not stop the statement in time, cancelling it");
            handle.cancel_statement().await;
        }

        let healthy = outcome
            .as_ref()
            .err()
            .is_none_or(|e| !e.is_connection_level());
        handle.release(healthy).await;

        if let Err(e) = outcome {
            warn!(handle_id, healthy, error = %e, "Query failed");
            return Err(e);
        }

        let result = builder.finish(start.elapsed());
        info!(
            handle_id,
            row_count = result.row_count(),
            truncated = result.truncated,
            elapsed_ms = result.execution_time_ms,
            "Query executed"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::db::session::mock::{MockConnector, MockFailure};
    use crate::models::QueryRequest;
    use crate::tools::sql_validator::admit;
    use serde_json::json;
    use std::sync::Arc;

    fn limits(max_rows: usize, max_bytes: usize) -> ResultLimits {
        ResultLimits {
            max_rows,
            max_bytes,
        }
    }

    async fn executor(
        connector: &MockConnector,
        max_size: u32,
        limits: ResultLimits,
    ) -> QueryExecutor<MockConnector> {
        let settings = PoolSettings {
            min_size: 1,
            max_size,
            ..PoolSettings::default()
        };
        let pool = ConnectionPool::open(connector.clone(), settings)
            .await
            .unwrap();
        QueryExecutor::new(pool, limits, Duration::from_secs(30))
    }

    fn accepted(sql: &str) -> AcceptedQuery {
        admit(QueryRequest::new(sql)).unwrap()
    }

    #[test]
    fn test_builder_row_cap() {
        let mut builder = ResultBuilder::new(limits(2, usize::MAX));
        builder.set_columns(["n"]);
        assert!(builder.push_row(vec![json!(1)]).is_continue());
        assert!(builder.push_row(vec![json!(2)]).is_continue());
        assert!(!builder.is_truncated());
        assert!(builder.push_row(vec![json!(3)]).is_break());

        let result = builder.finish(Duration::ZERO);
        assert_eq!(result.row_count(), 2);
        assert!(result.truncated);
        assert_eq!(result.truncation, Some(Truncation::RowLimit(2)));
    }

    #[test]
    fn test_builder_exact_row_count_is_not_truncated() {
        let mut builder = ResultBuilder::new(limits(2, usize::MAX));
        builder.set_columns(["n"]);
        let _ = builder.push_row(vec![json!(1)]);
        let _ = builder.push_row(vec![json!(2)]);
        let result = builder.finish(Duration::ZERO);
        assert_eq!(result.row_count(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn test_builder_byte_cap() {
        // Each row serializes to `["xxxx"]` (8 bytes) + 1 separator
        let mut builder = ResultBuilder::new(limits(100, 20));
        builder.set_columns(["s"]);
        assert!(builder.push_row(vec![json!("xxxx")]).is_continue());
        assert!(builder.push_row(vec![json!("xxxx")]).is_continue());
        assert!(builder.push_row(vec![json!("xxxx")]).is_break());

        let result = builder.finish(Duration::ZERO);
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.truncation, Some(Truncation::ByteLimit(20)));
    }

    #[test]
    fn test_builder_dedupes_column_names() {
        let mut builder = ResultBuilder::new(ResultLimits::default());
        builder.set_columns(["id", "name", "id", "id_2", "id"]);
        let result = builder.finish(Duration::ZERO);
        assert_eq!(result.columns, vec!["id", "name", "id_2", "id_2_2", "id_3"]);
    }

    #[tokio::test]
    async fn test_select_one() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 2, ResultLimits::default()).await;

        let result = executor.execute(&accepted("SELECT 1")).await.unwrap();
        assert_eq!(result.columns.len(), 1);
        assert_eq!(result.rows, vec![vec![json!(1)]]);
        assert!(!result.truncated);
        assert_eq!(executor.pool.status().leased, 0);
    }

    #[tokio::test]
    async fn test_row_cap_returns_exactly_cap_rows() {
        let connector = MockConnector::new();
        connector.set_result(&["n"], (0..50).map(|i| vec![json!(i)]).collect());
        let executor = executor(&connector, 2, limits(10, usize::MAX)).await;

        let result = executor
            .execute(&accepted("SELECT n FROM numbers"))
            .await
            .unwrap();
        assert_eq!(result.row_count(), 10);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_sql_error_keeps_session() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;

        connector.fail_next(MockFailure::Sql);
        let err = executor
            .execute(&accepted("SELECT * FROM missing"))
            .await
            .unwrap_err();
        assert_eq!(err.sql_state(), Some("42P01"));
        assert_eq!(connector.closes(), 0);

        executor.execute(&accepted("SELECT 1")).await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_connection_error_discards_session() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;

        connector.fail_next(MockFailure::Connection);
        let err = executor.execute(&accepted("SELECT 1")).await.unwrap_err();
        assert!(err.is_connection_level());
        assert_eq!(connector.closes(), 1);

        executor.execute(&accepted("SELECT 1")).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_session() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;
        connector.set_delay(Duration::from_secs(600));

        let query = admit(QueryRequest::new("SELECT pg_sleep(600)").with_timeout(1)).unwrap();
        let err = executor.execute(&query).await.unwrap_err();
        assert!(matches!(err, DbError::Timeout { elapsed_secs: 1, .. }));
        assert_eq!(connector.cancels(), 1);
        assert_eq!(connector.closes(), 1);
        assert_eq!(executor.pool.status().leased, 0);
    }

    #[tokio::test]
    async fn test_server_timeout_needs_no_cancel() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;

        connector.fail_next(MockFailure::Canceled);
        let err = executor.execute(&accepted("SELECT 1")).await.unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert_eq!(connector.cancels(), 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_effective_timeout_clamped() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;
        assert_eq!(executor.effective_timeout(None), Duration::from_secs(30));
        assert_eq!(executor.effective_timeout(Some(0)), Duration::from_secs(1));
        assert_eq!(executor.effective_timeout(Some(5)), Duration::from_secs(5));
        assert_eq!(
            executor.effective_timeout(Some(10_000)),
            Duration::from_secs(300)
        );
    }

    #[tokio::test]
    async fn test_requested_timeout_reaches_session() {
        let connector = MockConnector::new();
        let executor = executor(&connector, 1, ResultLimits::default()).await;

        let query = admit(QueryRequest::new("SELECT 1").with_timeout(10_000)).unwrap();
        executor.execute(&query).await.unwrap();
        executor.execute(&accepted("SELECT 1")).await.unwrap();

        let seen = connector.state.timeouts_seen.lock().unwrap().clone();
        assert_eq!(seen, vec![Duration::from_secs(300), Duration::from_secs(30)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_of_one_serializes_queries() {
        let connector = MockConnector::new();
        connector.set_delay(Duration::from_millis(100));
        let executor = Arc::new(executor(&connector, 1, ResultLimits::default()).await);

        let a = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&accepted("SELECT 1")).await })
        };
        let b = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute(&accepted("SELECT 1")).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.rows, vec![vec![json!(1)]]);
        assert_eq!(b.rows, vec![vec![json!(1)]]);
        assert_eq!(connector.max_active(), 1);
        assert_eq!(connector.fetches(), 2);
    }
}
