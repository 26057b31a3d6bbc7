//! Schema cache.
//!
//! Holds the last introspected [`SchemaSnapshot`] behind an atomic pointer. Readers
//! load the current `Arc` without locking; a refresh builds a complete new snapshot
//! and swaps it in, so nobody observes a half-built one.
//!
//! Refreshes are single-flight: concurrent callers that find the snapshot stale wait
//! on one refresh instead of each introspecting the database.

use crate::db::pool::{ConnectionHandle, ConnectionPool};
use crate::db::session::{Connector, Session};
use crate::error::{DbError, DbResult};
use crate::models::{SchemaSnapshot, TableDescriptor};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

struct Cached {
    snapshot: Arc<SchemaSnapshot>,
    loaded_at: Instant,
}

impl Cached {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.loaded_at.elapsed() < ttl
    }
}

pub struct SchemaCache<C: Connector> {
    pool: ConnectionPool<C>,
    schema: String,
    ttl: Duration,
    current: ArcSwapOption<Cached>,
    refresh_lock: Mutex<()>,
}

impl<C: Connector> SchemaCache<C> {
    pub fn new(pool: ConnectionPool<C>, schema: impl Into<String>, ttl: Duration) -> Self {
        Self {
            pool,
            schema: schema.into(),
            ttl,
            current: ArcSwapOption::empty(),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Database schema this cache introspects.
    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Return the cached snapshot if younger than the TTL, otherwise refresh first.
    ///
    /// A failed refresh leaves the previous snapshot in place and returns the error.
    pub async fn get(&self, force_refresh: bool) -> DbResult<Arc<SchemaSnapshot>> {
        let observed = self.current.load_full();
        if !force_refresh {
            if let Some(cached) = observed.as_ref().filter(|c| c.is_fresh(self.ttl)) {
                debug!(schema = %self.schema, "Schema cache hit");
                return Ok(Arc::clone(&cached.snapshot));
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have swapped in a new snapshot while we waited
        if let Some(current) = self.current.load_full() {
            let swapped = observed
                .as_ref()
                .is_none_or(|seen| !Arc::ptr_eq(seen, &current));
            if swapped || (!force_refresh && current.is_fresh(self.ttl)) {
                debug!(schema = %self.schema, "Schema refreshed by concurrent caller");
                return Ok(Arc::clone(&current.snapshot));
            }
        }

        let snapshot = Arc::new(self.load().await?);
        self.current.store(Some(Arc::new(Cached {
            snapshot: Arc::clone(&snapshot),
            loaded_at: Instant::now(),
        })));
        info!(
            schema = %self.schema,
            tables = snapshot.tables.len(),
            columns = snapshot.column_count(),
            "Schema cache refreshed"
        );
        Ok(snapshot)
    }

    /// The current snapshot regardless of age, without touching the database.
    pub fn cached(&self) -> Option<Arc<SchemaSnapshot>> {
        self.current
            .load_full()
            .map(|cached| Arc::clone(&cached.snapshot))
    }

    /// Drop the current snapshot so the next `get` refreshes.
    pub fn invalidate(&self) {
        self.current.store(None);
    }

    async fn load(&self) -> DbResult<SchemaSnapshot> {
        let mut handle = self.pool.acquire().await.map_err(|e| {
            warn!(schema = %self.schema, error = %e, "No connection for schema introspection");
            DbError::introspection_failed(e.to_string())
        })?;
        let result = Self::introspect(&mut handle, &self.schema).await;

        let healthy = result
            .as_ref()
            .err()
            .is_none_or(|e| !e.is_connection_level());
        handle.release(healthy).await;

        result.map_err(|e| {
            warn!(schema = %self.schema, error = %e, "Schema introspection failed");
            match e {
                DbError::IntrospectionFailed { .. } => e,
                other => DbError::introspection_failed(other.to_string()),
            }
        })
    }

    async fn introspect(handle: &mut ConnectionHandle<C>, schema: &str) -> DbResult<SchemaSnapshot> {
        let session = handle.session()?;
        let names = session.list_tables(schema).await?;

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            let columns = session.list_columns(schema, &name).await?;
            tables.push(TableDescriptor::new(name, columns));
        }
        Ok(SchemaSnapshot::new(schema, tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolSettings;
    use crate::db::session::mock::MockConnector;
    use crate::models::ColumnDescriptor;

    fn sample_tables() -> Vec<TableDescriptor> {
        vec![
            TableDescriptor::new(
                "users",
                vec![
                    ColumnDescriptor::new("id", "integer"),
                    ColumnDescriptor::new("email", "text"),
                ],
            ),
            TableDescriptor::new(
                "orders",
                vec![
                    ColumnDescriptor::new("id", "bigint"),
                    ColumnDescriptor::new("user_id", "integer"),
                ],
            ),
        ]
    }

    async fn cache(connector: &MockConnector, ttl: Duration) -> SchemaCache<MockConnector> {
        let pool = ConnectionPool::open(connector.clone(), PoolSettings::default())
            .await
            .unwrap();
        SchemaCache::new(pool, "public", ttl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_within_ttl() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        let first = cache.get(false).await.unwrap();
        assert_eq!(connector.table_queries(), 1);
        assert_eq!(connector.column_queries(), 2);

        tokio::time::advance(Duration::from_secs(299)).await;
        let second = cache.get(false).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.table_queries(), 1);
        assert_eq!(connector.column_queries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_once_after_ttl() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        let first = cache.get(false).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;

        let second = cache.get(false).await.unwrap();
        let third = cache.get(false).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(connector.table_queries(), 2);
    }

    #[tokio::test]
    async fn test_force_refresh_bypasses_ttl() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        cache.get(false).await.unwrap();
        cache.get(true).await.unwrap();
        assert_eq!(connector.table_queries(), 2);
    }

    #[tokio::test]
    async fn test_preserves_catalog_order() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        let snapshot = cache.get(false).await.unwrap();
        let names: Vec<&str> = snapshot.tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["users", "orders"]);
        assert_eq!(snapshot.tables[0].columns[1].name, "email");
        assert_eq!(snapshot.schema, "public");
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_previous_snapshot() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        let good = cache.get(false).await.unwrap();

        connector.fail_table("orders");
        let err = cache.get(true).await.unwrap_err();
        assert!(matches!(err, DbError::IntrospectionFailed { .. }));
        assert!(err.to_string().contains("permission denied"));

        let still = cache.cached().unwrap();
        assert!(Arc::ptr_eq(&good, &still));

        connector.clear_failing_table();
        assert!(cache.get(true).await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_without_previous_snapshot() {
        let connector = MockConnector::with_tables(sample_tables());
        connector.fail_table("users");
        let cache = cache(&connector, Duration::from_secs(300)).await;

        assert!(cache.get(false).await.is_err());
        assert!(cache.cached().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_stale_readers_refresh_once() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = Arc::new(cache(&connector, Duration::from_secs(300)).await);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get(false).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(connector.table_queries(), 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let connector = MockConnector::with_tables(sample_tables());
        let cache = cache(&connector, Duration::from_secs(300)).await;

        cache.get(false).await.unwrap();
        cache.invalidate();
        assert!(cache.cached().is_none());
        cache.get(false).await.unwrap();
        assert_eq!(connector.table_queries(), 2);
    }
}
