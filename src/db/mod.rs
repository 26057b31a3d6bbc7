//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management
//! - Query execution with row/byte caps
//! - Schema introspection and caching
//! - Postgres type mappings

pub mod executor;
pub mod pool;
pub mod postgres;
pub mod schema_cache;
pub mod session;
pub mod types;

pub use executor::{QueryExecutor, ResultBuilder};
pub use pool::{ConnectionHandle, ConnectionPool, PoolStatus};
pub use postgres::{PgConnector, PgSession};
pub use schema_cache::SchemaCache;
pub use session::{Connector, Session};
