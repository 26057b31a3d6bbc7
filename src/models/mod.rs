//! Data models for the Postgres MCP Server.
//!
//! This module re-exports all model types used throughout the application.

pub mod query;
pub mod schema;

// Re-export commonly used types
pub use query::{
    AcceptedQuery, DEFAULT_MAX_RESULT_BYTES, DEFAULT_MAX_ROWS, DEFAULT_QUERY_TIMEOUT_SECS,
    MAX_QUERY_TIMEOUT_SECS, QueryParam, QueryRequest, QueryResult, QueryVerdict, ResultLimits,
    Truncation,
};
pub use schema::{ColumnDescriptor, SchemaSnapshot, TableDescriptor};
