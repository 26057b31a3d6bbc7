//! MCP tool implementations.
//!
//! This module contains the database tool handlers:
//! - `query`: Execute read-only queries (`execute_postgres_query`)
//! - `schema`: Introspect tables and columns (`get_postgres_schema`)
//! - `sql_validator`: SQL statement validation for read-only enforcement
//! - `format`: Text rendering of results and schemas

pub mod format;
pub mod query;
pub mod schema;
pub mod sql_validator;

pub use format::OutputFormat;
pub use query::{ExecuteQueryInput, QueryToolHandler};
pub use schema::{GetSchemaInput, SchemaToolHandler};
