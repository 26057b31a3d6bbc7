//! Query execution tool.
//!
//! This module implements the `execute_postgres_query` MCP tool. The read-only guard
//! runs before anything touches the pool, so rejected statements never open a
//! connection.

use crate::db::{Connector, QueryExecutor};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryRequest};
use crate::tools::format::{OutputFormat, format_result};
use crate::tools::sql_validator;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

/// Input for the execute_postgres_query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ExecuteQueryInput {
    /// A single read-only SQL statement (SELECT, WITH ... SELECT, EXPLAIN, SHOW)
    pub query: String,
    /// Positional parameters for $1, $2, ... placeholders
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Query timeout in seconds. Defaults to the server setting, max 300
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Output format: "text" (default), "table" for an ASCII grid, "markdown" for a markdown table
    #[serde(default)]
    pub format: OutputFormat,
}

impl ExecuteQueryInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
            timeout_secs: None,
            format: OutputFormat::default(),
        }
    }
}

/// Handler for the query tool.
pub struct QueryToolHandler<C: Connector> {
    executor: Arc<QueryExecutor<C>>,
}

impl<C: Connector> QueryToolHandler<C> {
    pub fn new(executor: Arc<QueryExecutor<C>>) -> Self {
        Self { executor }
    }

    /// Guard, execute and render one query.
    pub async fn execute_query(&self, input: ExecuteQueryInput) -> DbResult<String> {
        let request = QueryRequest {
            sql: input.query,
            params: input.params,
            timeout_secs: input.timeout_secs,
        };

        let accepted = sql_validator::admit(request).map_err(|verdict| {
            warn!(verdict = verdict.code(), reason = %verdict, "Query rejected");
            DbError::Rejected(verdict)
        })?;

        let result = self.executor.execute(&accepted).await?;
        Ok(format_result(&result, input.format))
    }
}
