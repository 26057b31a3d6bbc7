//! MCP service implementation using rmcp.
//!
//! This module defines the DbService struct with the two Postgres tools
//! exposed via the MCP protocol using the rmcp framework's macros.
//! Every failure is returned as tool output with `is_error` set, never as a
//! protocol-level fault.

use crate::config::Config;
use crate::db::{ConnectionPool, PgConnector, PoolStatus, QueryExecutor, SchemaCache};
use crate::error::{DbError, DbResult};
use crate::tools::format::format_error;
use crate::tools::query::{ExecuteQueryInput, QueryToolHandler};
use crate::tools::schema::{GetSchemaInput, SchemaToolHandler};
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

#[derive(Clone)]
pub struct DbService {
    /// Shared pool, closed on shutdown
    pool: ConnectionPool<PgConnector>,
    query_handler: Arc<QueryToolHandler<PgConnector>>,
    schema_handler: Arc<SchemaToolHandler<PgConnector>>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DbService {
    /// Create a new DbService over an already opened pool.
    ///
    /// # Arguments
    ///
    /// * `pool` - Shared connection pool
    /// * `executor` - Query executor leasing from `pool`
    /// * `cache` - Schema cache leasing from `pool`
    pub fn new(
        pool: ConnectionPool<PgConnector>,
        executor: Arc<QueryExecutor<PgConnector>>,
        cache: Arc<SchemaCache<PgConnector>>,
    ) -> Self {
        Self {
            pool,
            query_handler: Arc::new(QueryToolHandler::new(executor)),
            schema_handler: Arc::new(SchemaToolHandler::new(cache)),
            tool_router: Self::tool_router(),
        }
    }

    /// Build the connector, pool, executor and schema cache from configuration.
    ///
    /// Fails if the configuration is invalid or the pool cannot open its
    /// minimum number of sessions.
    pub async fn connect(config: &Config) -> DbResult<Self> {
        let settings = config.connection_settings().map_err(DbError::invalid_input)?;
        let pool_settings = config.pool_settings().map_err(DbError::invalid_input)?;
        let connector = PgConnector::new(&settings, config.query_timeout())?;

        info!(
            server = %settings.masked_url(),
            min_size = pool_settings.min_size,
            max_size = pool_settings.max_size,
            "Opening connection pool"
        );
        let pool = ConnectionPool::open(connector, pool_settings).await?;

        let executor = Arc::new(QueryExecutor::new(
            pool.clone(),
            config.result_limits(),
            config.query_timeout(),
        ));
        let cache = Arc::new(SchemaCache::new(
            pool.clone(),
            config.schema.clone(),
            config.schema_ttl(),
        ));
        Ok(Self::new(pool, executor, cache))
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close every pooled connection.
    pub async fn shutdown(&self) {
        info!(status = ?self.pool.status(), "Closing connection pool");
        self.pool.close().await;
    }
}

/// Turn a handler outcome into tool output.
fn render(tool: &'static str, outcome: DbResult<String>, started: Instant) -> CallToolResult {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match outcome {
        Ok(text) => {
            info!(tool, elapsed_ms, "Tool call succeeded");
            CallToolResult::success(vec![Content::text(text)])
        }
        Err(e) => {
            info!(tool, elapsed_ms, error = %e, "Tool call failed");
            CallToolResult::error(vec![Content::text(format_error(&e))])
        }
    }
}

#[tool_router]
impl DbService {
    #[tool(
        description = "Get the schema of the connected PostgreSQL database.\nReturns every table with its columns and data types.\nResults are cached; set force_refresh to re-read the catalog."
    )]
    async fn get_postgres_schema(
        &self,
        Parameters(input): Parameters<GetSchemaInput>,
    ) -> Result<CallToolResult, McpError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("tool_call", tool = "get_postgres_schema", %request_id);
        let started = Instant::now();
        let outcome = self.schema_handler.get_schema(input).instrument(span).await;
        Ok(render("get_postgres_schema", outcome, started))
    }

    #[tool(
        description = "Execute a read-only SQL query (SELECT, WITH ... SELECT, EXPLAIN, SHOW) and return the results.\nExactly one statement per call; data-modifying statements are rejected.\nSupports positional parameters ($1, $2, ...) via `params`.\nOutput format: text (default), table, or markdown.\nLarge results are truncated and marked as such."
    )]
    async fn execute_postgres_query(
        &self,
        Parameters(input): Parameters<ExecuteQueryInput>,
    ) -> Result<CallToolResult, McpError> {
        let request_id = Uuid::new_v4();
        let span = info_span!("tool_call", tool = "execute_postgres_query", %request_id);
        let started = Instant::now();
        let outcome = self
            .query_handler
            .execute_query(input)
            .instrument(span)
            .await;
        Ok(render("execute_postgres_query", outcome, started))
    }
}

#[tool_handler]
impl ServerHandler for DbService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "pg-mcp-server".to_owned(),
                title: Some("PostgreSQL MCP Server".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Read-only tools for a single PostgreSQL database.\n\
                \n\
                ## Workflow\n\
                1. Call `get_postgres_schema` to see tables and columns\n\
                2. Call `execute_postgres_query` with one read-only statement\n\
                \n\
                ## Notes\n\
                - INSERT, UPDATE, DELETE, DDL and multi-statement input are rejected before reaching the database\n\
                - Pass values through `params` ($1, $2, ...) instead of splicing them into SQL\n\
                - Results are capped in rows and bytes; a truncated result ends with a note"
                    .to_string(),
            ),
        }
    }
}

/// A service whose pool never connects: min_size 0 and an unroutable port.
#[cfg(test)]
pub(crate) async fn offline_service() -> DbService {
    use crate::config::{ConnectionSettings, PoolSettings};
    use crate::models::ResultLimits;
    use std::time::Duration;

    let settings =
        ConnectionSettings::new("127.0.0.1", 1, "postgres", "postgres", None, "disable").unwrap();
    let connector = PgConnector::new(&settings, Duration::from_secs(30)).unwrap();
    let pool_settings = PoolSettings {
        min_size: 0,
        max_size: 1,
        acquire_timeout: Duration::from_secs(1),
        ..PoolSettings::default()
    };
    let pool = ConnectionPool::open(connector, pool_settings).await.unwrap();
    let executor = Arc::new(QueryExecutor::new(
        pool.clone(),
        ResultLimits::default(),
        Duration::from_secs(30),
    ));
    let cache = Arc::new(SchemaCache::new(pool.clone(), "public", Duration::from_secs(300)));
    DbService::new(pool, executor, cache)
}
