//! Schema introspection tool.
//!
//! Implements `get_postgres_schema` on top of the schema cache.

use crate::db::{Connector, SchemaCache};
use crate::error::DbResult;
use crate::tools::format::format_schema;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Input for the get_postgres_schema tool.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct GetSchemaInput {
    /// Bypass the cache and re-read the catalog. Default: false
    #[serde(default)]
    pub force_refresh: bool,
}

/// Handler for the schema tool.
pub struct SchemaToolHandler<C: Connector> {
    cache: Arc<SchemaCache<C>>,
}

impl<C: Connector> SchemaToolHandler<C> {
    pub fn new(cache: Arc<SchemaCache<C>>) -> Self {
        Self { cache }
    }

    pub async fn get_schema(&self, input: GetSchemaInput) -> DbResult<String> {
        let snapshot = self.cache.get(input.force_refresh).await?;
        Ok(format_schema(&snapshot))
    }
}
