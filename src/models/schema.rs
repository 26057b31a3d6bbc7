//! Schema-related data models.
//!
//! A `SchemaSnapshot` is produced by one full introspection pass and never
//! mutated afterwards; refreshes build a new one.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub declared_type: String,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, declared_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub name: String,
    /// Catalog order (ordinal position).
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSnapshot {
    /// Database schema (namespace) that was introspected, e.g. `public`.
    pub schema: String,
    /// Catalog order; never re-sorted.
    pub tables: Vec<TableDescriptor>,
    pub fetched_at: DateTime<Utc>,
}

impl SchemaSnapshot {
    pub fn new(schema: impl Into<String>, tables: Vec<TableDescriptor>) -> Self {
        Self {
            schema: schema.into(),
            tables,
            fetched_at: Utc::now(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn column_count(&self) -> usize {
        self.tables.iter().map(|t| t.columns.len()).sum()
    }
}
