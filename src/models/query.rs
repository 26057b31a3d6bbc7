//! Query-related data models.
//!
//! This module defines types for SQL query requests, guard verdicts and results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Default maximum number of rows materialized per query.
pub const DEFAULT_MAX_ROWS: usize = 10_000;

/// Default maximum serialized result size (5 MiB).
pub const DEFAULT_MAX_RESULT_BYTES: usize = 5 * 1024 * 1024;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Maximum query timeout a caller may request, in seconds.
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;

/// A parameter value for parameterized queries.
///
/// Parameters are always bound positionally (`$1`, `$2`, ...), never spliced into SQL text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

/// Caller-supplied SQL plus bound parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    /// Per-call timeout. Clamped to `[1, MAX_QUERY_TIMEOUT_SECS]`.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl QueryRequest {
    /// Create a new query request without parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            timeout_secs: None,
        }
    }

    /// Add a parameter to this query.
    pub fn with_param(mut self, param: QueryParam) -> Self {
        self.params.push(param);
        self
    }

    /// Set the timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }
}

/// Outcome of classifying one SQL string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryVerdict {
    Accepted,
    /// The single statement is not a read-only form.
    RejectedNotReadOnly { operation: String },
    /// More than one statement was supplied.
    RejectedMultiStatement { count: usize },
    /// The input could not be parsed (or was empty).
    RejectedSyntaxError { message: String },
}

impl QueryVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Stable identifier used in logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::RejectedNotReadOnly { .. } => "not_read_only",
            Self::RejectedMultiStatement { .. } => "multi_statement",
            Self::RejectedSyntaxError { .. } => "syntax_error",
        }
    }
}

impl fmt::Display for QueryVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::RejectedNotReadOnly { operation } => write!(
                f,
                "{} is not a read-only statement. Only SELECT, WITH ... SELECT, EXPLAIN and SHOW are allowed.",
                operation
            ),
            Self::RejectedMultiStatement { count } => write!(
                f,
                "found {} statements. Submit exactly one statement per call.",
                count
            ),
            Self::RejectedSyntaxError { message } => {
                write!(f, "could not parse SQL: {}", message)
            }
        }
    }
}

/// A request that passed the read-only guard.
///
/// Only the guard can construct this, so holding one proves classification happened.
#[derive(Debug, Clone)]
pub struct AcceptedQuery {
    request: QueryRequest,
}

impl AcceptedQuery {
    pub(crate) fn new(request: QueryRequest) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &QueryRequest {
        &self.request
    }

    pub fn sql(&self) -> &str {
        &self.request.sql
    }

    pub fn params(&self) -> &[QueryParam] {
        &self.request.params
    }
}

/// Caps applied while materializing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            max_bytes: DEFAULT_MAX_RESULT_BYTES,
        }
    }
}

/// Which cap stopped a result early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    RowLimit(usize),
    ByteLimit(usize),
}

/// Columns plus positionally aligned rows.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Unique within one result.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    /// True if a cap stopped materialization before the result ended.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
