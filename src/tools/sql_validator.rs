//! SQL statement validation for read-only enforcement.
//!
//! This is the only check between the caller's SQL and the database. A statement is
//! admitted when the input holds exactly one statement and that statement is a
//! read-only form: `SELECT`, `WITH ... SELECT`, `VALUES`, `TABLE`, `SHOW`, or
//! `EXPLAIN` of one of those. Anything that does not parse is rejected.
//!
//! Statement separators are counted on the token stream, so semicolons inside string
//! literals, quoted identifiers, dollar-quoted bodies and comments are ignored.
//!
//! Uses [sqlparser](https://docs.rs/sqlparser/) with the PostgreSQL dialect.

use crate::models::{AcceptedQuery, QueryRequest, QueryVerdict};
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Classify one SQL string.
///
/// # Examples
///
/// ```
/// use pg_mcp_server::tools::sql_validator::classify;
///
/// assert!(classify("SELECT * FROM users").is_accepted());
/// assert!(!classify("DELETE FROM users").is_accepted());
/// ```
pub fn classify(sql: &str) -> QueryVerdict {
    let dialect = PostgreSqlDialect {};

    let tokens = match Tokenizer::new(&dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(e) => {
            return QueryVerdict::RejectedSyntaxError {
                message: e.to_string(),
            };
        }
    };

    match count_statements(&tokens) {
        0 => {
            return QueryVerdict::RejectedSyntaxError {
                message: "empty statement".to_string(),
            };
        }
        1 => {}
        count => return QueryVerdict::RejectedMultiStatement { count },
    }

    let statements = match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements,
        Err(e) => {
            return QueryVerdict::RejectedSyntaxError {
                message: e.to_string(),
            };
        }
    };

    match statements.as_slice() {
        [] => QueryVerdict::RejectedSyntaxError {
            message: "empty statement".to_string(),
        },
        [statement] => match read_only_violation(statement) {
            None => QueryVerdict::Accepted,
            Some(operation) => QueryVerdict::RejectedNotReadOnly {
                operation: operation.unwrap_or_else(|| leading_keyword(&tokens)),
            },
        },
        many => QueryVerdict::RejectedMultiStatement { count: many.len() },
    }
}

/// Run the guard and, on acceptance, wrap the request so it can be executed.
pub fn admit(request: QueryRequest) -> Result<AcceptedQuery, QueryVerdict> {
    match classify(&request.sql) {
        QueryVerdict::Accepted => Ok(AcceptedQuery::new(request)),
        verdict => Err(verdict),
    }
}

/// Number of non-empty statements between top-level semicolons.
fn count_statements(tokens: &[Token]) -> usize {
    tokens
        .split(|t| matches!(t, Token::SemiColon))
        .filter(|segment| segment.iter().any(is_significant))
        .count()
}

fn is_significant(token: &Token) -> bool {
    !matches!(token, Token::Whitespace(_) | Token::EOF)
}

/// First keyword of the input, used to name statements the table below does not list.
fn leading_keyword(tokens: &[Token]) -> String {
    tokens
        .iter()
        .find(|t| is_significant(t))
        .map(|t| match t {
            Token::Word(word) => word.value.to_uppercase(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "Unknown".to_string())
}

/// `None` when the statement is read-only; otherwise the offending operation.
/// `Some(None)` means the statement kind is not recognized.
fn read_only_violation(stmt: &Statement) -> Option<Option<String>> {
    let named = |name: &str| Some(Some(name.to_string()));

    match stmt {
        // =====================================================================
        // Read-only operations - ALLOWED
        // =====================================================================
        Statement::Query(query) => query_violation(query).map(|op| Some(op.to_string())),
        Statement::ShowVariable { .. }
        | Statement::ShowVariables { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowSchemas { .. }
        | Statement::ShowFunctions { .. }
        | Statement::ShowStatus { .. }
        | Statement::ShowCollation { .. }
        | Statement::ShowCreate { .. }
        | Statement::ExplainTable { .. } => None,

        // EXPLAIN is as safe as the statement it wraps (EXPLAIN ANALYZE runs it)
        Statement::Explain { statement, .. } => read_only_violation(statement),

        // =====================================================================
        // DML Write operations - BLOCKED
        // =====================================================================
        Statement::Insert { .. } => named("INSERT"),
        Statement::Update { .. } => named("UPDATE"),
        Statement::Delete { .. } => named("DELETE"),
        Statement::Merge { .. } => named("MERGE"),
        Statement::Copy { .. } => named("COPY"),

        // =====================================================================
        // DDL operations - BLOCKED
        // =====================================================================
        Statement::CreateTable { .. } => named("CREATE TABLE"),
        Statement::CreateView { .. } => named("CREATE VIEW"),
        Statement::CreateIndex { .. } => named("CREATE INDEX"),
        Statement::CreateSchema { .. } => named("CREATE SCHEMA"),
        Statement::CreateDatabase { .. } => named("CREATE DATABASE"),
        Statement::CreateSequence { .. } => named("CREATE SEQUENCE"),
        Statement::CreateType { .. } => named("CREATE TYPE"),
        Statement::CreateFunction { .. } => named("CREATE FUNCTION"),
        Statement::CreateProcedure { .. } => named("CREATE PROCEDURE"),
        Statement::CreateTrigger { .. } => named("CREATE TRIGGER"),
        Statement::CreateRole { .. } => named("CREATE ROLE"),
        Statement::CreateExtension { .. } => named("CREATE EXTENSION"),
        Statement::CreatePolicy { .. } => named("CREATE POLICY"),
        Statement::AlterTable { .. } => named("ALTER TABLE"),
        Statement::AlterView { .. } => named("ALTER VIEW"),
        Statement::AlterIndex { .. } => named("ALTER INDEX"),
        Statement::AlterRole { .. } => named("ALTER ROLE"),
        Statement::AlterPolicy { .. } => named("ALTER POLICY"),
        Statement::AlterType { .. } => named("ALTER TYPE"),
        Statement::Drop { .. } => named("DROP"),
        Statement::DropFunction { .. } => named("DROP FUNCTION"),
        Statement::DropProcedure { .. } => named("DROP PROCEDURE"),
        Statement::DropTrigger { .. } => named("DROP TRIGGER"),
        Statement::DropPolicy { .. } => named("DROP POLICY"),
        Statement::Truncate { .. } => named("TRUNCATE"),
        Statement::Comment { .. } => named("COMMENT"),

        // =====================================================================
        // Transaction control - BLOCKED
        // =====================================================================
        Statement::StartTransaction { .. } => named("BEGIN"),
        Statement::Commit { .. } => named("COMMIT"),
        Statement::Rollback { .. } => named("ROLLBACK"),
        Statement::Savepoint { .. } => named("SAVEPOINT"),
        Statement::ReleaseSavepoint { .. } => named("RELEASE SAVEPOINT"),

        // =====================================================================
        // Procedure calls and prepared statements - BLOCKED
        // =====================================================================
        Statement::Call { .. } => named("CALL"),
        Statement::Execute { .. } => named("EXECUTE"),
        Statement::Prepare { .. } => named("PREPARE"),
        Statement::Deallocate { .. } => named("DEALLOCATE"),

        // =====================================================================
        // Administrative operations - BLOCKED
        // =====================================================================
        Statement::Grant { .. } => named("GRANT"),
        Statement::Revoke { .. } => named("REVOKE"),
        Statement::Set { .. } => named("SET"),
        Statement::Vacuum { .. } => named("VACUUM"),
        Statement::Analyze { .. } => named("ANALYZE"),
        Statement::Discard { .. } => named("DISCARD"),
        Statement::LISTEN { .. } => named("LISTEN"),
        Statement::UNLISTEN { .. } => named("UNLISTEN"),
        Statement::NOTIFY { .. } => named("NOTIFY"),

        // Anything else is rejected under its leading keyword
        _ => Some(None),
    }
}

/// Offending operation inside a query expression, if any.
fn query_violation(query: &Query) -> Option<&'static str> {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            if let Some(op) = query_violation(&cte.query) {
                return Some(op);
            }
        }
    }
    if !query.locks.is_empty() {
        return Some("SELECT ... FOR UPDATE/SHARE");
    }
    set_expr_violation(&query.body)
}

fn set_expr_violation(expr: &SetExpr) -> Option<&'static str> {
    match expr {
        SetExpr::Select(select) => select.into.as_ref().map(|_| "SELECT INTO"),
        SetExpr::Query(query) => query_violation(query),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_violation(left).or_else(|| set_expr_violation(right))
        }
        SetExpr::Values(_) | SetExpr::Table(_) => None,
        SetExpr::Insert(_) => Some("INSERT"),
        SetExpr::Update(_) => Some("UPDATE"),
        // Data-modifying bodies (DELETE/MERGE ... RETURNING)
        _ => Some("data-modifying statement"),
    }
}
