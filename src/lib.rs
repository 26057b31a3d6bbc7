//! PostgreSQL MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to inspect the schema of a PostgreSQL database and run read-only queries
//! against it through a bounded connection pool.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::DbError;
pub use mcp::DbService;
