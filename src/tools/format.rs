//! Output formatting utilities for MCP tools.
//!
//! Results are structured internally and rendered to text only here, at the tool
//! boundary.

use crate::error::DbError;
use crate::models::{QueryResult, SchemaSnapshot, Truncation};
use humansize::{BINARY, format_size};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt::Write as _;
use unicode_width::UnicodeWidthStr;

pub const NO_ROWS: &str = "No rows found.";

/// Output format for query results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// `Columns: a, b` header, then one comma-separated line per row (default)
    #[default]
    Text,
    /// ASCII table format (like the psql CLI)
    Table,
    /// Markdown table format
    Markdown,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

/// Render a query result in the requested format.
///
/// An empty result renders as [`NO_ROWS`]; a truncated one ends with a note naming
/// the cap that stopped it.
pub fn format_result(result: &QueryResult, format: OutputFormat) -> String {
    if result.is_empty() {
        return match result.truncation {
            Some(truncation) => format!("{}\n\n{}", NO_ROWS, truncation_note(truncation)),
            None => NO_ROWS.to_string(),
        };
    }

    let mut output = match format {
        OutputFormat::Text => format_as_text(result),
        OutputFormat::Table => format_as_table(result),
        OutputFormat::Markdown => format_as_markdown(result),
    };

    if let Some(truncation) = result.truncation {
        if !output.ends_with('\n') {
            output.push('\n');
        }
        output.push('\n');
        output.push_str(&truncation_note(truncation));
    }
    output
}

pub fn truncation_note(truncation: Truncation) -> String {
    match truncation {
        Truncation::RowLimit(max_rows) => format!(
            "[Result truncated: row limit of {} reached. Add a LIMIT or narrow the query to see the rest.]",
            max_rows
        ),
        Truncation::ByteLimit(max_bytes) => format!(
            "[Result truncated: size limit of {} reached. Select fewer columns or rows to see the rest.]",
            format_size(max_bytes, BINARY)
        ),
    }
}

pub fn format_as_text(result: &QueryResult) -> String {
    let mut output = format!("Columns: {}\n", result.columns.join(", "));
    let lines: Vec<String> = result
        .rows
        .iter()
        .map(|row| {
            row.iter()
                .map(format_value)
                .collect::<Vec<_>>()
                .join(", ")
        })
        .collect();
    output.push_str(&lines.join("\n"));
    output
}

pub fn format_as_table(result: &QueryResult) -> String {
    let columns = &result.columns;
    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in &result.rows {
        for (i, value) in row.iter().enumerate().take(widths.len()) {
            widths[i] = widths[i].max(format_value(value).width());
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad_center(col, *w)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in &result.rows {
        let row_str: String = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let value = row.get(i).unwrap_or(&JsonValue::Null);
                let formatted = format_value(value);
                if matches!(value, JsonValue::Number(_)) {
                    format!("| {} ", pad_left(&formatted, *w))
                } else {
                    format!("| {} ", pad_right(&formatted, *w))
                }
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    output.push_str(&separator);

    let row_count = result.row_count();
    let row_text = if row_count == 1 { "row" } else { "rows" };
    let _ = writeln!(output, "({} {})", row_count, row_text);

    output
}

pub fn format_as_markdown(result: &QueryResult) -> String {
    let mut output = String::new();

    let header: String = result
        .columns
        .iter()
        .map(|c| format!("| {} ", escape_markdown(c)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);

    let sep: String = result.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &result.rows {
        let row_str: String = row
            .iter()
            .map(|value| format!("| {} ", escape_markdown(&format_value(value))))
            .collect::<String>()
            + "|\n";
        output.push_str(&row_str);
    }

    let _ = write!(output, "\n*{} rows*", result.row_count());

    output
}

/// Render a schema snapshot: one `Table:` line per table, one indented line per
/// column, blank line between tables. Catalog order is kept.
pub fn format_schema(snapshot: &SchemaSnapshot) -> String {
    if snapshot.tables.is_empty() {
        return format!("No tables found in schema '{}'.", snapshot.schema);
    }

    let mut output = String::new();
    for table in &snapshot.tables {
        let _ = writeln!(output, "Table: {}", table.name);
        for column in &table.columns {
            let _ = writeln!(output, "  - {} ({})", column.name, column.declared_type);
        }
        output.push('\n');
    }
    output
}

/// Render an error for the caller, with the suggestion when there is one.
pub fn format_error(err: &DbError) -> String {
    match err.suggestion() {
        Some(suggestion) => format!("{}\nSuggestion: {}", err, suggestion),
        None => err.to_string(),
    }
}

fn escape_markdown(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

// `format!` width specifiers count chars, not display columns
fn pad_right(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

fn pad_left(s: &str, width: usize) -> String {
    format!("{}{}", " ".repeat(width.saturating_sub(s.width())), s)
}

fn pad_center(s: &str, width: usize) -> String {
    let total = width.saturating_sub(s.width());
    let left = total / 2;
    format!("{}{}{}", " ".repeat(left), s, " ".repeat(total - left))
}
