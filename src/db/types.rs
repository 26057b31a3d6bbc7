//! Postgres type mappings.
//!
//! This module converts `PgRow` cells into JSON values.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. A decoder per wire format handles the actual value extraction
//!
//! Rows arrive in text format from the simple query protocol (statements without
//! parameters) and in binary format from the extended protocol, so both are handled.

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use std::fmt::Write as _;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for Postgres column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    Temporal,
    Interval,
    Unknown,
}

/// Classify a Postgres type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    // Interval must not fall into the integer bucket
    if lower == "interval" {
        return TypeCategory::Unknown;
    }

    if lower.contains("int") || lower.contains("serial") || lower == "oid" {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower == "bytea" {
        return TypeCategory::Binary;
    }

    if lower == "interval" {
        return TypeCategory::Interval;
    }

    if matches!(
        lower.as_str(),
        "date" | "time" | "timestamp" | "timestamptz"
    ) {
        return TypeCategory::Temporal;
    }

    if matches!(
        lower.as_str(),
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext"
    ) {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw NUMERIC values as strings.
/// This preserves the exact database representation in both wire formats.
#[derive(Debug)]
pub struct RawDecimal(pub String);

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

fn read_u16(buf: &[u8], at: usize) -> Result<u16, sqlx::error::BoxDynError> {
    buf.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated binary NUMERIC".into())
}

/// Render a binary NUMERIC the way Postgres prints it in text format.
///
/// Layout: `ndigits`, `weight`, `sign`, `dscale` (each 16 bits), then `ndigits`
/// base-10000 digits. `weight` is the power of 10000 of the first digit and
/// `dscale` the number of decimal places to print.
pub fn numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let ndigits = read_u16(buf, 0)? as usize;
    let weight = read_u16(buf, 2)? as i16 as i32;
    let sign = read_u16(buf, 4)?;
    let dscale = read_u16(buf, 6)? as usize;

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        NUMERIC_POS | NUMERIC_NEG => {}
        other => return Err(format!("invalid NUMERIC sign 0x{:04x}", other).into()),
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(buf, 8 + 2 * i))
        .collect::<Result<Vec<u16>, _>>()?;
    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        let _ = write!(out, "{}", digit(0));
        for i in 1..=weight {
            let _ = write!(out, "{:04}", digit(i));
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut i = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit(i));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

// =============================================================================
// Interval Rendering
// =============================================================================

/// Render an interval in Postgres' default `postgres` interval style, e.g.
/// `1 year 2 mons 3 days 04:05:06.5` or `-1 days +02:00:00`.
pub fn interval_to_string(months: i32, days: i32, microseconds: i64) -> String {
    let mut out = String::new();
    let mut is_zero = true;
    let mut is_before = false;

    let mut push_part = |out: &mut String, value: i32, unit: &str| {
        if value == 0 {
            return;
        }
        let _ = write!(
            out,
            "{}{}{} {}{}",
            if is_zero { "" } else { " " },
            if is_before && value > 0 { "+" } else { "" },
            value,
            unit,
            if value != 1 { "s" } else { "" }
        );
        is_before = value < 0;
        is_zero = false;
    };
    push_part(&mut out, months / 12, "year");
    push_part(&mut out, months % 12, "mon");
    push_part(&mut out, days, "day");

    if is_zero || microseconds != 0 {
        let total = microseconds.unsigned_abs();
        let hours = total / 3_600_000_000;
        let minutes = total / 60_000_000 % 60;
        let seconds = total / 1_000_000 % 60;
        let fraction = total % 1_000_000;

        let _ = write!(
            out,
            "{}{}{:02}:{:02}:{:02}",
            if is_zero { "" } else { " " },
            if microseconds < 0 {
                "-"
            } else if is_before {
                "+"
            } else {
                ""
            },
            hours,
            minutes,
            seconds
        );
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            let _ = write!(out, ".{}", digits.trim_end_matches('0'));
        }
    }
    out
}

// =============================================================================
// Binary Encoding
// =============================================================================

/// Decode binary data to a JSON string: UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Column names of a row, in result order.
pub fn column_names(row: &PgRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Convert a row into positionally aligned JSON cells.
pub fn row_values(row: &PgRow) -> Vec<JsonValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let type_name = col.type_info().name();
            decode_column(row, idx, type_name)
        })
        .collect()
}

fn decode_column(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
    let category = categorize_type(type_name);
    let raw = match row.try_get_raw(idx) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to read column");
            return JsonValue::Null;
        }
    };
    if raw.is_null() {
        return JsonValue::Null;
    }

    match raw.format() {
        PgValueFormat::Text => text::decode(raw, category),
        PgValueFormat::Binary => binary::decode_column(row, idx, type_name, category),
    }
}

// =============================================================================
// Format-Specific Decoders
// =============================================================================

mod text {
    use super::*;

    pub fn decode(raw: PgValueRef<'_>, category: TypeCategory) -> JsonValue {
        let s = match raw.as_str() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read text value");
                return JsonValue::Null;
            }
        };

        match category {
            TypeCategory::Integer => s
                .parse::<i64>()
                .map(|v| JsonValue::Number(v.into()))
                .unwrap_or_else(|_| JsonValue::String(s.to_string())),
            TypeCategory::Float => s
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(s.to_string())),
            TypeCategory::Boolean => match s {
                "t" | "true" => JsonValue::Bool(true),
                "f" | "false" => JsonValue::Bool(false),
                other => JsonValue::String(other.to_string()),
            },
            TypeCategory::Json => serde_json::from_str(s)
                .unwrap_or_else(|_| JsonValue::String(s.to_string())),
            TypeCategory::Binary => decode_bytea_hex(s),
            _ => JsonValue::String(s.to_string()),
        }
    }

    /// Postgres renders bytea in text format as `\x` followed by hex digits.
    fn decode_bytea_hex(s: &str) -> JsonValue {
        let Some(hex) = s.strip_prefix("\\x") else {
            return JsonValue::String(s.to_string());
        };
        let bytes: Option<Vec<u8>> = (0..hex.len())
            .step_by(2)
            .map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
            .collect();
        match bytes {
            Some(bytes) => decode_binary_value(&bytes),
            None => JsonValue::String(s.to_string()),
        }
    }

    #[cfg(test)]
    pub(super) fn bytea_for_test(s: &str) -> JsonValue {
        decode_bytea_hex(s)
    }
}

mod binary {
    use super::*;

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx, type_name),
            TypeCategory::Interval => decode_interval(row, idx, type_name),
            _ => decode_text(row, idx, type_name),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
            return JsonValue::Number(v.0.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return serde_json::Number::from_f64(v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return serde_json::Number::from_f64(v as f64)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string()));
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<uuid::Uuid>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_temporal(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

        let rendered = match type_name.to_lowercase().as_str() {
            "date" => row
                .try_get::<Option<NaiveDate>, _>(idx)
                .ok()
                .flatten()
                .map(|v| v.to_string()),
            "time" => row
                .try_get::<Option<NaiveTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| v.to_string()),
            "timestamp" => row
                .try_get::<Option<NaiveDateTime>, _>(idx)
                .ok()
                .flatten()
                .map(|v| v.to_string()),
            "timestamptz" => row
                .try_get::<Option<DateTime<Utc>>, _>(idx)
                .ok()
                .flatten()
                .map(|v| v.to_rfc3339()),
            _ => None,
        };
        rendered
            .map(JsonValue::String)
            .unwrap_or_else(|| decode_text(row, idx, type_name))
    }

    fn decode_interval(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        use sqlx::postgres::types::PgInterval;

        match row.try_get::<Option<PgInterval>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(interval_to_string(v.months, v.days, v.microseconds)),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, idx, type_name),
        }
    }

    fn decode_text(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v),
            Ok(None) => JsonValue::Null,
            Err(_) => {
                tracing::debug!(column = idx, type_name, "No decoder for column type");
                JsonValue::String(format!("<{}>", type_name.to_lowercase()))
            }
        }
    }
}
