//! SQL literal rendering for snapshot values.
//!
//! Strings are single-quoted with embedded quotes doubled; absent values
//! render as `NULL`. Output assumes `standard_conforming_strings = on`,
//! the PostgreSQL default, so backslashes need no escaping.

use chrono::NaiveDateTime;

/// The SQL null literal.
pub const NULL: &str = "NULL";

/// Quotes a string value, doubling embedded single quotes.
#[must_use]
pub fn sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Quotes an optional string value. An empty string stays `''`.
#[must_use]
pub fn sql_opt_string(value: Option<&str>) -> String {
    value.map_or_else(|| NULL.to_string(), sql_string)
}

/// Renders a timestamp as a quoted ISO-8601 string with microsecond
/// precision, matching PostgreSQL `TIMESTAMP` resolution.
#[must_use]
pub fn sql_timestamp(value: &NaiveDateTime) -> String {
    format!("'{}'", value.format("%Y-%m-%dT%H:%M:%S%.6f"))
}

/// Renders an optional timestamp.
#[must_use]
pub fn sql_opt_timestamp(value: Option<&NaiveDateTime>) -> String {
    value.map_or_else(|| NULL.to_string(), sql_timestamp)
}

/// Renders an optional boolean.
#[must_use]
pub fn sql_opt_bool(value: Option<bool>) -> String {
    value.map_or_else(|| NULL.to_string(), |b| b.to_string())
}

/// Renders an optional integer.
#[must_use]
pub fn sql_opt_int(value: Option<i32>) -> String {
    value.map_or_else(|| NULL.to_string(), |n| n.to_string())
}
