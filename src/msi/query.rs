//! Mini SQL front-end for MSI queries
//!
//! `execute_sql` accepts either a bare table name (expanded to
//! `SELECT * FROM <T>`) or a limited `SELECT` form:
//!
//! ```text
//! SELECT col1, col2 FROM Table WHERE colA = 'text' AND colB = 42
//! ```
//!
//! Only equality conditions joined by `AND` exist in the installer query
//! surface this front-end serves; anything else is a decode error.

use crate::error::{Result, ToolkitError};

/// A literal value in a WHERE condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryLiteral {
    Str(String),
    Int(i32),
}

/// Parsed query ready to map onto the database layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub table: String,
    /// `None` means `*`
    pub columns: Option<Vec<String>>,
    /// Equality conditions joined by AND
    pub conditions: Vec<(String, QueryLiteral)>,
}

/// Parse a `SELECT` statement or bare table name
pub fn parse_query(input: &str) -> Result<ParsedQuery> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ToolkitError::Decode("empty query".to_string()));
    }

    // Bare table name.
    if !trimmed.to_ascii_lowercase().starts_with("select ") {
        if is_identifier(trimmed) {
            return Ok(ParsedQuery {
                table: trimmed.to_string(),
                columns: None,
                conditions: Vec::new(),
            });
        }
        return Err(ToolkitError::Decode(format!(
            "neither a SELECT statement nor a table name: {trimmed}"
        )));
    }

    let rest = &trimmed[7..];
    let lower = rest.to_ascii_lowercase();
    let from_pos = lower
        .find(" from ")
        .ok_or_else(|| ToolkitError::Decode("SELECT without FROM".to_string()))?;

    let column_part = rest[..from_pos].trim();
    let columns = if column_part == "*" {
        None
    } else {
        let names: Vec<String> = column_part
            .split(',')
            .map(|c| c.trim().to_string())
            .collect();
        if names.iter().any(|n| !is_identifier(n)) {
            return Err(ToolkitError::Decode(format!(
                "invalid column list: {column_part}"
            )));
        }
        Some(names)
    };

    let after_from = rest[from_pos + 6..].trim();
    let (table, where_part) = match after_from.to_ascii_lowercase().find(" where ") {
        Some(pos) => (
            after_from[..pos].trim().to_string(),
            Some(after_from[pos + 7..].trim()),
        ),
        None => (after_from.to_string(), None),
    };
    if !is_identifier(&table) {
        return Err(ToolkitError::Decode(format!("invalid table name: {table}")));
    }

    let mut conditions = Vec::new();
    if let Some(where_clause) = where_part {
        for condition in split_case_insensitive(where_clause, " and ") {
            conditions.push(parse_condition(condition.trim())?);
        }
    }

    Ok(ParsedQuery {
        table,
        columns,
        conditions,
    })
}

fn parse_condition(condition: &str) -> Result<(String, QueryLiteral)> {
    let (column, value) = condition.split_once('=').ok_or_else(|| {
        ToolkitError::Decode(format!("only equality conditions are supported: {condition}"))
    })?;
    let column = column.trim();
    if !is_identifier(column) {
        return Err(ToolkitError::Decode(format!(
            "invalid condition column: {column}"
        )));
    }
    let value = value.trim();
    let literal = if let Some(inner) = strip_quotes(value, '\'').or_else(|| strip_quotes(value, '"'))
    {
        QueryLiteral::Str(inner.to_string())
    } else {
        QueryLiteral::Int(value.parse::<i32>().map_err(|_| {
            ToolkitError::Decode(format!("unquoted condition value is not an integer: {value}"))
        })?)
    };
    Ok((column.to_string(), literal))
}

fn strip_quotes(value: &str, quote: char) -> Option<&str> {
    value
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
}

/// MSI identifiers: letters, digits, `_`, `.`, with a leading letter or `_`
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn split_case_insensitive<'a>(haystack: &'a str, separator: &str) -> Vec<&'a str> {
    let lower = haystack.to_ascii_lowercase();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut search = 0;
    while let Some(pos) = lower[search..].find(separator) {
        let absolute = search + pos;
        parts.push(&haystack[start..absolute]);
        start = absolute + separator.len();
        search = start;
    }
    parts.push(&haystack[start..]);
    parts
}
