// crates/ph5-core/src/core/kef.rs
// ============================================================================
// Module: Kef Codec
// Description: Plain-text table serialization used for backups and bulk edits.
// Purpose: Encode table contents as kef text and parse kef text back to rows.
// Dependencies: crate::core::{identifiers, table, time}, thiserror
// ============================================================================

//! ## Overview
//! A kef document is a sequence of row blocks. Each block starts with a
//! `# Table row N` marker comment, then the table's absolute path on its own
//! line, then one `key = value` line per present column:
//!
//! ```text
//! #   Table row 1
//! /Experiment_g/Receivers_g/Index_t
//!     serial_number_s = 1X1111
//! ```
//!
//! Parsing is line oriented and lenient about whitespace around `=`.
//! Values stay textual until [`KefTable::typed_rows`] applies column kinds,
//! so a document can be patched as text before it is re-imported.
//!
//! Text values are written so that reading them back is exact: `\\`, `\n`,
//! `\r`, `\t` and `\"` escapes, and double quotes around a value that is
//! empty, starts with a quote, or has leading or trailing whitespace. Any
//! other backslash is kept literally, so hand-written files read as typed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt::Write as _;

use thiserror::Error;

use crate::core::identifiers::NodePath;
use crate::core::table::Column;
use crate::core::table::FieldValue;
use crate::core::table::Row;
use crate::core::table::RowError;
use crate::core::table::TableData;
use crate::core::time::Ph5Time;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Kef parse and conversion errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KefError {
    /// A line could not be parsed.
    #[error("kef line {line}: {message}")]
    Syntax {
        /// One-based line number.
        line: usize,
        /// Parse failure detail.
        message: String,
    },
    /// A value did not match its column kind.
    #[error("kef table {table}: {source}")]
    Value {
        /// Table path the value belongs to.
        table: String,
        /// Underlying row error.
        source: RowError,
    },
}

// ============================================================================
// SECTION: Encoding
// ============================================================================

/// Prefix of the per-row marker comment.
pub const ROW_MARKER: &str = "#   Table row";

/// Encodes a table as kef text.
///
/// Columns are written in declaration order; a column absent from a row is
/// omitted from that row's block.
#[must_use]
pub fn encode_table(path: &NodePath, table: &TableData, written_at: Ph5Time) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "#");
    let _ = writeln!(out, "#   Written by ph5-tools v{}", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(out, "#   Table: {path}");
    let _ = writeln!(out, "#   Written at: {}", written_at.ascii());
    let _ = writeln!(out, "#   Rows: {}", table.rows.len());
    let _ = writeln!(out, "#");
    for (index, row) in table.rows.iter().enumerate() {
        let _ = writeln!(out, "{ROW_MARKER} {}", index + 1);
        let _ = writeln!(out, "{path}");
        for column in &table.columns {
            if let Some(value) = row.get(&column.name) {
                let _ = writeln!(out, "\t{} = {}", column.name, encode_value(value));
            }
        }
    }
    out
}

/// Renders a value on one line so it cannot split a block.
fn encode_value(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(text) => encode_text(text),
        other => other.to_string(),
    }
}

/// Escapes a text value and quotes it when surrounding whitespace or a
/// leading quote would otherwise be lost on reading.
#[must_use]
pub fn encode_text(text: &str) -> String {
    let quoted = text.is_empty() || text.starts_with('"') || text.trim() != text;
    let mut out = String::with_capacity(text.len() + 2);
    if quoted {
        out.push('"');
    }
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '"' if quoted => out.push_str("\\\""),
            other => out.push(other),
        }
    }
    if quoted {
        out.push('"');
    }
    out
}

/// Reverses [`encode_text`] on a value with surrounding whitespace removed.
#[must_use]
pub fn decode_text(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value);
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let decoded = match chars.peek() {
            Some('\\') => Some('\\'),
            Some('n') => Some('\n'),
            Some('r') => Some('\r'),
            Some('t') => Some('\t'),
            Some('"') => Some('"'),
            _ => None,
        };
        match decoded {
            Some(decoded) => {
                out.push(decoded);
                chars.next();
            }
            None => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// SECTION: Decoding
// ============================================================================

/// Rows for one table path parsed from a kef document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KefTable {
    /// Table path.
    pub path: NodePath,
    /// Column names in first-seen order.
    pub columns: Vec<String>,
    /// Rows as `(column, raw text)` pairs in document order.
    pub rows: Vec<Vec<(String, String)>>,
}

impl KefTable {
    /// Returns columns for creating this table, kinds inferred by suffix.
    #[must_use]
    pub fn inferred_columns(&self) -> Vec<Column> {
        self.columns.iter().map(Column::new).collect()
    }

    /// Converts raw rows into typed rows using `columns` for value kinds.
    ///
    /// Keys not present in `columns` are typed by suffix; the store decides
    /// whether they are acceptable.
    ///
    /// # Errors
    ///
    /// Returns [`KefError::Value`] when a value does not parse as its kind.
    pub fn typed_rows(&self, columns: &[Column]) -> Result<Vec<Row>, KefError> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for raw in &self.rows {
            let mut row = Row::new();
            for (key, text) in raw {
                let kind = columns
                    .iter()
                    .find(|column| &column.name == key)
                    .map_or_else(|| Column::new(key.as_str()).kind, |column| column.kind);
                let value = FieldValue::parse(kind, key, text).map_err(|source| {
                    KefError::Value {
                        table: self.path.to_string(),
                        source,
                    }
                })?;
                row.set(key.as_str(), value);
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Parses a kef document into per-table row sets in first-seen order.
///
/// # Errors
///
/// Returns [`KefError::Syntax`] for a key/value line outside a block or a
/// line that is neither a comment, a path, nor `key = value`.
pub fn parse(text: &str) -> Result<Vec<KefTable>, KefError> {
    let mut tables: Vec<KefTable> = Vec::new();
    let mut current: Option<usize> = None;
    for (index, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('/') {
            let path = NodePath::new(line);
            let slot = if let Some(slot) = tables.iter().position(|table| table.path == path) {
                slot
            } else {
                tables.push(KefTable {
                    path,
                    columns: Vec::new(),
                    rows: Vec::new(),
                });
                tables.len() - 1
            };
            tables[slot].rows.push(Vec::new());
            current = Some(slot);
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(KefError::Syntax {
                line: index + 1,
                message: format!("expected key = value, got {line}"),
            });
        };
        let Some(slot) = current else {
            return Err(KefError::Syntax {
                line: index + 1,
                message: "key/value before any table path".to_string(),
            });
        };
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(KefError::Syntax {
                line: index + 1,
                message: "empty key".to_string(),
            });
        }
        let table = &mut tables[slot];
        if !table.columns.contains(&key) {
            table.columns.push(key.clone());
        }
        if let Some(row) = table.rows.last_mut() {
            row.push((key, decode_text(value.trim())));
        }
    }
    Ok(tables)
}

// ============================================================================
// SECTION: Tests
// ============================================================================
