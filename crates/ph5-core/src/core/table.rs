// crates/ph5-core/src/core/table.rs
// ============================================================================
// Module: PH5 Table Model
// Description: Typed column/row model shared by every PH5 table.
// Purpose: Represent fixed-schema table rows independently of the store.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A PH5 table is an ordered list of columns whose value type is implied by
//! the column name suffix (`_i`/`_l` integers, `_d`/`_f` floats, anything
//! else text). Nested column groups are flattened with `/`, so a time group
//! becomes `start_time/epoch_l`, `start_time/micro_seconds_i` and so on.
//! Rows are maps from column name to value; a row may omit a column, which is
//! how an absent field is represented.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::time::Ph5Time;
use crate::core::time::TIME_TYPE_BOTH;

// ============================================================================
// SECTION: Column Types
// ============================================================================

/// Value type of a column, implied by its name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Signed integer (`_i`, `_l`).
    Int,
    /// Floating point (`_d`, `_f`).
    Float,
    /// Text (`_s`, `_a`, anything else).
    Text,
}

impl ColumnKind {
    /// Infers the column kind from a (possibly nested) column name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        let leaf = name.rsplit('/').next().unwrap_or(name);
        if leaf.ends_with("_i") || leaf.ends_with("_l") {
            Self::Int
        } else if leaf.ends_with("_d") || leaf.ends_with("_f") {
            Self::Float
        } else {
            Self::Text
        }
    }

    /// Returns the stable label used by stores.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Text => "text",
        }
    }

    /// Parses a stable label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "int" => Some(Self::Int),
            "float" => Some(Self::Float),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

/// A named, typed table column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Column {
    /// Flattened column name.
    pub name: String,
    /// Value type.
    pub kind: ColumnKind,
}

impl Column {
    /// Creates a column, inferring the kind from the name suffix.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let kind = ColumnKind::from_name(&name);
        Self {
            name,
            kind,
        }
    }
}

/// Builds a column list from names.
#[must_use]
pub fn columns(names: &[&str]) -> Vec<Column> {
    names.iter().map(|name| Column::new(*name)).collect()
}

/// Returns the four column names of a PH5 time group.
#[must_use]
pub fn time_columns(prefix: &str) -> [String; 4] {
    [
        format!("{prefix}/epoch_l"),
        format!("{prefix}/micro_seconds_i"),
        format!("{prefix}/type_s"),
        format!("{prefix}/ascii_s"),
    ]
}

// ============================================================================
// SECTION: Values
// ============================================================================

/// A single typed cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Text value.
    Text(String),
}

impl FieldValue {
    /// Returns the value kind.
    #[must_use]
    pub const fn kind(&self) -> ColumnKind {
        match self {
            Self::Int(_) => ColumnKind::Int,
            Self::Float(_) => ColumnKind::Float,
            Self::Text(_) => ColumnKind::Text,
        }
    }

    /// Parses a textual value for a column kind. Numbers ignore surrounding
    /// whitespace; text is kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::Invalid`] when the text does not parse as `kind`.
    pub fn parse(kind: ColumnKind, column: &str, text: &str) -> Result<Self, RowError> {
        let trimmed = text.trim();
        match kind {
            ColumnKind::Int => trimmed.parse::<i64>().map(Self::Int).map_err(|_| {
                RowError::Invalid(format!("column {column}: not an integer: {trimmed}"))
            }),
            ColumnKind::Float => trimmed.parse::<f64>().map(Self::Float).map_err(|_| {
                RowError::Invalid(format!("column {column}: not a float: {trimmed}"))
            }),
            ColumnKind::Text => Ok(Self::Text(text.to_string())),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

// ============================================================================
// SECTION: Rows
// ============================================================================

/// Errors raised converting rows to typed records.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    /// A required column is absent.
    #[error("missing column: {0}")]
    Missing(String),
    /// A column holds a value of the wrong kind or an unparsable value.
    #[error("invalid value: {0}")]
    Invalid(String),
}

/// One table row: column name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(BTreeMap<String, FieldValue>);

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a column value, replacing any previous one.
    pub fn set(&mut self, column: impl Into<String>, value: FieldValue) {
        self.0.insert(column.into(), value);
    }

    /// Sets an integer column.
    pub fn set_int(&mut self, column: &str, value: i64) {
        self.set(column, FieldValue::Int(value));
    }

    /// Sets a text column.
    pub fn set_text(&mut self, column: &str, value: impl Into<String>) {
        self.set(column, FieldValue::Text(value.into()));
    }

    /// Sets the four columns of a time group.
    pub fn set_time(&mut self, prefix: &str, value: Ph5Time) {
        let [epoch, micros, kind, ascii] = time_columns(prefix);
        self.set_int(&epoch, value.epoch);
        self.set_int(&micros, i64::from(value.micro_seconds));
        self.set_text(&kind, TIME_TYPE_BOTH);
        self.set_text(&ascii, value.ascii());
    }

    /// Returns a column value.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.0.get(column)
    }

    /// Returns `true` when the row carries the column.
    #[must_use]
    pub fn contains(&self, column: &str) -> bool {
        self.0.contains_key(column)
    }

    /// Iterates columns present in this row, in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the number of present columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no column is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a required integer column.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when the column is missing or not an integer.
    pub fn int(&self, column: &str) -> Result<i64, RowError> {
        match self.0.get(column) {
            Some(FieldValue::Int(value)) => Ok(*value),
            Some(_) => Err(RowError::Invalid(format!("column {column}: expected integer"))),
            None => Err(RowError::Missing(column.to_string())),
        }
    }

    /// Reads an optional integer column.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::Invalid`] when the column is present but not an integer.
    pub fn opt_int(&self, column: &str) -> Result<Option<i64>, RowError> {
        if self.0.contains_key(column) { self.int(column).map(Some) } else { Ok(None) }
    }

    /// Reads a required text column.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when the column is missing or not text.
    pub fn text(&self, column: &str) -> Result<&str, RowError> {
        match self.0.get(column) {
            Some(FieldValue::Text(value)) => Ok(value.as_str()),
            Some(_) => Err(RowError::Invalid(format!("column {column}: expected text"))),
            None => Err(RowError::Missing(column.to_string())),
        }
    }

    /// Reads an optional float column.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::Invalid`] when the column is present but not numeric.
    pub fn opt_float(&self, column: &str) -> Result<Option<f64>, RowError> {
        match self.0.get(column) {
            Some(FieldValue::Float(value)) => Ok(Some(*value)),
            Some(FieldValue::Int(value)) => Ok(Some(int_as_float(*value))),
            Some(FieldValue::Text(_)) => {
                Err(RowError::Invalid(format!("column {column}: expected float")))
            }
            None => Ok(None),
        }
    }

    /// Reads a time group. The micro-second column defaults to zero.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when the epoch column is missing or malformed.
    pub fn time(&self, prefix: &str) -> Result<Ph5Time, RowError> {
        let [epoch, micros, _, _] = time_columns(prefix);
        let epoch = self.int(&epoch)?;
        let micros = self.opt_int(&micros)?.unwrap_or(0);
        let micros = i32::try_from(micros)
            .map_err(|_| RowError::Invalid(format!("column {prefix}: micro seconds out of range")))?;
        Ok(Ph5Time::new(epoch, micros))
    }
}

/// Widens an integer cell read from a float column.
#[allow(clippy::cast_precision_loss, reason = "Coordinate values fit in the f64 mantissa.")]
const fn int_as_float(value: i64) -> f64 {
    value as f64
}

impl FromIterator<(String, FieldValue)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ============================================================================
// SECTION: Tables
// ============================================================================

/// Full contents of one table: declared columns plus rows in stored order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    /// Declared columns in table order.
    pub columns: Vec<Column>,
    /// Rows in stored order.
    pub rows: Vec<Row>,
}

impl TableData {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub const fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Returns the declared column, if any.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Checks that a row only uses declared columns with matching kinds.
    ///
    /// # Errors
    ///
    /// Returns [`RowError::Invalid`] naming the first offending column.
    pub fn check_row(columns: &[Column], row: &Row) -> Result<(), RowError> {
        for (name, value) in row.iter() {
            let Some(column) = columns.iter().find(|column| column.name == name) else {
                return Err(RowError::Invalid(format!("undeclared column: {name}")));
            };
            if column.kind != value.kind() {
                return Err(RowError::Invalid(format!(
                    "column {name}: expected {}, got {}",
                    column.kind.as_str(),
                    value.kind().as_str()
                )));
            }
        }
        Ok(())
    }
}

/// A typed record stored as one row of a fixed-schema table.
pub trait TableRecord: Sized {
    /// Returns the table's columns in declaration order.
    fn columns() -> Vec<Column>;

    /// Encodes the record as a row.
    fn to_row(&self) -> Row;

    /// Decodes a record from a row.
    ///
    /// # Errors
    ///
    /// Returns [`RowError`] when a required column is missing or malformed.
    fn from_row(row: &Row) -> Result<Self, RowError>;
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions are permitted.")]

    use super::Column;
    use super::ColumnKind;
    use super::FieldValue;
    use super::Row;
    use super::TableData;
    use crate::core::time::Ph5Time;

    #[test]
    fn suffix_implies_kind_on_leaf_segment() {
        assert_eq!(ColumnKind::from_name("time/epoch_l"), ColumnKind::Int);
        assert_eq!(ColumnKind::from_name("location/X/value_d"), ColumnKind::Float);
        assert_eq!(ColumnKind::from_name("array_name_data_a"), ColumnKind::Text);
        assert_eq!(ColumnKind::from_name("das_i/serial_number_s"), ColumnKind::Text);
    }

    #[test]
    fn time_groups_round_trip_through_rows() {
        let mut row = Row::new();
        row.set_time("start_time", Ph5Time::new(1000, 250));
        assert_eq!(row.time("start_time").unwrap(), Ph5Time::new(1000, 250));
        assert_eq!(row.text("start_time/type_s").unwrap(), "BOTH");
    }

    #[test]
    fn undeclared_or_mistyped_columns_are_rejected() {
        let columns = vec![Column::new("channel_number_i")];
        let mut row = Row::new();
        row.set("channel_number_i", FieldValue::Text("one".to_string()));
        assert!(TableData::check_row(&columns, &row).is_err());
        let mut row = Row::new();
        row.set_int("other_i", 1);
        assert!(TableData::check_row(&columns, &row).is_err());
    }
}
