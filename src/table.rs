//! The in-memory table: tagged values, records, and the dataset store.
//!
//! Rows are stored positionally, aligned with the column list, so a row can
//! never be missing a column or carry an extra one. [`Record`] is the
//! name-to-value view used when rows cross the engine boundary.

use crate::error::{EngineError, Result};
use serde::ser::SerializeMap as _;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;

/// A single cell.
///
/// Numbers are always finite; [`Value::number`] turns NaN and infinities into
/// [`Value::Null`] so missing data has exactly one representation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Number(f64),
    Text(String),
}

impl Value {
    pub fn number(v: f64) -> Self {
        if v.is_finite() {
            Self::Number(v)
        } else {
            Self::Null
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null or blank text.
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Number(_) => false,
            Self::Text(s) => s.trim().is_empty(),
        }
    }

    /// Blank text that is present in the row (as opposed to null).
    pub fn is_blank_text(&self) -> bool {
        matches!(self, Self::Text(s) if s.trim().is_empty())
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// Interprets the value as a finite number, parsing text after trimming.
    pub fn parse_number(&self) -> Option<f64> {
        match self {
            Self::Null => None,
            Self::Number(v) => Some(*v),
            Self::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    /// Hashable identity used for distinct counts and category codes.
    pub fn key(&self) -> Option<ValueKey> {
        match self {
            Self::Null => None,
            Self::Number(v) => Some(ValueKey::Number(canonical_bits(*v))),
            Self::Text(s) => Some(ValueKey::Text(s.clone())),
        }
    }
}

fn canonical_bits(v: f64) -> u64 {
    // -0.0 and 0.0 are the same category
    if v == 0.0 { 0.0_f64.to_bits() } else { v.to_bits() }
}

/// Identity of a non-null [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Number(u64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::number(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Number(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Number(f64::from(v))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// A row viewed as `column -> value`, in table column order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct RawTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl TryFrom<RawTable> for Table {
    type Error = EngineError;

    fn try_from(raw: RawTable) -> Result<Self> {
        Self::from_rows(raw.columns, raw.rows)
    }
}

/// Ordered unique columns plus ordered rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawTable")]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Result<Self> {
        Self::from_rows(columns, Vec::new())
    }

    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(columns.len());
        for name in &columns {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::InvalidTable(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(EngineError::InvalidTable(format!(
                "row {idx} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    /// Builds a table from name/value records. Every record must carry exactly
    /// the given column set.
    pub fn from_records<I, R, K, V>(columns: Vec<String>, records: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let width = columns.len();
        let mut rows = Vec::new();
        for (idx, record) in records.into_iter().enumerate() {
            let mut row: Vec<Option<Value>> = vec![None; width];
            for (k, v) in record {
                let key: String = k.into();
                let Some(pos) = columns.iter().position(|c| *c == key) else {
                    return Err(EngineError::InvalidTable(format!(
                        "record {idx} has unknown column '{key}'"
                    )));
                };
                if let Some(slot) = row.get_mut(pos) {
                    *slot = Some(v.into());
                }
            }
            let row = row
                .into_iter()
                .zip(&columns)
                .map(|(cell, name)| {
                    cell.ok_or_else(|| {
                        EngineError::InvalidTable(format!(
                            "record {idx} is missing column '{name}'"
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            rows.push(row);
        }
        Self::from_rows(columns, rows)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize> {
        self.column_index(name)
            .ok_or_else(|| EngineError::ColumnNotFound(name.to_owned()))
    }

    /// Values of one column in row order.
    pub fn column_values(&self, name: &str) -> Result<Vec<Value>> {
        let idx = self.require_column(name)?;
        Ok(self.column_at(idx))
    }

    pub(crate) fn column_at(&self, idx: usize) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| row.get(idx).cloned().unwrap_or_default())
            .collect()
    }

    /// Replaces a column's values. Length must match the row count.
    pub(crate) fn set_column(&mut self, idx: usize, values: Vec<Value>) -> Result<()> {
        if values.len() != self.rows.len() {
            return Err(EngineError::InvalidTable(format!(
                "column has {} values, table has {} rows",
                values.len(),
                self.rows.len()
            )));
        }
        for (row, v) in self.rows.iter_mut().zip(values) {
            if let Some(cell) = row.get_mut(idx) {
                *cell = v;
            }
        }
        Ok(())
    }

    pub(crate) fn remove_column(&mut self, idx: usize) {
        if idx >= self.columns.len() {
            return;
        }
        self.columns.remove(idx);
        for row in &mut self.rows {
            row.remove(idx);
        }
        // a table without columns has no rows
        if self.columns.is_empty() {
            self.rows.clear();
        }
    }

    pub fn record(&self, row: usize) -> Option<Record> {
        let values = self.rows.get(row)?;
        Some(Record {
            fields: self.columns.iter().cloned().zip(values.iter().cloned()).collect(),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record> + '_ {
        (0..self.rows.len()).filter_map(|i| self.record(i))
    }

    pub fn head(&self, n: usize) -> Vec<Record> {
        self.records().take(n).collect()
    }
}

/// Single source of truth for the current table.
///
/// Every replacement bumps the generation so mirrors (the runtime's `df`
/// binding) can tell whether they are stale.
#[derive(Debug, Default)]
pub struct DatasetStore {
    table: Table,
    generation: u64,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        !self.table.is_empty()
    }

    /// Replaces the table wholesale and returns the new generation.
    pub fn replace(&mut self, table: Table) -> u64 {
        self.table = table;
        self.generation += 1;
        self.generation
    }
}
