//! Column transformations and their preview shapes.
//!
//! The functions in this module are the in-memory implementations. None of
//! them mutate their input: each returns a new [`Table`] that the session
//! commits only when the whole operation succeeded.

use crate::describe::is_numeric_column;
use crate::error::{EngineError, Result};
use crate::stats;
use crate::table::{Table, Value, ValueKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImputeMethod {
    Mean,
    Median,
    Mode,
    Constant,
    Ffill,
    Bfill,
}

impl ImputeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Mode => "mode",
            Self::Constant => "constant",
            Self::Ffill => "ffill",
            Self::Bfill => "bfill",
        }
    }

    /// Methods that fill with a statistic of the column's numbers.
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Mean | Self::Median)
    }
}

impl fmt::Display for ImputeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImputeMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "mode" => Ok(Self::Mode),
            "constant" => Ok(Self::Constant),
            "ffill" => Ok(Self::Ffill),
            "bfill" => Ok(Self::Bfill),
            other => Err(EngineError::InvalidArgument(format!(
                "unknown impute method '{other}'"
            ))),
        }
    }
}

/// One row of an imputation preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputePreviewRow {
    pub row: usize,
    pub before: Value,
    pub after: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImputePreview {
    pub column: String,
    pub method: ImputeMethod,
    pub rows: Vec<ImputePreviewRow>,
}

impl ImputePreview {
    pub fn from_columns(
        column: &str,
        method: ImputeMethod,
        before: Vec<Value>,
        after: Vec<Value>,
        limit: usize,
    ) -> Self {
        let rows = before
            .into_iter()
            .zip(after)
            .take(limit)
            .enumerate()
            .map(|(row, (before, after))| ImputePreviewRow { row, before, after })
            .collect();
        Self {
            column: column.to_owned(),
            method,
            rows,
        }
    }
}

/// An original value and what it parsed to (`None` = failed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionSample {
    pub original: Value,
    pub parsed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoercionPreview {
    pub column: String,
    pub total: usize,
    pub missing: usize,
    pub converted: usize,
    pub failed: usize,
    /// Percentage of non-missing values that convert.
    pub success_rate: f64,
    pub converted_samples: Vec<CoercionSample>,
    pub failed_samples: Vec<CoercionSample>,
}

impl CoercionPreview {
    /// Builds a preview from `(original, parsed)` pairs in row order.
    pub fn from_pairs(
        column: &str,
        pairs: impl IntoIterator<Item = (Value, Option<f64>)>,
        sample_limit: usize,
    ) -> Self {
        let mut preview = Self {
            column: column.to_owned(),
            total: 0,
            missing: 0,
            converted: 0,
            failed: 0,
            success_rate: 0.0,
            converted_samples: Vec::new(),
            failed_samples: Vec::new(),
        };
        for (original, parsed) in pairs {
            preview.total += 1;
            if original.is_missing() {
                preview.missing += 1;
                continue;
            }
            let (count, samples) = if parsed.is_some() {
                (&mut preview.converted, &mut preview.converted_samples)
            } else {
                (&mut preview.failed, &mut preview.failed_samples)
            };
            *count += 1;
            if samples.len() < sample_limit {
                samples.push(CoercionSample { original, parsed });
            }
        }
        let present = preview.total - preview.missing;
        if present > 0 {
            preview.success_rate = preview.converted as f64 / present as f64 * 100.0;
        }
        preview
    }
}

/// A cell in a missing-rows preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "lowercase")]
pub enum RowCell {
    /// Null.
    Missing,
    /// Present but blank text.
    Empty,
    Value(Value),
}

impl From<&Value> for RowCell {
    fn from(v: &Value) -> Self {
        if v.is_null() {
            Self::Missing
        } else if v.is_blank_text() {
            Self::Empty
        } else {
            Self::Value(v.clone())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRow {
    pub row: usize,
    pub cells: Vec<(String, RowCell)>,
}

impl MissingRow {
    pub fn new(row: usize, columns: &[String], values: &[Value]) -> Self {
        let cells = columns
            .iter()
            .cloned()
            .zip(values.iter().map(RowCell::from))
            .collect();
        Self { row, cells }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissingRows {
    pub column: String,
    pub missing: usize,
    pub rows: Vec<MissingRow>,
}

/// Categories of one encoded column, in code order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub column: String,
    pub categories: Vec<Value>,
}

impl Encoding {
    pub fn code_of(&self, value: &Value) -> Option<usize> {
        let key = value.key()?;
        self.categories.iter().position(|c| c.key().as_ref() == Some(&key))
    }
}

fn with_column(table: &Table, idx: usize, values: Vec<Value>) -> Result<Table> {
    let mut out = table.clone();
    out.set_column(idx, values)?;
    Ok(out)
}

/// Removes `column`; an unknown column is a no-op.
pub fn drop_column(table: &Table, column: &str) -> Table {
    let mut out = table.clone();
    if let Some(idx) = table.column_index(column) {
        out.remove_column(idx);
    }
    out
}

/// Turns a user-supplied constant into the value to store. Numeric text
/// becomes a number when the column is numeric.
pub fn resolve_constant(value: Option<&Value>, numeric_column: bool) -> Result<Value> {
    let value = value
        .filter(|v| !v.is_missing())
        .ok_or_else(|| {
            EngineError::InvalidArgument("constant imputation requires a value".to_owned())
        })?;
    if numeric_column && let Some(n) = value.parse_number() {
        return Ok(Value::Number(n));
    }
    Ok(value.clone())
}

fn fill_missing(values: &[Value], fill: &Value) -> Vec<Value> {
    values
        .iter()
        .map(|v| if v.is_missing() { fill.clone() } else { v.clone() })
        .collect()
}

pub fn forward_fill(values: &[Value]) -> Vec<Value> {
    let mut last: Option<&Value> = None;
    values
        .iter()
        .map(|v| {
            if v.is_missing() {
                last.cloned().unwrap_or_else(|| v.clone())
            } else {
                last = Some(v);
                v.clone()
            }
        })
        .collect()
}

pub fn backward_fill(values: &[Value]) -> Vec<Value> {
    let reversed: Vec<Value> = values.iter().rev().cloned().collect();
    let mut out = forward_fill(&reversed);
    out.reverse();
    out
}

/// Imputed values for one column.
pub fn impute_values(
    column: &str,
    values: &[Value],
    method: ImputeMethod,
    value: Option<&Value>,
    numeric_threshold: f64,
) -> Result<Vec<Value>> {
    let no_values = || {
        EngineError::InvalidArgument(format!(
            "column '{column}' has no values to compute the {method}"
        ))
    };
    let filled = match method {
        ImputeMethod::Mean => {
            let stat = stats::mean(&stats::parse_numbers(values)).ok_or_else(no_values)?;
            fill_missing(values, &Value::number(stat))
        }
        ImputeMethod::Median => {
            let sorted = stats::sorted(&stats::parse_numbers(values));
            let stat = stats::nearest_rank(&sorted, 0.5).ok_or_else(no_values)?;
            fill_missing(values, &Value::number(stat))
        }
        ImputeMethod::Mode => {
            let stat = stats::mode(&stats::frequencies(values)).ok_or_else(no_values)?;
            fill_missing(values, &stat)
        }
        ImputeMethod::Constant => {
            let numeric = is_numeric_column(values, numeric_threshold);
            fill_missing(values, &resolve_constant(value, numeric)?)
        }
        ImputeMethod::Ffill => forward_fill(values),
        ImputeMethod::Bfill => backward_fill(values),
    };
    Ok(filled)
}

pub fn impute_column(
    table: &Table,
    column: &str,
    method: ImputeMethod,
    value: Option<&Value>,
    numeric_threshold: f64,
) -> Result<Table> {
    let idx = table.require_column(column)?;
    let filled = impute_values(column, &table.column_at(idx), method, value, numeric_threshold)?;
    with_column(table, idx, filled)
}

pub fn preview_imputation(
    table: &Table,
    column: &str,
    method: ImputeMethod,
    value: Option<&Value>,
    numeric_threshold: f64,
    limit: usize,
) -> Result<ImputePreview> {
    let idx = table.require_column(column)?;
    let before = table.column_at(idx);
    let after = impute_values(column, &before, method, value, numeric_threshold)?;
    Ok(ImputePreview::from_columns(column, method, before, after, limit))
}

/// Min-max scaling to `[0, 1]`. Values that do not parse become null; a
/// constant column maps every number to 0.
pub fn normalize_values(column: &str, values: &[Value]) -> Result<Vec<Value>> {
    let parsed: Vec<Option<f64>> = values
        .iter()
        .map(|v| if v.is_missing() { None } else { v.parse_number() })
        .collect();
    let nums: Vec<f64> = parsed.iter().flatten().copied().collect();
    let (min, max) = stats::min_max(&nums).ok_or_else(|| {
        EngineError::Coercion(format!("column '{column}' has no numeric values to normalize"))
    })?;
    Ok(parsed
        .into_iter()
        .map(|p| match p {
            Some(_) if max == min => Value::Number(0.0),
            Some(v) => Value::number(min_max_scale(v, min, max)),
            None => Value::Null,
        })
        .collect())
}

/// `(v - min) / (max - min)` for `min < max`. When the range overflows
/// every term is halved first, so the extremes still land on 0 and 1.
pub(crate) fn min_max_scale(v: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if range.is_finite() {
        (v - min) / range
    } else {
        (v / 2.0 - min / 2.0) / (max / 2.0 - min / 2.0)
    }
}

pub fn normalize_column(table: &Table, column: &str) -> Result<Table> {
    let idx = table.require_column(column)?;
    let normalized = normalize_values(column, &table.column_at(idx))?;
    with_column(table, idx, normalized)
}

/// Codes in first-appearance order; missing values stay null.
pub fn encode_values(values: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let categories: Vec<Value> = stats::frequencies(values)
        .into_iter()
        .map(|(v, _)| v)
        .collect();
    let codes: HashMap<ValueKey, usize> = categories
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.key().map(|k| (k, i)))
        .collect();
    let encoded = values
        .iter()
        .map(|v| {
            if v.is_missing() {
                return Value::Null;
            }
            v.key()
                .and_then(|k| codes.get(&k))
                .map_or(Value::Null, |&code| Value::Number(code as f64))
        })
        .collect();
    (encoded, categories)
}

pub fn encode_column(table: &Table, column: &str) -> Result<(Table, Encoding)> {
    let idx = table.require_column(column)?;
    let (encoded, categories) = encode_values(&table.column_at(idx));
    let out = with_column(table, idx, encoded)?;
    Ok((
        out,
        Encoding {
            column: column.to_owned(),
            categories,
        },
    ))
}

/// Encodes every non-numeric column.
pub fn encode_categoricals(table: &Table, numeric_threshold: f64) -> Result<(Table, Vec<Encoding>)> {
    let mut out = table.clone();
    let mut encodings = Vec::new();
    for (idx, name) in table.columns().iter().enumerate() {
        let values = table.column_at(idx);
        if is_numeric_column(&values, numeric_threshold) {
            continue;
        }
        let (encoded, categories) = encode_values(&values);
        out.set_column(idx, encoded)?;
        encodings.push(Encoding {
            column: name.clone(),
            categories,
        });
    }
    Ok((out, encodings))
}

pub fn preview_coerce_numeric(
    table: &Table,
    column: &str,
    sample_limit: usize,
) -> Result<CoercionPreview> {
    let values = table.column_values(column)?;
    let pairs = values.into_iter().map(|v| {
        let parsed = v.parse_number();
        (v, parsed)
    });
    Ok(CoercionPreview::from_pairs(column, pairs, sample_limit))
}

pub fn coerce_column_to_numeric(table: &Table, column: &str) -> Result<Table> {
    let idx = table.require_column(column)?;
    let coerced = table
        .column_at(idx)
        .iter()
        .map(|v| v.parse_number().map_or(Value::Null, Value::number))
        .collect();
    with_column(table, idx, coerced)
}

pub fn missing_rows(table: &Table, column: &str, limit: usize) -> Result<MissingRows> {
    let idx = table.require_column(column)?;
    let mut missing = 0;
    let mut rows = Vec::new();
    for (row, values) in table.rows().iter().enumerate() {
        if !values.get(idx).is_some_and(Value::is_missing) {
            continue;
        }
        missing += 1;
        if rows.len() < limit {
            rows.push(MissingRow::new(row, table.columns(), values));
        }
    }
    Ok(MissingRows {
        column: column.to_owned(),
        missing,
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(name: &str, values: Vec<Value>) -> Table {
        Table::from_rows(
            vec![name.to_owned()],
            values.into_iter().map(|v| vec![v]).collect(),
        )
        .expect("table")
    }

    fn ages() -> Table {
        single(
            "age",
            vec![
                Value::from(25),
                Value::Null,
                Value::from(30),
                Value::Null,
                Value::from(35),
            ],
        )
    }

    #[test]
    fn test_impute_mean_then_normalize() -> Result<()> {
        let t = impute_column(&ages(), "age", ImputeMethod::Mean, None, 0.6)?;
        assert_eq!(
            t.column_values("age")?,
            [25.0, 30.0, 30.0, 30.0, 35.0].map(Value::from).to_vec()
        );
        let n = normalize_column(&t, "age")?;
        assert_eq!(
            n.column_values("age")?,
            [0.0, 0.5, 0.5, 0.5, 1.0].map(Value::from).to_vec()
        );
        Ok(())
    }

    #[test]
    fn test_ffill_bfill_leave_edges_missing() -> Result<()> {
        let values = vec![Value::Null, Value::from(1), Value::Null, Value::from(3), Value::Null];
        let t = single("v", values);
        let f = impute_column(&t, "v", ImputeMethod::Ffill, None, 0.6)?;
        assert_eq!(
            f.column_values("v")?,
            vec![Value::Null, Value::from(1), Value::from(1), Value::from(3), Value::from(3)]
        );
        let b = impute_column(&t, "v", ImputeMethod::Bfill, None, 0.6)?;
        assert_eq!(
            b.column_values("v")?,
            vec![Value::from(1), Value::from(1), Value::from(3), Value::from(3), Value::Null]
        );
        Ok(())
    }

    #[test]
    fn test_constant_requires_value_and_resolves_numbers() -> Result<()> {
        let err = impute_column(&ages(), "age", ImputeMethod::Constant, None, 0.6).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));

        let t = impute_column(&ages(), "age", ImputeMethod::Constant, Some(&Value::from("0")), 0.6)?;
        assert_eq!(t.column_values("age")?.get(1), Some(&Value::Number(0.0)));
        Ok(())
    }

    #[test]
    fn test_mean_without_numbers_fails() {
        let t = single("s", vec![Value::from("a"), Value::Null]);
        assert!(impute_column(&t, "s", ImputeMethod::Mean, None, 0.6).is_err());
    }

    #[test]
    fn test_normalize_constant_column_maps_to_zero() -> Result<()> {
        let t = single("c", vec![Value::from(7), Value::Null, Value::from("7")]);
        let n = normalize_column(&t, "c")?;
        assert_eq!(
            n.column_values("c")?,
            vec![Value::Number(0.0), Value::Null, Value::Number(0.0)]
        );
        // stable across repeated calls
        let again = normalize_column(&n, "c")?;
        assert_eq!(again, n);
        Ok(())
    }

    #[test]
    fn test_normalize_range_wider_than_f64() -> Result<()> {
        let t = single("w", [-1e308, 0.0, 1e308].map(Value::from).to_vec());
        let n = normalize_column(&t, "w")?;
        assert_eq!(n.column_values("w")?, [0.0, 0.5, 1.0].map(Value::from).to_vec());
        Ok(())
    }

    #[test]
    fn test_impute_mode_uses_first_most_frequent() -> Result<()> {
        let t = single(
            "c",
            vec![Value::from("b"), Value::Null, Value::from("a"), Value::from("a"), Value::from("b")],
        );
        let m = impute_column(&t, "c", ImputeMethod::Mode, None, 0.6)?;
        assert_eq!(m.column_values("c")?.get(1), Some(&Value::from("b")));
        Ok(())
    }

    #[test]
    fn test_encode_first_seen_order() -> Result<()> {
        let t = single(
            "color",
            ["red", "blue", "red", "green"].map(Value::from).to_vec(),
        );
        let (out, enc) = encode_column(&t, "color")?;
        assert_eq!(enc.categories, ["red", "blue", "green"].map(Value::from).to_vec());
        assert_eq!(out.column_values("color")?, [0.0, 1.0, 0.0, 2.0].map(Value::from).to_vec());
        assert_eq!(enc.code_of(&Value::from("green")), Some(2));
        Ok(())
    }

    #[test]
    fn test_preview_coerce_counts() -> Result<()> {
        let t = single("x", ["1", "2", "abc", "4"].map(Value::from).to_vec());
        let p = preview_coerce_numeric(&t, "x", 5)?;
        assert_eq!((p.total, p.failed, p.converted), (4, 1, 3));
        assert!((p.success_rate - 75.0).abs() < 1e-9);
        assert_eq!(p.failed_samples.first().map(|s| &s.original), Some(&Value::from("abc")));
        Ok(())
    }

    #[test]
    fn test_drop_unknown_column_is_noop() {
        let t = ages();
        assert_eq!(drop_column(&t, "nope"), t);
        assert!(drop_column(&t, "age").is_empty());
    }

    #[test]
    fn test_missing_rows_marks_cells() -> Result<()> {
        let t = Table::from_rows(
            vec!["a".to_owned(), "b".to_owned()],
            vec![
                vec![Value::Null, Value::from("")],
                vec![Value::from(1), Value::Null],
                vec![Value::from(" "), Value::from("x")],
            ],
        )?;
        let m = missing_rows(&t, "a", 1)?;
        assert_eq!(m.missing, 2);
        assert_eq!(m.rows.len(), 1);
        let cells = &m.rows.first().expect("row").cells;
        assert_eq!(cells.first().map(|c| &c.1), Some(&RowCell::Missing));
        assert_eq!(cells.get(1).map(|c| &c.1), Some(&RowCell::Empty));
        Ok(())
    }

    #[test]
    fn test_impute_method_parse() {
        assert_eq!("Median".parse::<ImputeMethod>().ok(), Some(ImputeMethod::Median));
        assert!("avg".parse::<ImputeMethod>().is_err());
    }
}
