//! Per-column descriptive statistics.
//!
//! [`describe_table`] is the in-memory implementation. The runtime path builds
//! the same [`ColumnSummary`] shape from Polars (see `runtime::engine`), with
//! two accepted differences: numeric classification comes from the column
//! dtype instead of the parse-rate threshold, and quantiles are linearly
//! interpolated instead of nearest-rank.

use crate::stats;
use crate::table::{Table, Value};
use serde::{Deserialize, Serialize};

/// Dtype label reported by the in-memory path for numeric columns.
pub const NUMBER_DTYPE: &str = "number";
/// Dtype label reported by the in-memory path for everything else.
pub const STRING_DTYPE: &str = "string";
/// How many categories `top_categories` keeps.
pub const TOP_CATEGORIES: usize = 5;

/// How a column would fare if coerced to numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumericCoercion {
    pub total: usize,
    pub coerced: usize,
    pub would_be_nan: usize,
}

impl NumericCoercion {
    pub fn from_values(values: &[Value]) -> Self {
        let total = values.len();
        let coerced = values
            .iter()
            .filter(|v| !v.is_missing() && v.parse_number().is_some())
            .count();
        Self {
            total,
            coerced,
            would_be_nan: total - coerced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub name: String,
    pub dtype: String,
    pub numeric: bool,
    pub missing: usize,
    pub unique: usize,
    pub mode: Value,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub q1: Option<f64>,
    pub median: Option<f64>,
    pub q3: Option<f64>,
    pub top_categories: Vec<(Value, usize)>,
    pub numeric_coercion: Option<NumericCoercion>,
}

impl ColumnSummary {
    /// An empty summary; numeric statistics and categories unset.
    pub fn new(name: impl Into<String>, dtype: impl Into<String>, numeric: bool) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            numeric,
            missing: 0,
            unique: 0,
            mode: Value::Null,
            mean: None,
            std: None,
            min: None,
            max: None,
            q1: None,
            median: None,
            q3: None,
            top_categories: Vec::new(),
            numeric_coercion: None,
        }
    }

    pub fn non_missing(&self) -> usize {
        self.numeric_coercion
            .map_or(0, |c| c.total)
            .saturating_sub(self.missing)
    }
}

/// Summaries for every column, in table column order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Summary {
    pub columns: Vec<ColumnSummary>,
}

impl Summary {
    pub fn get(&self, name: &str) -> Option<&ColumnSummary> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ColumnSummary> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Numeric when at least `threshold` of the non-missing values parse as
/// finite numbers. A column with no non-missing values counts as numeric.
pub fn is_numeric_column(values: &[Value], threshold: f64) -> bool {
    let non_missing = values.iter().filter(|v| !v.is_missing()).count();
    if non_missing == 0 {
        return true;
    }
    let parsed = stats::parse_numbers(values).len();
    parsed as f64 / non_missing as f64 >= threshold
}

pub fn describe_table(table: &Table, numeric_threshold: f64) -> Summary {
    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| describe_column(name, &table.column_at(idx), numeric_threshold))
        .collect();
    Summary { columns }
}

pub fn describe_column(name: &str, values: &[Value], numeric_threshold: f64) -> ColumnSummary {
    let numeric = is_numeric_column(values, numeric_threshold);
    let dtype = if numeric { NUMBER_DTYPE } else { STRING_DTYPE };
    let mut summary = ColumnSummary::new(name, dtype, numeric);

    let freqs = stats::frequencies(values);
    summary.missing = values.iter().filter(|v| v.is_missing()).count();
    summary.unique = freqs.len();
    summary.mode = stats::mode(&freqs).unwrap_or(Value::Null);
    summary.numeric_coercion = Some(NumericCoercion::from_values(values));

    if numeric {
        let nums = stats::parse_numbers(values);
        let sorted = stats::sorted(&nums);
        let (min, max) = stats::min_max(&nums).unzip();
        summary.mean = stats::mean(&nums);
        summary.std = stats::sample_std(&nums);
        summary.min = min;
        summary.max = max;
        summary.q1 = stats::nearest_rank(&sorted, 0.25);
        summary.median = stats::nearest_rank(&sorted, 0.5);
        summary.q3 = stats::nearest_rank(&sorted, 0.75);
    } else {
        summary.top_categories = stats::top_n(&freqs, TOP_CATEGORIES);
    }
    summary
}
