//! The Polars engine behind the runtime bridge.
//!
//! [`PolarsRuntime`] owns the persistent `df` binding. Every [`Script`] runs
//! against it synchronously; the bridge moves the call onto a blocking
//! thread. A mutating script computes the next frame off to the side and
//! rebinds `df` only when the whole script succeeded.

use super::frame::{coerce_numeric, frame_to_table, series_values, table_to_frame};
use super::script::{Script, ScriptOutput};
use crate::describe::{ColumnSummary, NumericCoercion, Summary, TOP_CATEGORIES};
use crate::error::{EngineError, Result};
use crate::table::{Value, ValueKey};
use crate::transform::{
    CoercionPreview, Encoding, ImputeMethod, ImputePreview, MissingRow, MissingRows,
    resolve_constant,
};
use polars::prelude::*;
use std::collections::HashMap;
use tracing::debug;

const COUNT_COLUMN: &str = "__tabwright_count";

#[derive(Debug, Default)]
pub struct PolarsRuntime {
    df: DataFrame,
    installed: Vec<String>,
}

impl PolarsRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current `df` binding.
    pub fn frame(&self) -> &DataFrame {
        &self.df
    }

    /// Components that installed successfully, in install order.
    pub fn installed(&self) -> &[String] {
        &self.installed
    }

    pub(crate) fn mark_installed(&mut self, component: &str) {
        if !self.installed.iter().any(|c| c == component) {
            self.installed.push(component.to_owned());
        }
    }

    pub fn run(&mut self, script: Script) -> Result<ScriptOutput> {
        debug!(script = script.name(), rows = self.df.height(), "Running script");
        match script {
            Script::Load { table } => {
                self.df = table_to_frame(&table)?;
                Ok(ScriptOutput::Unit)
            }
            Script::Describe => Ok(ScriptOutput::Summary(describe_frame(&self.df)?)),
            Script::Head { n } => {
                let head = frame_to_table(&self.df.head(Some(n)))?;
                Ok(ScriptOutput::Records(head.records().collect()))
            }
            Script::DropColumn { column } => {
                self.series(&column)?;
                let next = self.df.drop(&column)?;
                self.commit(next)
            }
            Script::Impute {
                column,
                method,
                value,
            } => {
                let filled = self.imputed(&column, method, value.as_ref())?;
                let mut next = self.df.clone();
                next.replace(&column, filled)?;
                self.commit(next)
            }
            Script::PreviewImpute {
                column,
                method,
                value,
                limit,
            } => {
                let before = series_values(self.series(&column)?)?;
                let after = series_values(&self.imputed(&column, method, value.as_ref())?)?;
                Ok(ScriptOutput::ImputePreview(ImputePreview::from_columns(
                    &column, method, before, after, limit,
                )))
            }
            Script::Normalize { column } => {
                let next = self.normalized(&column)?;
                self.commit(next)
            }
            Script::Encode { column } => {
                let mut next = self.df.clone();
                let encoding = encode_into(&mut next, self.series(&column)?)?;
                let ScriptOutput::Table(table) = self.commit(next)? else {
                    return Err(EngineError::RuntimeExecution(
                        "encode did not produce a table".to_owned(),
                    ));
                };
                Ok(ScriptOutput::Encoded {
                    table,
                    encodings: vec![encoding],
                })
            }
            Script::EncodeCategoricals => {
                let mut next = self.df.clone();
                let mut encodings = Vec::new();
                for column in self.df.get_columns() {
                    let series = column.as_materialized_series();
                    if series.dtype().is_primitive_numeric() || matches!(series.dtype(), DataType::Null) {
                        continue;
                    }
                    encodings.push(encode_into(&mut next, series)?);
                }
                let ScriptOutput::Table(table) = self.commit(next)? else {
                    return Err(EngineError::RuntimeExecution(
                        "encode did not produce a table".to_owned(),
                    ));
                };
                Ok(ScriptOutput::Encoded { table, encodings })
            }
            Script::PreviewCoerce { column, samples } => {
                let series = self.series(&column)?;
                let originals = series_values(series)?;
                let parsed = coerce_numeric(series)?;
                let pairs = originals.into_iter().zip(parsed.into_iter());
                Ok(ScriptOutput::CoercionPreview(CoercionPreview::from_pairs(
                    &column, pairs, samples,
                )))
            }
            Script::Coerce { column } => {
                let coerced = coerce_numeric(self.series(&column)?)?;
                let mut next = self.df.clone();
                next.replace(&column, coerced.into_series())?;
                self.commit(next)
            }
            Script::MissingRows { column, limit } => {
                Ok(ScriptOutput::MissingRows(self.missing_rows(&column, limit)?))
            }
            Script::ToCsv => {
                let mut buf = Vec::new();
                let mut df = self.df.clone();
                CsvWriter::new(&mut buf)
                    .include_header(true)
                    .with_separator(b',')
                    .finish(&mut df)?;
                Ok(ScriptOutput::Csv(buf))
            }
        }
    }

    fn commit(&mut self, next: DataFrame) -> Result<ScriptOutput> {
        let table = frame_to_table(&next)?;
        self.df = next;
        Ok(ScriptOutput::Table(table))
    }

    fn series(&self, column: &str) -> Result<&Series> {
        self.df
            .get_columns()
            .iter()
            .find(|c| c.name().as_str() == column)
            .map(Column::as_materialized_series)
            .ok_or_else(|| EngineError::ColumnNotFound(column.to_owned()))
    }

    /// The imputed column, named like the original.
    fn imputed(&self, column: &str, method: ImputeMethod, value: Option<&Value>) -> Result<Series> {
        let series = self.series(column)?;
        let numeric = series.dtype().is_primitive_numeric() || matches!(series.dtype(), DataType::Null);
        let no_values = || {
            EngineError::InvalidArgument(format!(
                "column '{column}' has no values to compute the {method}"
            ))
        };
        let fill = match method {
            ImputeMethod::Ffill => return Ok(series.fill_null(FillNullStrategy::Forward(None))?),
            ImputeMethod::Bfill => {
                return Ok(series.fill_null(FillNullStrategy::Backward(None))?);
            }
            ImputeMethod::Mean => {
                let stat = coerce_numeric(series)?.mean().ok_or_else(no_values)?;
                Value::number(stat)
            }
            ImputeMethod::Median => {
                let stat = coerce_numeric(series)?
                    .quantile(0.5, QuantileMethod::Linear)?
                    .ok_or_else(no_values)?;
                Value::number(stat)
            }
            ImputeMethod::Mode => category_counts(series)?
                .into_iter()
                .next()
                .map(|(v, _)| v)
                .ok_or_else(no_values)?,
            ImputeMethod::Constant => resolve_constant(value, numeric)?,
        };
        let expr = match fill {
            Value::Number(n) if numeric => col(column).cast(DataType::Float64).fill_null(lit(n)),
            other => col(column)
                .cast(DataType::String)
                .fill_null(lit(other.to_string())),
        };
        let out = self
            .df
            .clone()
            .lazy()
            .select([expr.alias(column)])
            .collect()?;
        Ok(out.column(column)?.as_materialized_series().clone())
    }

    fn normalized(&self, column: &str) -> Result<DataFrame> {
        let coerced = coerce_numeric(self.series(column)?)?;
        let (Some(min), Some(max)) = (coerced.min(), coerced.max()) else {
            return Err(EngineError::Coercion(format!(
                "column '{column}' has no numeric values to normalize"
            )));
        };
        let mut next = self.df.clone();
        next.replace(column, coerced.into_series())?;
        let e = col(column);
        // a constant column scales to 0; nulls stay null
        let scaled = if max == min {
            e * lit(0.0)
        } else if (max - min).is_finite() {
            (e - lit(min)) / lit(max - min)
        } else {
            (e / lit(2.0) - lit(min / 2.0)) / lit(max / 2.0 - min / 2.0)
        };
        Ok(next.lazy().with_column(scaled.alias(column)).collect()?)
    }

    fn missing_rows(&self, column: &str, limit: usize) -> Result<MissingRows> {
        let series = self.series(column)?;
        let mask = series.is_null();
        let positions: Vec<usize> = mask
            .into_iter()
            .enumerate()
            .filter_map(|(row, m)| m.unwrap_or(false).then_some(row))
            .collect();
        let shown: Vec<IdxSize> = positions
            .iter()
            .take(limit)
            .map(|&row| row as IdxSize)
            .collect();
        let idx = IdxCa::from_vec("idx".into(), shown);
        let picked = frame_to_table(&self.df.take(&idx)?)?;
        let rows = positions
            .iter()
            .zip(picked.rows())
            .map(|(&row, values)| MissingRow::new(row, picked.columns(), values))
            .collect();
        Ok(MissingRows {
            column: column.to_owned(),
            missing: positions.len(),
            rows,
        })
    }
}

/// Counts of non-null values, highest first, ties in first-appearance
/// order.
fn category_counts(series: &Series) -> Result<Vec<(Value, usize)>> {
    let name = series.name().to_string();
    let counted = DataFrame::new(vec![Column::from(series.clone())])?
        .lazy()
        .filter(col(name.as_str()).is_not_null())
        .group_by_stable([col(name.as_str())])
        .agg([len().alias(COUNT_COLUMN)])
        .sort(
            [COUNT_COLUMN],
            SortMultipleOptions::default()
                .with_order_descending(true)
                .with_maintain_order(true),
        )
        .collect()?;
    let values = series_values(counted.column(name.as_str())?.as_materialized_series())?;
    let counts = counted
        .column(COUNT_COLUMN)?
        .as_materialized_series()
        .cast(&DataType::UInt64)?;
    Ok(values
        .into_iter()
        .zip(counts.u64()?.into_iter())
        .map(|(v, c)| (v, c.unwrap_or(0) as usize))
        .collect())
}

/// Replaces `series` in `df` with integer codes in ascending category
/// order.
fn encode_into(df: &mut DataFrame, series: &Series) -> Result<Encoding> {
    let sorted = series
        .drop_nulls()
        .unique()?
        .sort(SortOptions::default())?;
    let categories = series_values(&sorted)?;
    let codes: HashMap<ValueKey, i64> = categories
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.key().map(|k| (k, i as i64)))
        .collect();
    let encoded: Vec<Option<i64>> = series_values(series)?
        .iter()
        .map(|v| v.key().and_then(|k| codes.get(&k).copied()))
        .collect();
    let name = series.name().to_string();
    df.replace(&name, Series::new(name.as_str().into(), encoded))?;
    Ok(Encoding {
        column: name,
        categories,
    })
}

fn describe_frame(df: &DataFrame) -> Result<Summary> {
    let mut columns = Vec::with_capacity(df.width());
    for column in df.get_columns() {
        columns.push(describe_series(column.as_materialized_series())?);
    }
    Ok(Summary { columns })
}

fn describe_series(series: &Series) -> Result<ColumnSummary> {
    let dtype = series.dtype();
    let numeric = dtype.is_primitive_numeric() || matches!(dtype, DataType::Null);
    let mut summary = ColumnSummary::new(series.name().as_str(), dtype.to_string(), numeric);

    let counts = category_counts(series)?;
    summary.missing = series.null_count();
    summary.unique = series.drop_nulls().n_unique()?;
    summary.mode = counts.first().map(|(v, _)| v.clone()).unwrap_or_default();

    let coerced = coerce_numeric(series)?;
    let converted = coerced.len() - coerced.null_count();
    summary.numeric_coercion = Some(NumericCoercion {
        total: series.len(),
        coerced: converted,
        would_be_nan: series.len() - converted,
    });

    if numeric {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        summary.mean = finite(coerced.mean());
        summary.std = if converted < 2 {
            None
        } else {
            finite(coerced.std(1))
        };
        summary.min = finite(coerced.min());
        summary.max = finite(coerced.max());
        summary.q1 = finite(coerced.quantile(0.25, QuantileMethod::Linear)?);
        summary.median = finite(coerced.quantile(0.5, QuantileMethod::Linear)?);
        summary.q3 = finite(coerced.quantile(0.75, QuantileMethod::Linear)?);
    } else {
        summary.top_categories = counts.into_iter().take(TOP_CATEGORIES).collect();
    }
    Ok(summary)
}
