//! Conversions between [`Table`] and Polars frames.
//!
//! A column becomes `Float64` when every non-missing value is already a
//! number, otherwise `String`. Blank text becomes null on the way in, so
//! Polars' own null handling sees the same missing cells the in-memory
//! path does.

use crate::error::Result;
use crate::table::{Table, Value};
use polars::prelude::*;
use std::io::Cursor;

pub fn table_to_frame(table: &Table) -> Result<DataFrame> {
    let columns = table
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, name)| Column::from(values_to_series(name, &table.column_at(idx))))
        .collect::<Vec<_>>();
    Ok(DataFrame::new(columns)?)
}

pub fn values_to_series(name: &str, values: &[Value]) -> Series {
    let numeric = values
        .iter()
        .all(|v| v.is_missing() || v.as_number().is_some());
    if numeric {
        let data: Vec<Option<f64>> = values
            .iter()
            .map(|v| if v.is_missing() { None } else { v.as_number() })
            .collect();
        Series::new(name.into(), data)
    } else {
        let data: Vec<Option<String>> = values
            .iter()
            .map(|v| match v {
                Value::Null => None,
                Value::Text(s) if s.trim().is_empty() => None,
                other => Some(other.to_string()),
            })
            .collect();
        Series::new(name.into(), data)
    }
}

/// Values of a series. Numeric dtypes come back as numbers, everything
/// else as text.
pub fn series_values(series: &Series) -> Result<Vec<Value>> {
    let dtype = series.dtype();
    if matches!(dtype, DataType::Null) {
        return Ok(vec![Value::Null; series.len()]);
    }
    if dtype.is_primitive_numeric() {
        let cast = series.cast(&DataType::Float64)?;
        return Ok(cast
            .f64()?
            .into_iter()
            .map(|o| o.map_or(Value::Null, Value::number))
            .collect());
    }
    let cast = series.cast(&DataType::String)?;
    Ok(cast
        .str()?
        .into_iter()
        .map(|o| o.map_or(Value::Null, Value::text))
        .collect())
}

pub fn frame_to_table(df: &DataFrame) -> Result<Table> {
    let names: Vec<String> = df
        .get_column_names()
        .into_iter()
        .map(|n| n.to_string())
        .collect();
    let mut columns = Vec::with_capacity(names.len());
    for column in df.get_columns() {
        columns.push(series_values(column.as_materialized_series())?);
    }
    // a frame without columns still reports its old height
    let height = if df.width() == 0 { 0 } else { df.height() };
    let rows = (0..height)
        .map(|row| {
            columns
                .iter()
                .map(|values| values.get(row).cloned().unwrap_or_default())
                .collect()
        })
        .collect();
    Table::from_rows(names, rows)
}

/// Parses CSV text with a header row. Text cells are trimmed.
pub fn csv_to_table(text: &str) -> Result<Table> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .into_reader_with_file_handle(Cursor::new(text.as_bytes().to_vec()))
        .finish()?;
    let table = frame_to_table(&df)?;
    let rows = table
        .rows()
        .iter()
        .map(|row| {
            row.iter()
                .map(|v| match v {
                    Value::Text(s) => Value::text(s.trim()),
                    other => other.clone(),
                })
                .collect()
        })
        .collect();
    Table::from_rows(table.columns().to_vec(), rows)
}

/// Trimmed text parsed as `Float64`; anything that fails to parse, or
/// parses to a non-finite number, is null.
pub fn coerce_numeric(series: &Series) -> Result<Float64Chunked> {
    let parsed = if series.dtype().is_primitive_numeric() {
        series.cast(&DataType::Float64)?
    } else {
        let text = series.cast(&DataType::String)?;
        let trimmed: StringChunked = text.str()?.into_iter().map(|o| o.map(str::trim)).collect();
        trimmed.into_series().cast(&DataType::Float64)?
    };
    Ok(parsed
        .f64()?
        .into_iter()
        .map(|o| o.filter(|v| v.is_finite()))
        .collect())
}
