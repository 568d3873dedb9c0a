//! One capability set, two implementations.
//!
//! [`FallbackBackend`] works on the in-memory table; [`RuntimeBackend`]
//! sends typed scripts through the [`RuntimeBridge`]. Mutations return the
//! next table and leave committing to the caller, so a failure anywhere
//! leaves the store untouched.

use crate::describe::{self, Summary};
use crate::error::{EngineError, Result};
use crate::persistence;
use crate::runtime::{RuntimeBridge, Script, ScriptOutput};
use crate::table::{DatasetStore, Record, Table, Value};
use crate::transform::{
    self, CoercionPreview, Encoding, ImputeMethod, ImputePreview, MissingRows,
};
use std::future::Future;

pub trait TableBackend {
    /// `"runtime"` or `"memory"`, used in logs and the audit trail.
    fn label(&self) -> &'static str;

    fn describe(&self) -> impl Future<Output = Result<Summary>> + Send;

    fn head(&self, n: usize) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn drop_column(&self, column: &str) -> impl Future<Output = Result<Table>> + Send;

    fn impute_column(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
    ) -> impl Future<Output = Result<Table>> + Send;

    fn preview_imputation(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
        limit: usize,
    ) -> impl Future<Output = Result<ImputePreview>> + Send;

    fn normalize_column(&self, column: &str) -> impl Future<Output = Result<Table>> + Send;

    fn encode_column(&self, column: &str)
    -> impl Future<Output = Result<(Table, Encoding)>> + Send;

    fn encode_categoricals(&self) -> impl Future<Output = Result<(Table, Vec<Encoding>)>> + Send;

    fn preview_coerce_numeric(
        &self,
        column: &str,
        samples: usize,
    ) -> impl Future<Output = Result<CoercionPreview>> + Send;

    fn coerce_column_to_numeric(&self, column: &str)
    -> impl Future<Output = Result<Table>> + Send;

    fn missing_rows(
        &self,
        column: &str,
        limit: usize,
    ) -> impl Future<Output = Result<MissingRows>> + Send;

    /// Comma-delimited text with a header row.
    fn to_delimited(&self) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackBackend<'a> {
    table: &'a Table,
    numeric_threshold: f64,
}

impl<'a> FallbackBackend<'a> {
    pub fn new(table: &'a Table, numeric_threshold: f64) -> Self {
        Self {
            table,
            numeric_threshold,
        }
    }
}

impl TableBackend for FallbackBackend<'_> {
    fn label(&self) -> &'static str {
        "memory"
    }

    async fn describe(&self) -> Result<Summary> {
        Ok(describe::describe_table(self.table, self.numeric_threshold))
    }

    async fn head(&self, n: usize) -> Result<Vec<Record>> {
        Ok(self.table.head(n))
    }

    async fn drop_column(&self, column: &str) -> Result<Table> {
        Ok(transform::drop_column(self.table, column))
    }

    async fn impute_column(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
    ) -> Result<Table> {
        transform::impute_column(self.table, column, method, value, self.numeric_threshold)
    }

    async fn preview_imputation(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
        limit: usize,
    ) -> Result<ImputePreview> {
        transform::preview_imputation(
            self.table,
            column,
            method,
            value,
            self.numeric_threshold,
            limit,
        )
    }

    async fn normalize_column(&self, column: &str) -> Result<Table> {
        transform::normalize_column(self.table, column)
    }

    async fn encode_column(&self, column: &str) -> Result<(Table, Encoding)> {
        transform::encode_column(self.table, column)
    }

    async fn encode_categoricals(&self) -> Result<(Table, Vec<Encoding>)> {
        transform::encode_categoricals(self.table, self.numeric_threshold)
    }

    async fn preview_coerce_numeric(&self, column: &str, samples: usize) -> Result<CoercionPreview> {
        transform::preview_coerce_numeric(self.table, column, samples)
    }

    async fn coerce_column_to_numeric(&self, column: &str) -> Result<Table> {
        transform::coerce_column_to_numeric(self.table, column)
    }

    async fn missing_rows(&self, column: &str, limit: usize) -> Result<MissingRows> {
        transform::missing_rows(self.table, column, limit)
    }

    async fn to_delimited(&self) -> Result<Vec<u8>> {
        Ok(persistence::to_delimited(
            self.table,
            persistence::DEFAULT_DELIMITER,
        ))
    }
}

/// Runs every operation inside the runtime, loading the store's table into
/// `df` first when the binding is stale.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeBackend<'a> {
    bridge: &'a RuntimeBridge,
    store: &'a DatasetStore,
}

impl<'a> RuntimeBackend<'a> {
    pub fn new(bridge: &'a RuntimeBridge, store: &'a DatasetStore) -> Self {
        Self { bridge, store }
    }

    async fn run(&self, script: Script) -> Result<ScriptOutput> {
        self.bridge.sync(self.store).await?;
        self.bridge.execute(script).await
    }
}

fn unexpected(expected: &str, got: &ScriptOutput) -> EngineError {
    EngineError::RuntimeExecution(format!(
        "expected {expected} output, runtime returned {}",
        got.kind()
    ))
}

impl TableBackend for RuntimeBackend<'_> {
    fn label(&self) -> &'static str {
        "runtime"
    }

    async fn describe(&self) -> Result<Summary> {
        match self.run(Script::Describe).await? {
            ScriptOutput::Summary(summary) => Ok(summary),
            other => Err(unexpected("summary", &other)),
        }
    }

    async fn head(&self, n: usize) -> Result<Vec<Record>> {
        match self.run(Script::Head { n }).await? {
            ScriptOutput::Records(records) => Ok(records),
            other => Err(unexpected("records", &other)),
        }
    }

    async fn drop_column(&self, column: &str) -> Result<Table> {
        let script = Script::DropColumn {
            column: column.to_owned(),
        };
        match self.run(script).await? {
            ScriptOutput::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    async fn impute_column(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
    ) -> Result<Table> {
        let script = Script::Impute {
            column: column.to_owned(),
            method,
            value: value.cloned(),
        };
        match self.run(script).await? {
            ScriptOutput::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    async fn preview_imputation(
        &self,
        column: &str,
        method: ImputeMethod,
        value: Option<&Value>,
        limit: usize,
    ) -> Result<ImputePreview> {
        let script = Script::PreviewImpute {
            column: column.to_owned(),
            method,
            value: value.cloned(),
            limit,
        };
        match self.run(script).await? {
            ScriptOutput::ImputePreview(preview) => Ok(preview),
            other => Err(unexpected("impute preview", &other)),
        }
    }

    async fn normalize_column(&self, column: &str) -> Result<Table> {
        let script = Script::Normalize {
            column: column.to_owned(),
        };
        match self.run(script).await? {
            ScriptOutput::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    async fn encode_column(&self, column: &str) -> Result<(Table, Encoding)> {
        let script = Script::Encode {
            column: column.to_owned(),
        };
        match self.run(script).await? {
            ScriptOutput::Encoded {
                table,
                mut encodings,
            } if encodings.len() == 1 => {
                let encoding = encodings.remove(0);
                Ok((table, encoding))
            }
            other => Err(unexpected("single encoding", &other)),
        }
    }

    async fn encode_categoricals(&self) -> Result<(Table, Vec<Encoding>)> {
        match self.run(Script::EncodeCategoricals).await? {
            ScriptOutput::Encoded { table, encodings } => Ok((table, encodings)),
            other => Err(unexpected("encoding", &other)),
        }
    }

    async fn preview_coerce_numeric(&self, column: &str, samples: usize) -> Result<CoercionPreview> {
        let script = Script::PreviewCoerce {
            column: column.to_owned(),
            samples,
        };
        match self.run(script).await? {
            ScriptOutput::CoercionPreview(preview) => Ok(preview),
            other => Err(unexpected("coercion preview", &other)),
        }
    }

    async fn coerce_column_to_numeric(&self, column: &str) -> Result<Table> {
        let script = Script::Coerce {
            column: column.to_owned(),
        };
        match self.run(script).await? {
            ScriptOutput::Table(table) => Ok(table),
            other => Err(unexpected("table", &other)),
        }
    }

    async fn missing_rows(&self, column: &str, limit: usize) -> Result<MissingRows> {
        let script = Script::MissingRows {
            column: column.to_owned(),
            limit,
        };
        match self.run(script).await? {
            ScriptOutput::MissingRows(rows) => Ok(rows),
            other => Err(unexpected("missing rows", &other)),
        }
    }

    async fn to_delimited(&self) -> Result<Vec<u8>> {
        match self.run(Script::ToCsv).await? {
            ScriptOutput::Csv(bytes) => Ok(bytes),
            other => Err(unexpected("csv", &other)),
        }
    }
}
